//! Open positions and the immutable trade records produced by the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::classify_asset;
use crate::types::{AssetType, TradeAction};

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A held quantity of one symbol with its cost basis and price high-water
/// mark. Owned by exactly one ledger; one position per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredPosition")]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    /// Volume-weighted average cost.
    pub entry_price: Decimal,
    /// First open, or the last re-average.
    pub entry_date: DateTime<Utc>,
    pub asset_type: AssetType,
    pub current_price: Decimal,
    pub high_since_entry: Decimal,
}

/// On-disk shape. Snapshots written before positions carried an asset
/// class get one inferred from the symbol.
#[derive(Deserialize)]
struct StoredPosition {
    symbol: String,
    quantity: Decimal,
    entry_price: Decimal,
    entry_date: DateTime<Utc>,
    #[serde(default)]
    asset_type: Option<AssetType>,
    current_price: Decimal,
    high_since_entry: Decimal,
}

impl From<StoredPosition> for Position {
    fn from(p: StoredPosition) -> Self {
        let asset_type = p.asset_type.unwrap_or_else(|| classify_asset(&p.symbol));
        Self {
            symbol: p.symbol,
            quantity: p.quantity,
            entry_price: p.entry_price,
            entry_date: p.entry_date,
            asset_type,
            current_price: p.current_price,
            high_since_entry: p.high_since_entry,
        }
    }
}

impl Position {
    /// Open a fresh position marked at its entry price.
    pub fn open(
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        asset_type: AssetType,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            entry_price: price,
            entry_date: at,
            asset_type,
            current_price: price,
            high_since_entry: price,
        }
    }

    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.entry_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.market_value() - self.cost_basis()
    }

    /// Unrealized P&L as a percentage of cost basis (0 when the basis is 0).
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        let basis = self.cost_basis();
        if basis.is_zero() {
            Decimal::ZERO
        } else {
            self.unrealized_pnl() / basis * dec!(100)
        }
    }

    /// Mark the position at a new price, raising the high-water mark if needed.
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        if price > self.high_since_entry {
            self.high_since_entry = price;
        }
    }

    /// Add to the position at `price`, re-averaging the entry cost.
    pub fn average_in(&mut self, quantity: Decimal, price: Decimal, at: DateTime<Utc>) {
        let total_qty = self.quantity + quantity;
        self.entry_price = (self.quantity * self.entry_price + quantity * price) / total_qty;
        self.quantity = total_qty;
        self.current_price = price;
        self.high_since_entry = price;
        self.entry_date = at;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pnl = self.unrealized_pnl();
        let pnl_sign = if pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "{} [{}] qty={:.4} entry=${:.2} now=${:.2} ({pnl_sign}{pnl:.2})",
            self.symbol, self.asset_type, self.quantity, self.entry_price, self.current_price,
        )
    }
}

// ---------------------------------------------------------------------------
// Trade record
// ---------------------------------------------------------------------------

/// Immutable entry in the ledger's trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub action: TradeAction,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    /// quantity × price
    pub total: Decimal,
    #[serde(default)]
    pub asset_type: AssetType,
    /// Provenance of the decision.
    pub reason: String,
    pub cash_after: Decimal,
    /// Realized P&L (SELL only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl_pct: Option<Decimal>,
}

impl TradeRecord {
    pub fn is_sell(&self) -> bool {
        self.action == TradeAction::Sell
    }

    /// A closed trade counts as a win only with strictly positive P&L.
    pub fn is_win(&self) -> bool {
        self.is_sell() && self.pnl.is_some_and(|p| p > Decimal::ZERO)
    }
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.4} @ ${:.2} (${:.2})",
            self.action, self.symbol, self.quantity, self.price, self.total,
        )?;
        if let Some(pnl) = self.pnl {
            write!(f, " PnL ${pnl:.2}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
