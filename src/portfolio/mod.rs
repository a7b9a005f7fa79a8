//! Portfolio ledger: the root aggregate for one strategy instance.
//!
//! Owns cash, open positions and the append-only trade history. The only
//! mutations are `buy`, `sell` and `update_prices`; the first two persist a
//! full snapshot immediately, price marks are saved explicitly by the caller.

pub mod position;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::storage::{EquitySnapshot, SnapshotStore};
use crate::types::{AssetType, TradeAction};
pub use position::{Position, TradeRecord};

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

/// Full ledger state, written verbatim as the portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub starting_cash: Decimal,
    pub cash: Decimal,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub trade_history: Vec<TradeRecord>,
}

impl PortfolioState {
    pub fn new(starting_cash: Decimal) -> Self {
        let now = Utc::now();
        Self {
            starting_cash,
            cash: starting_cash,
            created_at: now,
            last_updated: now,
            positions: BTreeMap::new(),
            trade_history: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade outcomes
// ---------------------------------------------------------------------------

/// Successful paper fill.
#[derive(Debug, Clone)]
pub struct TradeReceipt {
    pub record: TradeRecord,
    pub message: String,
}

/// Expected business-rule rejections. Nothing in the ledger changes when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TradeRejection {
    #[error("Insufficient cash. Need ${needed:.2}, have ${available:.2}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("No position in {0}")]
    NoPosition(String),

    #[error("Only have {held} units of {symbol}, cannot sell {requested}")]
    InsufficientQuantity {
        symbol: String,
        held: Decimal,
        requested: Decimal,
    },

    #[error("Invalid order for {symbol}: {reason}")]
    InvalidOrder { symbol: String, reason: String },
}

// ---------------------------------------------------------------------------
// Summary projection
// ---------------------------------------------------------------------------

/// Read-only view for reporting layers.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub total_pnl: Decimal,
    pub total_return_pct: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub num_positions: usize,
    pub num_trades: usize,
    /// Percentage of closed (SELL) trades with positive P&L.
    pub win_rate: f64,
    pub positions: Vec<PositionSummary>,
    pub starting_cash: Decimal,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub asset_type: AssetType,
    pub entry_date: DateTime<Utc>,
}

impl From<&Position> for PositionSummary {
    fn from(p: &Position) -> Self {
        Self {
            symbol: p.symbol.clone(),
            quantity: p.quantity,
            entry_price: p.entry_price,
            current_price: p.current_price,
            market_value: p.market_value(),
            cost_basis: p.cost_basis(),
            unrealized_pnl: p.unrealized_pnl(),
            unrealized_pnl_pct: p.unrealized_pnl_pct(),
            asset_type: p.asset_type,
            entry_date: p.entry_date,
        }
    }
}

impl fmt::Display for PortfolioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.total_pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "value=${:.2} ({sign}{:.2}%) | cash=${:.2} | positions={} | trades={} | win_rate={:.1}%",
            self.total_value,
            self.total_return_pct,
            self.cash,
            self.num_positions,
            self.num_trades,
            self.win_rate,
        )
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Paper-trading ledger with transactional buy/sell semantics.
pub struct Ledger {
    state: PortfolioState,
    store: Option<SnapshotStore>,
}

impl Ledger {
    /// An unpersisted ledger (scan-only tooling and tests).
    pub fn in_memory(starting_cash: Decimal) -> Self {
        Self {
            state: PortfolioState::new(starting_cash),
            store: None,
        }
    }

    /// Load the last snapshot from `store`, or start fresh at
    /// `starting_cash` when it is missing or unreadable. A fresh ledger is
    /// persisted immediately.
    pub fn open(store: SnapshotStore, starting_cash: Decimal) -> Self {
        match store.load_state() {
            Ok(Some(state)) => {
                info!(
                    dir = %store.dir().display(),
                    cash = %state.cash,
                    positions = state.positions.len(),
                    trades = state.trade_history.len(),
                    "Ledger restored from snapshot"
                );
                Self {
                    state,
                    store: Some(store),
                }
            }
            Ok(None) => {
                info!(dir = %store.dir().display(), %starting_cash, "No snapshot found, starting fresh ledger");
                Self::fresh(store, starting_cash)
            }
            Err(e) => {
                warn!(
                    dir = %store.dir().display(),
                    error = %e,
                    "Snapshot unreadable, discarding and starting fresh ledger"
                );
                Self::fresh(store, starting_cash)
            }
        }
    }

    fn fresh(store: SnapshotStore, starting_cash: Decimal) -> Self {
        let ledger = Self {
            state: PortfolioState::new(starting_cash),
            store: Some(store),
        };
        ledger.persist();
        ledger
    }

    // -- accessors ----------------------------------------------------------

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn cash(&self) -> Decimal {
        self.state.cash
    }

    pub fn starting_cash(&self) -> Decimal {
        self.state.starting_cash
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.state.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.state.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.state.positions.contains_key(symbol)
    }

    pub fn num_positions(&self) -> usize {
        self.state.positions.len()
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.state.trade_history
    }

    pub fn positions_value(&self) -> Decimal {
        self.state.positions.values().map(Position::market_value).sum()
    }

    /// Cash plus the market value of every open position.
    pub fn total_value(&self) -> Decimal {
        self.state.cash + self.positions_value()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.total_value() - self.state.starting_cash
    }

    pub fn total_return_pct(&self) -> Decimal {
        if self.state.starting_cash.is_zero() {
            Decimal::ZERO
        } else {
            self.total_pnl() / self.state.starting_cash * dec!(100)
        }
    }

    pub fn store(&self) -> Option<&SnapshotStore> {
        self.store.as_ref()
    }

    // -- mutations ----------------------------------------------------------

    /// Buy `quantity` units at `price`. Adds to an existing position by
    /// volume-weighted averaging.
    pub fn buy(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        asset_type: AssetType,
        reason: &str,
    ) -> Result<TradeReceipt, TradeRejection> {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(TradeRejection::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("quantity {quantity} and price {price} must be positive"),
            });
        }

        let Some(cost) = quantity.checked_mul(price) else {
            return Err(TradeRejection::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("notional of {quantity} @ {price} overflows"),
            });
        };
        if cost > self.state.cash {
            return Err(TradeRejection::InsufficientCash {
                needed: cost,
                available: self.state.cash,
            });
        }

        let now = Utc::now();
        self.state.cash -= cost;

        let asset_type = match self.state.positions.get_mut(symbol) {
            Some(existing) => {
                existing.average_in(quantity, price, now);
                existing.asset_type
            }
            None => {
                self.state.positions.insert(
                    symbol.to_string(),
                    Position::open(symbol, quantity, price, asset_type, now),
                );
                asset_type
            }
        };

        let record = TradeRecord {
            timestamp: now,
            action: TradeAction::Buy,
            symbol: symbol.to_string(),
            quantity,
            price,
            total: cost,
            asset_type,
            reason: reason.to_string(),
            cash_after: self.state.cash,
            pnl: None,
            pnl_pct: None,
        };
        self.state.trade_history.push(record.clone());
        self.state.last_updated = now;
        self.persist();

        let message = format!("Bought {quantity} {symbol} @ ${price:.2} (${cost:.2})");
        info!(symbol, %quantity, %price, cash = %self.state.cash, "Paper buy filled");
        Ok(TradeReceipt { record, message })
    }

    /// Sell `quantity` units (everything when `None`) at `price` (the last
    /// marked price when `None`).
    pub fn sell(
        &mut self,
        symbol: &str,
        quantity: Option<Decimal>,
        price: Option<Decimal>,
        reason: &str,
    ) -> Result<TradeReceipt, TradeRejection> {
        let pos = self
            .state
            .positions
            .get(symbol)
            .ok_or_else(|| TradeRejection::NoPosition(symbol.to_string()))?;

        let quantity = quantity.unwrap_or(pos.quantity);
        if quantity <= Decimal::ZERO {
            return Err(TradeRejection::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("quantity {quantity} must be positive"),
            });
        }
        if quantity > pos.quantity {
            return Err(TradeRejection::InsufficientQuantity {
                symbol: symbol.to_string(),
                held: pos.quantity,
                requested: quantity,
            });
        }

        let price = price.unwrap_or(pos.current_price);
        if price <= Decimal::ZERO {
            return Err(TradeRejection::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("price {price} must be positive"),
            });
        }

        let entry_price = pos.entry_price;
        let asset_type = pos.asset_type;
        let fully_closed = quantity >= pos.quantity;

        let Some((proceeds, cash_after)) = quantity
            .checked_mul(price)
            .and_then(|p| self.state.cash.checked_add(p).map(|c| (p, c)))
        else {
            return Err(TradeRejection::InvalidOrder {
                symbol: symbol.to_string(),
                reason: format!("proceeds of {quantity} @ {price} overflow"),
            });
        };
        let pnl = (price - entry_price) * quantity;
        let pnl_pct = if entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (price - entry_price) / entry_price * dec!(100)
        };

        let now = Utc::now();
        self.state.cash = cash_after;

        if fully_closed {
            self.state.positions.remove(symbol);
        } else if let Some(pos) = self.state.positions.get_mut(symbol) {
            pos.quantity -= quantity;
        }

        let record = TradeRecord {
            timestamp: now,
            action: TradeAction::Sell,
            symbol: symbol.to_string(),
            quantity,
            price,
            total: proceeds,
            asset_type,
            reason: reason.to_string(),
            cash_after: self.state.cash,
            pnl: Some(pnl),
            pnl_pct: Some(pnl_pct),
        };
        self.state.trade_history.push(record.clone());
        self.state.last_updated = now;
        self.persist();

        let message = format!(
            "Sold {quantity} {symbol} @ ${price:.2} (${proceeds:.2}, PnL: ${pnl:.2})"
        );
        info!(symbol, %quantity, %price, %pnl, closed = fully_closed, "Paper sell filled");
        Ok(TradeReceipt { record, message })
    }

    /// Mark held positions at the given prices. Symbols that are not held,
    /// missing prices and non-positive prices are ignored. Not persisted.
    pub fn update_prices(&mut self, prices: &HashMap<String, Option<Decimal>>) -> usize {
        let mut updated = 0;
        for (symbol, pos) in self.state.positions.iter_mut() {
            if let Some(Some(price)) = prices.get(symbol) {
                if *price > Decimal::ZERO {
                    pos.mark(*price);
                    updated += 1;
                }
            }
        }
        self.state.last_updated = Utc::now();
        debug!(updated, held = self.state.positions.len(), "Prices marked");
        updated
    }

    // -- persistence --------------------------------------------------------

    /// Write the full snapshot and, when due, an equity snapshot.
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save_state(&self.state)?;
        store.record_equity(&self.equity_snapshot(Utc::now()))?;
        Ok(())
    }

    /// Discard all state and history and start over at `starting_cash`.
    pub fn reset(&mut self, starting_cash: Decimal) -> anyhow::Result<()> {
        if let Some(store) = &self.store {
            store.reset()?;
        }
        self.state = PortfolioState::new(starting_cash);
        self.save()?;
        info!(%starting_cash, "Ledger reset");
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            error!(error = %e, "Failed to persist ledger snapshot");
        }
    }

    pub fn equity_snapshot(&self, at: DateTime<Utc>) -> EquitySnapshot {
        EquitySnapshot {
            timestamp: at,
            total_value: self.total_value(),
            cash: self.state.cash,
            positions_value: self.positions_value(),
            num_positions: self.num_positions(),
        }
    }

    // -- reporting ----------------------------------------------------------

    pub fn get_summary(&self) -> PortfolioSummary {
        let history = &self.state.trade_history;
        let realized_pnl: Decimal = history
            .iter()
            .filter(|t| t.is_sell())
            .filter_map(|t| t.pnl)
            .sum();
        let unrealized_pnl: Decimal = self
            .state
            .positions
            .values()
            .map(Position::unrealized_pnl)
            .sum();

        let closed = history.iter().filter(|t| t.is_sell()).count();
        let wins = history.iter().filter(|t| t.is_win()).count();
        let win_rate = if closed > 0 {
            wins as f64 / closed as f64 * 100.0
        } else {
            0.0
        };

        PortfolioSummary {
            total_value: self.total_value(),
            cash: self.state.cash,
            positions_value: self.positions_value(),
            total_pnl: self.total_pnl(),
            total_return_pct: self.total_return_pct(),
            realized_pnl,
            unrealized_pnl,
            num_positions: self.num_positions(),
            num_trades: history.len(),
            win_rate,
            positions: self.state.positions.values().map(PositionSummary::from).collect(),
            starting_cash: self.state.starting_cash,
            created_at: self.state.created_at,
            last_updated: self.state.last_updated,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
