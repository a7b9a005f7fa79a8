//! Shared types for the PAPERBOT agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that portfolio, strategy,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What the signal engine recommends for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Direction of an executed (paper) trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
        }
    }
}

/// Asset class of a watchlist entry or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    #[default]
    Stock,
    Etf,
    Crypto,
}

impl AssetType {
    pub fn is_crypto(&self) -> bool {
        matches!(self, AssetType::Crypto)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Stock => write!(f, "stock"),
            AssetType::Etf => write!(f, "etf"),
            AssetType::Crypto => write!(f, "crypto"),
        }
    }
}

// ---------------------------------------------------------------------------
// Watchlist
// ---------------------------------------------------------------------------

/// A symbol the strategy scans for entries, tagged with its asset class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchItem {
    pub symbol: String,
    pub asset_type: AssetType,
}

impl WatchItem {
    pub fn new(symbol: impl Into<String>, asset_type: AssetType) -> Self {
        Self {
            symbol: symbol.into(),
            asset_type,
        }
    }
}

// ---------------------------------------------------------------------------
// Indicator input
// ---------------------------------------------------------------------------

/// One time-indexed row of derived indicators for a symbol.
///
/// Every indicator is optional: warm-up periods and provider gaps leave
/// fields empty, and the signal engine skips any family whose inputs are
/// missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub volume: f64,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub bb_pct: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub vol_ratio: Option<f64>,
    pub sma_10: Option<f64>,
    pub sma_20: Option<f64>,
    pub ema_9: Option<f64>,
    pub roc_5: Option<f64>,
    pub roc_10: Option<f64>,
}

/// Ordered (oldest first) indicator history for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorFrame {
    pub symbol: String,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorFrame {
    pub fn new(symbol: impl Into<String>, rows: Vec<IndicatorRow>) -> Self {
        Self {
            symbol: symbol.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The most recent row and the one before it.
    pub fn last_two(&self) -> Option<(&IndicatorRow, &IndicatorRow)> {
        match self.rows.as_slice() {
            [.., prev, latest] => Some((latest, prev)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// The engine's per-symbol recommendation. Produced fresh every scan and
/// never persisted as an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub symbol: String,
    /// Accumulated indicator weight, typically 0–5.
    pub strength: f64,
    /// Contributing factors, in evaluation order.
    pub reasons: Vec<String>,
    /// Snapshot price at evaluation time.
    pub price: Option<Decimal>,
    pub asset_type: AssetType,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        action: SignalAction,
        symbol: impl Into<String>,
        strength: f64,
        reasons: Vec<String>,
        price: Option<Decimal>,
        asset_type: AssetType,
    ) -> Self {
        Self {
            action,
            symbol: symbol.into(),
            strength,
            reasons,
            price,
            asset_type,
            timestamp: Utc::now(),
        }
    }

    /// A zero-strength HOLD with a single explanatory reason.
    pub fn hold(symbol: impl Into<String>, asset_type: AssetType, reason: &str) -> Self {
        Self::new(
            SignalAction::Hold,
            symbol,
            0.0,
            vec![reason.to_string()],
            None,
            asset_type,
        )
    }

    /// Up to `n` reasons joined for a trade record.
    pub fn reason_summary(&self, n: usize) -> String {
        self.reasons
            .iter()
            .take(n)
            .cloned()
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let price = self
            .price
            .map(|p| format!("${p:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        write!(
            f,
            "{} {} [{}] strength={:.2} @ {} ({})",
            self.action,
            self.symbol,
            self.asset_type,
            self.strength,
            price,
            self.reasons.join(", "),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PAPERBOT.
#[derive(Debug, thiserror::Error)]
pub enum TradingError {
    #[error("Data provider error ({symbol}): {message}")]
    DataProvider { symbol: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
