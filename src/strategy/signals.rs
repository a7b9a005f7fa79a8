//! Indicator-fusion signal engine.
//!
//! Scores six independent indicator families on the latest two rows of a
//! symbol's indicator frame. Each family adds weight to at most one side
//! (buy or sell); the net of the two sides decides BUY / SELL / HOLD.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AssetType, IndicatorFrame, IndicatorRow, Signal, SignalAction};

/// Rows required before the engine will score a symbol.
pub const MIN_HISTORY: usize = 30;

const RSI_SOFT_OVERSOLD: f64 = 40.0;
const RSI_SOFT_OVERBOUGHT: f64 = 65.0;
const BB_AT_LOWER: f64 = 0.05;
const BB_NEAR_LOWER: f64 = 0.2;
const BB_NEAR_UPPER: f64 = 0.8;
const BB_AT_UPPER: f64 = 0.95;
/// Five-period rate of change (percent) that counts as strong momentum.
const ROC_THRESHOLD: f64 = 3.0;

const STRONG: f64 = 1.5;
const WEAK: f64 = 0.5;
const BAND_TOUCH: f64 = 1.0;
const CONFIRM: f64 = 0.75;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Per-instance thresholds. Different values over the same data are how
/// the fleet's personalities differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_spike_multiplier: f64,
    pub min_signal_strength: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_spike_multiplier: 1.5,
            min_signal_strength: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// One family's vote.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub side: Side,
    pub weight: f64,
    pub reason: String,
}

impl Contribution {
    fn buy(weight: f64, reason: impl Into<String>) -> Self {
        Self {
            side: Side::Buy,
            weight,
            reason: reason.into(),
        }
    }

    fn sell(weight: f64, reason: impl Into<String>) -> Self {
        Self {
            side: Side::Sell,
            weight,
            reason: reason.into(),
        }
    }
}

/// NaN and infinities count as missing.
fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    params: StrategyParams,
}

impl SignalEngine {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    /// Produce exactly one signal for `symbol`. A missing frame or one
    /// shorter than [`MIN_HISTORY`] yields a zero-strength HOLD.
    pub fn evaluate(
        &self,
        symbol: &str,
        asset_type: AssetType,
        frame: Option<&IndicatorFrame>,
    ) -> Signal {
        let Some((latest, prev)) = frame
            .filter(|f| f.len() >= MIN_HISTORY)
            .and_then(IndicatorFrame::last_two)
        else {
            return Signal::hold(symbol, asset_type, "Insufficient data");
        };

        let price = finite(Some(latest.close)).and_then(Decimal::from_f64);
        let contributions = self.score(latest, prev);
        let signal = self.decide(symbol, asset_type, price, contributions);

        debug!(
            symbol,
            action = %signal.action,
            strength = signal.strength,
            "Symbol evaluated"
        );
        signal
    }

    /// Every family's contribution for the latest row, in evaluation order.
    pub fn score(&self, latest: &IndicatorRow, prev: &IndicatorRow) -> Vec<Contribution> {
        [
            self.oscillator(latest),
            Self::histogram(latest, prev),
            Self::band_position(latest),
            self.volume(latest, prev),
            Self::trend(latest, prev),
            Self::momentum(latest),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn decide(
        &self,
        symbol: &str,
        asset_type: AssetType,
        price: Option<Decimal>,
        contributions: Vec<Contribution>,
    ) -> Signal {
        let mut buy_strength = 0.0;
        let mut sell_strength = 0.0;
        let mut buy_reasons = Vec::new();
        let mut sell_reasons = Vec::new();

        for c in contributions {
            match c.side {
                Side::Buy => {
                    buy_strength += c.weight;
                    buy_reasons.push(c.reason);
                }
                Side::Sell => {
                    sell_strength += c.weight;
                    sell_reasons.push(c.reason);
                }
            }
        }

        let net = buy_strength - sell_strength;
        let min = self.params.min_signal_strength;

        if net >= min {
            return Signal::new(SignalAction::Buy, symbol, buy_strength, buy_reasons, price, asset_type);
        }
        if net <= -min {
            return Signal::new(SignalAction::Sell, symbol, sell_strength, sell_reasons, price, asset_type);
        }

        let mut reasons = Vec::new();
        if !buy_reasons.is_empty() {
            reasons.push(format!("Bullish: {}", buy_reasons.join(", ")));
        }
        if !sell_reasons.is_empty() {
            reasons.push(format!("Bearish: {}", sell_reasons.join(", ")));
        }
        if reasons.is_empty() {
            reasons.push("No significant signals".to_string());
        }
        Signal::new(SignalAction::Hold, symbol, net.abs(), reasons, price, asset_type)
    }

    // -- families -----------------------------------------------------------

    fn oscillator(&self, row: &IndicatorRow) -> Option<Contribution> {
        let rsi = finite(row.rsi)?;
        if rsi < self.params.rsi_oversold {
            Some(Contribution::buy(STRONG, format!("RSI oversold ({rsi:.1})")))
        } else if rsi < RSI_SOFT_OVERSOLD {
            Some(Contribution::buy(WEAK, format!("RSI approaching oversold ({rsi:.1})")))
        } else if rsi > self.params.rsi_overbought {
            Some(Contribution::sell(STRONG, format!("RSI overbought ({rsi:.1})")))
        } else if rsi > RSI_SOFT_OVERBOUGHT {
            Some(Contribution::sell(WEAK, format!("RSI approaching overbought ({rsi:.1})")))
        } else {
            None
        }
    }

    fn histogram(latest: &IndicatorRow, prev: &IndicatorRow) -> Option<Contribution> {
        finite(latest.macd)?;
        finite(latest.macd_signal)?;
        let hist = finite(latest.macd_hist)?;
        let prev_hist = finite(prev.macd_hist)?;

        if hist > 0.0 {
            if prev_hist <= 0.0 {
                Some(Contribution::buy(STRONG, "MACD bullish crossover"))
            } else if hist > prev_hist {
                Some(Contribution::buy(WEAK, "MACD momentum increasing"))
            } else {
                None
            }
        } else if hist < 0.0 {
            if prev_hist >= 0.0 {
                Some(Contribution::sell(STRONG, "MACD bearish crossover"))
            } else if hist < prev_hist {
                Some(Contribution::sell(WEAK, "MACD momentum decreasing"))
            } else {
                None
            }
        } else {
            None
        }
    }

    fn band_position(row: &IndicatorRow) -> Option<Contribution> {
        let pct = finite(row.bb_pct)?;
        if pct < BB_AT_LOWER {
            Some(Contribution::buy(BAND_TOUCH, format!("Price at lower Bollinger Band ({pct:.2})")))
        } else if pct < BB_NEAR_LOWER {
            Some(Contribution::buy(WEAK, format!("Price near lower Bollinger Band ({pct:.2})")))
        } else if pct > BB_AT_UPPER {
            Some(Contribution::sell(BAND_TOUCH, format!("Price at upper Bollinger Band ({pct:.2})")))
        } else if pct > BB_NEAR_UPPER {
            Some(Contribution::sell(WEAK, format!("Price near upper Bollinger Band ({pct:.2})")))
        } else {
            None
        }
    }

    fn volume(&self, latest: &IndicatorRow, prev: &IndicatorRow) -> Option<Contribution> {
        let ratio = finite(latest.vol_ratio)?;
        if ratio <= self.params.volume_spike_multiplier {
            return None;
        }
        let prev_close = finite(Some(prev.close)).filter(|c| *c > 0.0)?;
        let change = (latest.close - prev_close) / prev_close;
        if change > 0.0 {
            Some(Contribution::buy(CONFIRM, format!("Volume spike ({ratio:.1}x avg) on up move")))
        } else {
            Some(Contribution::sell(CONFIRM, format!("Volume spike ({ratio:.1}x avg) on down move")))
        }
    }

    /// A fresh EMA9/SMA20 cross outranks the slower MA alignment when the
    /// two disagree.
    fn trend(latest: &IndicatorRow, prev: &IndicatorRow) -> Option<Contribution> {
        let price = latest.close;
        let sma10 = finite(latest.sma_10)?;
        let sma20 = finite(latest.sma_20)?;
        let ema9 = finite(latest.ema_9)?;

        let crossover = match (finite(prev.ema_9), finite(prev.sma_20)) {
            (Some(prev_ema9), Some(prev_sma20)) => {
                if ema9 > sma20 && prev_ema9 <= prev_sma20 {
                    Some(Contribution::buy(CONFIRM, "EMA9 crossed above SMA20"))
                } else if ema9 < sma20 && prev_ema9 >= prev_sma20 {
                    Some(Contribution::sell(CONFIRM, "EMA9 crossed below SMA20"))
                } else {
                    None
                }
            }
            _ => None,
        };

        let alignment = if price > sma10 && sma10 > sma20 {
            Some(Contribution::buy(WEAK, "Price above rising MAs (bullish trend)"))
        } else if price < sma10 && sma10 < sma20 {
            Some(Contribution::sell(WEAK, "Price below falling MAs (bearish trend)"))
        } else {
            None
        };

        match (alignment, crossover) {
            (Some(a), Some(c)) if a.side == c.side => Some(Contribution {
                side: a.side,
                weight: a.weight + c.weight,
                reason: format!("{}, {}", a.reason, c.reason),
            }),
            (_, Some(c)) => Some(c),
            (a, None) => a,
        }
    }

    fn momentum(row: &IndicatorRow) -> Option<Contribution> {
        let roc5 = finite(row.roc_5)?;
        let roc10 = finite(row.roc_10)?;
        if roc5 > ROC_THRESHOLD && roc10 > 0.0 {
            Some(Contribution::buy(WEAK, format!("Strong short-term momentum (+{roc5:.1}% in 5 bars)")))
        } else if roc5 < -ROC_THRESHOLD && roc10 < 0.0 {
            Some(Contribution::sell(WEAK, format!("Negative momentum ({roc5:.1}% in 5 bars)")))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
