//! Exit policy.
//!
//! Evaluated once per cycle for every open position. Rule-based exits
//! (stop loss, take profit, trailing stop) are checked first; only when
//! none fire does the caller re-run the signal engine for a technical
//! reversal. Any trigger produces a forced SELL at maximal strength.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::portfolio::Position;
use crate::types::{Signal, SignalAction};

/// Strength assigned to forced exits so they outrank any discretionary
/// signal.
pub const FORCED_EXIT_STRENGTH: f64 = 5.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Exit thresholds, as fractions (0.05 = 5%).
#[derive(Debug, Clone, PartialEq)]
pub struct ExitRules {
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_stop_pct: Decimal,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(0.05),
            take_profit_pct: dec!(0.10),
            trailing_stop_pct: dec!(0.03),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExitPolicy {
    rules: ExitRules,
    min_signal_strength: f64,
}

impl ExitPolicy {
    pub fn new(rules: ExitRules, min_signal_strength: f64) -> Self {
        Self {
            rules,
            min_signal_strength,
        }
    }

    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }

    /// Reasons from every rule-based exit that fires, in precedence order.
    /// Empty when the position should be held (subject to the technical
    /// check).
    pub fn rule_triggers(&self, pos: &Position) -> Vec<String> {
        let mut reasons = Vec::new();
        let pnl_pct = pos.unrealized_pnl_pct();

        if pnl_pct <= -self.rules.stop_loss_pct * dec!(100) {
            reasons.push(format!("Stop loss triggered ({pnl_pct:.1}% loss)"));
        }

        if pnl_pct >= self.rules.take_profit_pct * dec!(100) {
            reasons.push(format!("Take profit triggered ({pnl_pct:.1}% gain)"));
        }

        // Protects gains only: a retrace from a high while still underwater
        // is left to the stop loss.
        if pos.high_since_entry > Decimal::ZERO && pnl_pct > Decimal::ZERO {
            let from_high =
                (pos.current_price - pos.high_since_entry) / pos.high_since_entry * dec!(100);
            if from_high <= -self.rules.trailing_stop_pct * dec!(100) {
                reasons.push(format!("Trailing stop ({from_high:.1}% from high)"));
            }
        }

        reasons
    }

    /// Reasons to exit on a fresh signal for a held symbol: a SELL at or
    /// above the minimum strength.
    pub fn technical_reversal(&self, signal: &Signal) -> Option<Vec<String>> {
        (signal.action == SignalAction::Sell && signal.strength >= self.min_signal_strength)
            .then(|| signal.reasons.clone())
    }

    /// The forced SELL for `pos`, priced at its last mark.
    pub fn forced_exit(pos: &Position, reasons: Vec<String>) -> Signal {
        Signal::new(
            SignalAction::Sell,
            pos.symbol.clone(),
            FORCED_EXIT_STRENGTH,
            reasons,
            Some(pos.current_price),
            pos.asset_type,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
