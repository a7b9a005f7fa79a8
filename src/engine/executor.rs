//! Trade executor (cycle steps 4–5).
//!
//! Applies a scan's signals to the ledger: every SELL on a held symbol
//! first, so sizing sees the post-exit cash balance, then ranked BUYs
//! until the position cap is reached.

use rust_decimal::Decimal;
use std::fmt;
use tracing::{info, warn};

use crate::portfolio::{Ledger, TradeReceipt, TradeRejection};
use crate::strategy::sizing::PositionSizer;
use crate::types::{Signal, TradeAction};

/// How many signal reasons are kept on a trade record.
const REASONS_ON_RECORD: usize = 3;

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub executed: Vec<TradeReceipt>,
    pub skipped: Vec<SkippedOrder>,
    pub rejected: Vec<RejectedOrder>,
}

impl ExecutionReport {
    pub fn sells(&self) -> usize {
        self.executed.iter().filter(|r| r.record.is_sell()).count()
    }

    pub fn buys(&self) -> usize {
        self.executed
            .iter()
            .filter(|r| r.record.action == TradeAction::Buy)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MaxPositions,
    TooSmall,
    NoPrice,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MaxPositions => write!(f, "max positions reached"),
            SkipReason::TooSmall => write!(f, "insufficient funds or position too small"),
            SkipReason::NoPrice => write!(f, "no price"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedOrder {
    pub symbol: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct RejectedOrder {
    pub symbol: String,
    pub rejection: TradeRejection,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    sizer: PositionSizer,
    max_positions: usize,
}

impl Executor {
    pub fn new(sizer: PositionSizer, max_positions: usize) -> Self {
        Self {
            sizer,
            max_positions,
        }
    }

    /// Execute `sells` then `buys` (already ranked) against the ledger.
    pub fn execute(&self, ledger: &mut Ledger, sells: &[Signal], buys: &[Signal]) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for signal in sells {
            if !ledger.has_position(&signal.symbol) {
                continue;
            }
            let reason = signal.reason_summary(REASONS_ON_RECORD);
            match ledger.sell(&signal.symbol, None, signal.price, &reason) {
                Ok(receipt) => {
                    info!(symbol = %signal.symbol, "EXECUTED: {}", receipt.message);
                    report.executed.push(receipt);
                }
                Err(rejection) => {
                    warn!(symbol = %signal.symbol, reason = %rejection, "Sell rejected");
                    report.rejected.push(RejectedOrder {
                        symbol: signal.symbol.clone(),
                        rejection,
                    });
                }
            }
        }

        for signal in buys {
            if ledger.num_positions() >= self.max_positions {
                info!(symbol = %signal.symbol, "SKIPPED: max positions reached");
                report.skipped.push(SkippedOrder {
                    symbol: signal.symbol.clone(),
                    reason: SkipReason::MaxPositions,
                });
                break;
            }

            let Some(price) = signal.price else {
                report.skipped.push(SkippedOrder {
                    symbol: signal.symbol.clone(),
                    reason: SkipReason::NoPrice,
                });
                continue;
            };

            let quantity = self.sizer.size(ledger.total_value(), ledger.cash(), price);
            if quantity <= Decimal::ZERO {
                info!(symbol = %signal.symbol, "SKIPPED: insufficient funds or position too small");
                report.skipped.push(SkippedOrder {
                    symbol: signal.symbol.clone(),
                    reason: SkipReason::TooSmall,
                });
                continue;
            }

            let reason = signal.reason_summary(REASONS_ON_RECORD);
            match ledger.buy(&signal.symbol, quantity, price, signal.asset_type, &reason) {
                Ok(receipt) => {
                    info!(symbol = %signal.symbol, "EXECUTED: {}", receipt.message);
                    report.executed.push(receipt);
                }
                Err(rejection) => {
                    warn!(symbol = %signal.symbol, reason = %rejection, "Buy rejected");
                    report.rejected.push(RejectedOrder {
                        symbol: signal.symbol.clone(),
                        rejection,
                    });
                }
            }
        }

        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
