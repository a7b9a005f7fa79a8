//! Exit evaluation and watchlist scan (cycle steps 1–3).
//!
//! Held positions are checked against the exit policy first; the
//! watchlist is then scanned for new entries, skipping held symbols, and
//! BUY candidates are ranked by strength. Nothing here mutates the ledger.

use std::cmp::Ordering;
use tracing::{debug, info, warn};

use super::CycleScope;
use crate::data::MarketDataProvider;
use crate::portfolio::{Ledger, Position};
use crate::strategy::risk::ExitPolicy;
use crate::strategy::signals::SignalEngine;
use crate::types::{Signal, SignalAction, WatchItem};

// ---------------------------------------------------------------------------
// Scan outcome
// ---------------------------------------------------------------------------

/// Everything one scan produced.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Forced SELLs for held positions.
    pub exits: Vec<Signal>,
    /// BUY candidates, strongest first (ties keep scan order).
    pub buys: Vec<Signal>,
    /// Every signal produced this scan: exits first, then watchlist results.
    pub all: Vec<Signal>,
    pub positions_checked: usize,
    pub symbols_scanned: usize,
    /// Symbols whose data lookup failed and produced no signal.
    pub errors: usize,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    engine: SignalEngine,
    policy: ExitPolicy,
    watchlist: Vec<WatchItem>,
    max_positions: usize,
}

impl Scanner {
    pub fn new(
        engine: SignalEngine,
        policy: ExitPolicy,
        watchlist: Vec<WatchItem>,
        max_positions: usize,
    ) -> Self {
        Self {
            engine,
            policy,
            watchlist,
            max_positions,
        }
    }

    pub fn watchlist(&self) -> &[WatchItem] {
        &self.watchlist
    }

    /// Run steps 1–3 against the ledger's current state.
    pub async fn scan(
        &self,
        ledger: &Ledger,
        provider: &dyn MarketDataProvider,
        scope: CycleScope,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        // 1. Exit policy over held positions.
        for pos in ledger.positions().values() {
            if !scope.includes(pos.asset_type) {
                continue;
            }
            outcome.positions_checked += 1;
            if let Some(exit) = self.check_exit(pos, provider, &mut outcome.errors).await {
                info!(symbol = %exit.symbol, reasons = %exit.reasons.join(", "), "Exit triggered");
                outcome.exits.push(exit);
            }
        }
        outcome.all.extend(outcome.exits.iter().cloned());

        // 2. Watchlist scan for entries.
        for item in &self.watchlist {
            if !scope.includes(item.asset_type) || ledger.has_position(&item.symbol) {
                continue;
            }
            if ledger.num_positions() >= self.max_positions {
                debug!(max_positions = self.max_positions, "Position cap reached, scan stopped");
                break;
            }

            outcome.symbols_scanned += 1;
            let frame = match provider.get_technical_data(&item.symbol).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(symbol = %item.symbol, error = %e, "Technical data unavailable, skipping");
                    outcome.errors += 1;
                    continue;
                }
            };

            let signal = self.engine.evaluate(&item.symbol, item.asset_type, frame.as_ref());
            match signal.action {
                SignalAction::Buy => {
                    info!(symbol = %signal.symbol, strength = signal.strength, reasons = %signal.reason_summary(2), "BUY candidate");
                    outcome.buys.push(signal.clone());
                }
                SignalAction::Sell => {
                    debug!(symbol = %signal.symbol, strength = signal.strength, "SELL signal on unheld symbol");
                }
                SignalAction::Hold => {
                    debug!(symbol = %signal.symbol, net = signal.strength, "HOLD");
                }
            }
            outcome.all.push(signal);
        }

        // 3. Rank.
        rank(&mut outcome.buys);

        info!(
            positions = outcome.positions_checked,
            scanned = outcome.symbols_scanned,
            exits = outcome.exits.len(),
            buys = outcome.buys.len(),
            errors = outcome.errors,
            scope = %scope,
            "Scan complete"
        );
        outcome
    }

    /// Rule-based exits first; the signal engine only runs when none fire.
    async fn check_exit(
        &self,
        pos: &Position,
        provider: &dyn MarketDataProvider,
        errors: &mut usize,
    ) -> Option<Signal> {
        let mut reasons = self.policy.rule_triggers(pos);

        if reasons.is_empty() {
            let frame = match provider.get_technical_data(&pos.symbol).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(symbol = %pos.symbol, error = %e, "Technical data unavailable for held position");
                    *errors += 1;
                    return None;
                }
            };
            let signal = self.engine.evaluate(&pos.symbol, pos.asset_type, frame.as_ref());
            reasons = self.policy.technical_reversal(&signal)?;
        }

        Some(ExitPolicy::forced_exit(pos, reasons))
    }
}

/// Strongest first; the sort is stable so equal strengths keep scan order.
pub fn rank(buys: &mut [Signal]) {
    buys.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(Ordering::Equal));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
