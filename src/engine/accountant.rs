//! Accountant: per-cycle reconciliation and reporting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use tracing::info;

use super::executor::ExecutionReport;
use super::scanner::ScanOutcome;
use super::CycleScope;
use crate::portfolio::Ledger;

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one refresh → scan → execute cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub scope: CycleScope,
    pub scan_only: bool,
    pub prices_updated: usize,
    pub positions_checked: usize,
    pub symbols_scanned: usize,
    pub exits_found: usize,
    pub buy_candidates: usize,
    pub sells_executed: usize,
    pub buys_executed: usize,
    pub orders_skipped: usize,
    pub orders_rejected: usize,
    pub scan_errors: usize,
    pub value_before: Decimal,
    pub value_after: Decimal,
    pub cash_after: Decimal,
    pub num_positions: usize,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    pub fn trades_executed(&self) -> usize {
        self.sells_executed + self.buys_executed
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle #{} [{}] exits={} buys={} trades={} value=${:.2} cash=${:.2} positions={}",
            self.cycle_number,
            self.scope,
            self.exits_found,
            self.buy_candidates,
            self.trades_executed(),
            self.value_after,
            self.cash_after,
            self.num_positions,
        )
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Reconcile a cycle against the ledger's post-cycle state.
    /// `execution` is `None` for scan-only cycles.
    pub fn reconcile(
        ledger: &Ledger,
        cycle_number: u64,
        scope: CycleScope,
        value_before: Decimal,
        prices_updated: usize,
        scan: &ScanOutcome,
        execution: Option<&ExecutionReport>,
    ) -> CycleReport {
        let report = CycleReport {
            cycle_number,
            scope,
            scan_only: execution.is_none(),
            prices_updated,
            positions_checked: scan.positions_checked,
            symbols_scanned: scan.symbols_scanned,
            exits_found: scan.exits.len(),
            buy_candidates: scan.buys.len(),
            sells_executed: execution.map_or(0, ExecutionReport::sells),
            buys_executed: execution.map_or(0, ExecutionReport::buys),
            orders_skipped: execution.map_or(0, |e| e.skipped.len()),
            orders_rejected: execution.map_or(0, |e| e.rejected.len()),
            scan_errors: scan.errors,
            value_before,
            value_after: ledger.total_value(),
            cash_after: ledger.cash(),
            num_positions: ledger.num_positions(),
            timestamp: Utc::now(),
        };

        info!(
            cycle = report.cycle_number,
            scope = %report.scope,
            trades = report.trades_executed(),
            value = format!("${:.2}", report.value_after),
            change = format!("${:.2}", report.value_after - report.value_before),
            return_pct = format!("{:.2}%", ledger.total_return_pct()),
            "Cycle reconciled"
        );

        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
