//! Persistence layer.
//!
//! Each ledger owns one data directory holding the full portfolio snapshot
//! (overwritten on every mutation), the append-only equity history used for
//! charting, and a capped per-cycle session log. There is no lock file;
//! concurrent writers to the same directory would race.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::portfolio::PortfolioState;
use crate::types::TradingError;

const PORTFOLIO_FILE: &str = "portfolio.json";
const HISTORY_FILE: &str = "value_history.json";
const SESSION_FILE: &str = "session_log.json";

/// Session log entries kept on disk; older ones are dropped.
pub const SESSION_LOG_CAP: usize = 500;

/// Minimum spacing between equity snapshots when the value hasn't moved.
const SNAPSHOT_INTERVAL_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Equity snapshot
// ---------------------------------------------------------------------------

/// One point of the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_value: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub num_positions: usize,
}

impl EquitySnapshot {
    /// Whether `self` is worth appending after `last`: at least an hour
    /// later, or the total value moved by one unit or more.
    pub fn is_due_after(&self, last: &EquitySnapshot) -> bool {
        let elapsed = self.timestamp - last.timestamp;
        elapsed >= Duration::seconds(SNAPSHOT_INTERVAL_SECS)
            || (self.total_value - last.total_value).abs() >= Decimal::ONE
    }
}

// ---------------------------------------------------------------------------
// Session log
// ---------------------------------------------------------------------------

/// Which kind of scheduled cycle produced a session entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Market,
    CryptoOnly,
}

/// One line of the session log: when a cycle ran and what it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub timestamp: DateTime<Utc>,
    pub mode: SessionMode,
    pub trades_executed: usize,
    pub portfolio_value: Decimal,
}

// ---------------------------------------------------------------------------
// Snapshot store
// ---------------------------------------------------------------------------

/// File-backed storage namespace for one ledger.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn portfolio_path(&self) -> PathBuf {
        self.dir.join(PORTFOLIO_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create data dir {}", self.dir.display()))
    }

    /// Overwrite the portfolio snapshot.
    pub fn save_state(&self, state: &PortfolioState) -> Result<()> {
        self.ensure_dir()?;
        let path = self.portfolio_path();
        let json = serde_json::to_string_pretty(state).context("Failed to serialise portfolio")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write portfolio to {}", path.display()))?;

        debug!(path = %path.display(), cash = %state.cash, positions = state.positions.len(), "Portfolio saved");
        Ok(())
    }

    /// Load the portfolio snapshot. `Ok(None)` when it doesn't exist; an
    /// error when it exists but can't be read or parsed.
    pub fn load_state(&self) -> Result<Option<PortfolioState>> {
        let path = self.portfolio_path();
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read portfolio from {}", path.display()))?;
        let state: PortfolioState = serde_json::from_str(&json).map_err(|e| {
            TradingError::Storage(format!("corrupt portfolio snapshot {}: {e}", path.display()))
        })?;

        Ok(Some(state))
    }

    /// The full equity history. A missing or unreadable file reads as empty.
    pub fn load_history(&self) -> Vec<EquitySnapshot> {
        let path = self.history_path();
        let Ok(json) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        match serde_json::from_str(&json) {
            Ok(history) => history,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Equity history unreadable, starting a new one");
                Vec::new()
            }
        }
    }

    /// Append `snapshot` to the equity history if it is due. Returns whether
    /// it was written.
    pub fn record_equity(&self, snapshot: &EquitySnapshot) -> Result<bool> {
        let mut history = self.load_history();
        if let Some(last) = history.last() {
            if !snapshot.is_due_after(last) {
                return Ok(false);
            }
        }
        history.push(snapshot.clone());

        self.ensure_dir()?;
        let path = self.history_path();
        let json = serde_json::to_string_pretty(&history).context("Failed to serialise equity history")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write equity history to {}", path.display()))?;

        debug!(total_value = %snapshot.total_value, points = history.len(), "Equity snapshot recorded");
        Ok(true)
    }

    /// The session log, oldest first. A missing or unreadable file reads as
    /// empty.
    pub fn load_session_log(&self) -> Vec<SessionEntry> {
        let path = self.session_path();
        let Ok(json) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        match serde_json::from_str(&json) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Session log unreadable, starting a new one");
                Vec::new()
            }
        }
    }

    /// Append `entry`, keeping only the newest [`SESSION_LOG_CAP`] entries.
    /// Returns the number of entries on disk afterwards.
    pub fn append_session(&self, entry: &SessionEntry) -> Result<usize> {
        let mut log = self.load_session_log();
        log.push(entry.clone());
        if log.len() > SESSION_LOG_CAP {
            log.drain(..log.len() - SESSION_LOG_CAP);
        }

        self.ensure_dir()?;
        let path = self.session_path();
        let json = serde_json::to_string_pretty(&log).context("Failed to serialise session log")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write session log to {}", path.display()))?;
        Ok(log.len())
    }

    /// Delete the snapshot and equity history (used by `reset`). The session
    /// log is a record of runs and survives.
    pub fn reset(&self) -> Result<()> {
        for path in [self.portfolio_path(), self.history_path()] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
            }
        }
        info!(dir = %self.dir.display(), "Ledger storage reset");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::Ledger;
    use crate::types::AssetType;
    use rust_decimal_macros::dec;

    fn temp_store() -> SnapshotStore {
        let mut p = std::env::temp_dir();
        p.push(format!("paperbot_test_{}", uuid::Uuid::new_v4()));
        SnapshotStore::new(p)
    }

    fn snapshot(at: DateTime<Utc>, value: Decimal) -> EquitySnapshot {
        EquitySnapshot {
            timestamp: at,
            total_value: value,
            cash: value,
            positions_value: Decimal::ZERO,
            num_positions: 0,
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = temp_store();
        let state = PortfolioState::new(dec!(10000));
        store.save_state(&state).unwrap();

        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded, state);

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_load_nonexistent() {
        let store = temp_store();
        assert!(store.load_state().unwrap().is_none());
        assert!(store.load_history().is_empty());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let store = temp_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.portfolio_path(), "{ not json").unwrap();
        assert!(store.load_state().is_err());

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_ledger_round_trip() {
        let store = temp_store();
        let mut ledger = Ledger::open(store.clone(), dec!(10000));
        ledger.buy("AAPL", dec!(10), dec!(187.25), AssetType::Stock, "entry").unwrap();
        ledger.buy("BTC-USD", dec!(0.0213), dec!(70412.5), AssetType::Crypto, "entry").unwrap();
        ledger.sell("AAPL", Some(dec!(4)), Some(dec!(190.1)), "trim").unwrap();
        let mut marks = std::collections::HashMap::new();
        marks.insert("BTC-USD".to_string(), Some(dec!(71000)));
        ledger.update_prices(&marks);
        ledger.save().unwrap();

        let reloaded = Ledger::open(store.clone(), dec!(99999));
        assert_eq!(reloaded.cash(), ledger.cash());
        assert_eq!(reloaded.positions(), ledger.positions());
        assert_eq!(reloaded.trade_history(), ledger.trade_history());
        assert_eq!(reloaded.starting_cash(), dec!(10000));

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_corrupt_snapshot_self_heals() {
        let store = temp_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.portfolio_path(), "garbage").unwrap();

        let ledger = Ledger::open(store.clone(), dec!(5000));
        assert_eq!(ledger.cash(), dec!(5000));
        assert!(ledger.positions().is_empty());

        // The fresh ledger replaced the corrupt file.
        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.cash, dec!(5000));

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_equity_throttle() {
        let store = temp_store();
        let t0 = Utc::now();

        assert!(store.record_equity(&snapshot(t0, dec!(10000))).unwrap());
        // Same value, ten minutes later: skipped.
        assert!(!store.record_equity(&snapshot(t0 + Duration::minutes(10), dec!(10000.5))).unwrap());
        // Moved by a full unit.
        assert!(store.record_equity(&snapshot(t0 + Duration::minutes(20), dec!(10001))).unwrap());
        // An hour after the last point.
        assert!(store.record_equity(&snapshot(t0 + Duration::minutes(80), dec!(10001))).unwrap());

        assert_eq!(store.load_history().len(), 3);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    fn session(at: DateTime<Utc>, trades: usize) -> SessionEntry {
        SessionEntry {
            timestamp: at,
            mode: SessionMode::Market,
            trades_executed: trades,
            portfolio_value: dec!(10000),
        }
    }

    #[test]
    fn test_session_log_appends() {
        let store = temp_store();
        let t0 = Utc::now();
        assert_eq!(store.append_session(&session(t0, 2)).unwrap(), 1);
        let mut crypto = session(t0 + Duration::minutes(30), 0);
        crypto.mode = SessionMode::CryptoOnly;
        assert_eq!(store.append_session(&crypto).unwrap(), 2);

        let log = store.load_session_log();
        assert_eq!(log[0].trades_executed, 2);
        assert_eq!(log[1].mode, SessionMode::CryptoOnly);

        let raw = std::fs::read_to_string(store.session_path()).unwrap();
        assert!(raw.contains("\"crypto_only\""));
        assert!(raw.contains("\"market\""));
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_session_log_keeps_newest_entries() {
        let store = temp_store();
        let t0 = Utc::now();
        let full: Vec<SessionEntry> = (0..SESSION_LOG_CAP).map(|i| session(t0, i)).collect();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.session_path(), serde_json::to_string(&full).unwrap()).unwrap();

        assert_eq!(store.append_session(&session(t0, 9000)).unwrap(), SESSION_LOG_CAP);
        assert_eq!(store.append_session(&session(t0, 9001)).unwrap(), SESSION_LOG_CAP);

        let log = store.load_session_log();
        assert_eq!(log.len(), SESSION_LOG_CAP);
        assert_eq!(log[0].trades_executed, 2);
        assert_eq!(log[SESSION_LOG_CAP - 1].trades_executed, 9001);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_reset_removes_files() {
        let store = temp_store();
        store.save_state(&PortfolioState::new(dec!(100))).unwrap();
        store.record_equity(&snapshot(Utc::now(), dec!(100))).unwrap();
        assert!(store.portfolio_path().exists());

        store.append_session(&session(Utc::now(), 1)).unwrap();

        store.reset().unwrap();
        assert!(!store.portfolio_path().exists());
        assert!(!store.history_path().exists());
        assert_eq!(store.load_session_log().len(), 1);

        // Resetting an empty directory is fine.
        assert!(store.reset().is_ok());
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
