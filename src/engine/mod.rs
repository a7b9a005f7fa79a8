//! Core engine: one trader instance and its orchestration cycle.
//!
//! A cycle is: mark held positions → save → exit policy → watchlist scan →
//! rank → sells → buys → reconcile. Cycles for one trader are strictly
//! serialised by `&mut self`.

pub mod accountant;
pub mod executor;
pub mod scanner;

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::data::MarketDataProvider;
use crate::portfolio::Ledger;
use crate::storage::{SessionEntry, SessionMode};
use crate::strategy::StrategyConfig;
use crate::types::{AssetType, Signal};
use accountant::{Accountant, CycleReport};
use executor::Executor;
use scanner::Scanner;

// ---------------------------------------------------------------------------
// Cycle scope
// ---------------------------------------------------------------------------

/// Which assets a cycle may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleScope {
    /// Whole watchlist and every held position.
    Full,
    /// Crypto watchlist entries and crypto holdings only (after hours).
    CryptoOnly,
}

impl CycleScope {
    pub fn includes(&self, asset_type: AssetType) -> bool {
        match self {
            CycleScope::Full => true,
            CycleScope::CryptoOnly => asset_type.is_crypto(),
        }
    }
}

impl From<CycleScope> for SessionMode {
    fn from(scope: CycleScope) -> Self {
        match scope {
            CycleScope::Full => SessionMode::Market,
            CycleScope::CryptoOnly => SessionMode::CryptoOnly,
        }
    }
}

impl fmt::Display for CycleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleScope::Full => write!(f, "full"),
            CycleScope::CryptoOnly => write!(f, "crypto-only"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trader
// ---------------------------------------------------------------------------

/// One strategy instance: its configuration, ledger and data source.
pub struct Trader {
    name: String,
    config: StrategyConfig,
    ledger: Ledger,
    provider: Arc<dyn MarketDataProvider>,
    scanner: Scanner,
    executor: Executor,
    scan_only: bool,
    last_signals: Vec<Signal>,
    cycle_count: u64,
}

impl Trader {
    pub fn new(
        name: impl Into<String>,
        config: StrategyConfig,
        ledger: Ledger,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Self {
        let scanner = Scanner::new(
            config.signal_engine(),
            config.exit_policy(),
            config.watch_items(),
            config.max_positions,
        );
        let executor = Executor::new(config.sizer(), config.max_positions);
        Self {
            name: name.into(),
            config,
            ledger,
            provider,
            scanner,
            executor,
            scan_only: false,
            last_signals: Vec::new(),
            cycle_count: 0,
        }
    }

    /// Dry-run mode: cycles stop after ranking and never trade.
    pub fn with_scan_only(mut self, scan_only: bool) -> Self {
        self.scan_only = scan_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Direct ledger access for tooling that trades outside a cycle.
    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// The last scan's signals, exits first.
    pub fn get_signals_summary(&self) -> &[Signal] {
        &self.last_signals
    }

    /// Mark held positions (within `scope`) at current prices. A failed
    /// lookup leaves marks unchanged.
    pub async fn refresh_prices(&mut self, scope: CycleScope) -> usize {
        let symbols: Vec<String> = self
            .ledger
            .positions()
            .values()
            .filter(|p| scope.includes(p.asset_type))
            .map(|p| p.symbol.clone())
            .collect();
        if symbols.is_empty() {
            return 0;
        }

        match self.provider.get_current_prices(&symbols).await {
            Ok(prices) => self.ledger.update_prices(&prices),
            Err(e) => {
                warn!(trader = %self.name, error = %e, "Price refresh failed, keeping last marks");
                0
            }
        }
    }

    /// One full orchestration cycle (or steps 1–3 only in scan-only mode).
    ///
    /// Fails only when the marked prices can't be persisted, in which case
    /// nothing is traded.
    pub async fn run_cycle(&mut self, scope: CycleScope) -> Result<CycleReport> {
        self.cycle_count += 1;
        info!(trader = %self.name, cycle = self.cycle_count, scope = %scope, "Starting cycle");

        let value_before = self.ledger.total_value();
        let prices_updated = self.refresh_prices(scope).await;
        self.ledger
            .save()
            .with_context(|| format!("{}: failed to persist marked prices", self.name))?;

        let outcome = self
            .scanner
            .scan(&self.ledger, self.provider.as_ref(), scope)
            .await;

        let execution = if self.scan_only {
            None
        } else {
            Some(self.executor.execute(&mut self.ledger, &outcome.exits, &outcome.buys))
        };

        let report = Accountant::reconcile(
            &self.ledger,
            self.cycle_count,
            scope,
            value_before,
            prices_updated,
            &outcome,
            execution.as_ref(),
        );
        self.last_signals = outcome.all;
        self.log_session(&report);
        Ok(report)
    }

    /// Mark held positions and save without scanning or trading.
    pub async fn update_prices_only(&mut self) -> Result<usize> {
        let updated = self.refresh_prices(CycleScope::Full).await;
        self.ledger
            .save()
            .with_context(|| format!("{}: failed to persist marked prices", self.name))?;
        info!(trader = %self.name, updated, "Prices refreshed");
        Ok(updated)
    }

    fn log_session(&self, report: &CycleReport) {
        let Some(store) = self.ledger.store() else {
            return;
        };
        let entry = SessionEntry {
            timestamp: report.timestamp,
            mode: report.scope.into(),
            trades_executed: report.trades_executed(),
            portfolio_value: report.value_after,
        };
        if let Err(e) = store.append_session(&entry) {
            warn!(trader = %self.name, error = %e, "Failed to append session log");
        }
    }

    /// Wipe the ledger back to the configured starting cash.
    pub fn reset(&mut self) -> Result<()> {
        self.last_signals.clear();
        self.ledger.reset(self.config.starting_cash)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockMarketDataProvider;
    use crate::strategy::Watchlist;
    use crate::types::{IndicatorFrame, IndicatorRow, SignalAction};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn make_config(stocks: &[&str], crypto: &[&str]) -> StrategyConfig {
        StrategyConfig {
            watchlist: Watchlist {
                stocks: stocks.iter().map(|s| s.to_string()).collect(),
                etfs: Vec::new(),
                crypto: crypto.iter().map(|s| s.to_string()).collect(),
            },
            ..StrategyConfig::default()
        }
    }

    /// 30 quiet rows with a bullish final pair: RSI oversold, MACD
    /// crossover and a lower-band touch.
    fn bullish_frame(symbol: &str, close: f64) -> IndicatorFrame {
        let mut rows = vec![IndicatorRow { close, volume: 1000.0, ..Default::default() }; 28];
        rows.push(IndicatorRow {
            close,
            volume: 1000.0,
            macd_hist: Some(-0.1),
            ..Default::default()
        });
        rows.push(IndicatorRow {
            close,
            volume: 1000.0,
            rsi: Some(25.0),
            macd: Some(0.4),
            macd_signal: Some(0.2),
            macd_hist: Some(0.2),
            bb_pct: Some(0.03),
            ..Default::default()
        });
        IndicatorFrame::new(symbol, rows)
    }

    fn quiet_frame(symbol: &str, close: f64) -> IndicatorFrame {
        IndicatorFrame::new(symbol, vec![IndicatorRow { close, volume: 1000.0, ..Default::default() }; 30])
    }

    fn prices(pairs: &[(&str, Decimal)]) -> HashMap<String, Option<Decimal>> {
        pairs.iter().map(|(s, p)| (s.to_string(), Some(*p))).collect()
    }

    #[tokio::test]
    async fn test_stop_loss_preempts_technical_check() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_current_prices()
            .returning(|_| Ok(prices(&[("NVDA", dec!(94))])));
        // The held symbol must not be re-analysed once a rule fired.
        mock.expect_get_technical_data()
            .withf(|s| s == "NVDA")
            .times(0);

        let mut ledger = Ledger::in_memory(dec!(10000));
        ledger.buy("NVDA", dec!(10), dec!(100), AssetType::Stock, "entry").unwrap();

        let mut trader = Trader::new("test", make_config(&[], &[]), ledger, Arc::new(mock));
        let report = trader.run_cycle(CycleScope::Full).await.unwrap();

        assert_eq!(report.exits_found, 1);
        assert_eq!(report.sells_executed, 1);
        assert!(!trader.ledger().has_position("NVDA"));
        let sell = trader.ledger().trade_history().last().unwrap();
        assert!(sell.reason.starts_with("Stop loss"));
        assert_eq!(sell.price, dec!(94));
        assert_eq!(sell.pnl, Some(dec!(-60)));
    }

    #[tokio::test]
    async fn test_full_cycle_buys_ranked_candidates() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_current_prices().returning(|_| Ok(HashMap::new()));
        mock.expect_get_technical_data().returning(|symbol| match symbol {
            "AAPL" => Ok(Some(bullish_frame("AAPL", 100.0))),
            "MSFT" => Ok(Some(quiet_frame("MSFT", 400.0))),
            _ => Ok(None),
        });

        let ledger = Ledger::in_memory(dec!(10000));
        let mut trader = Trader::new("test", make_config(&["AAPL", "MSFT", "ZZZ"], &[]), ledger, Arc::new(mock));
        let report = trader.run_cycle(CycleScope::Full).await.unwrap();

        assert_eq!(report.symbols_scanned, 3);
        assert_eq!(report.buy_candidates, 1);
        assert_eq!(report.buys_executed, 1);
        assert_eq!(trader.ledger().position("AAPL").unwrap().quantity, dec!(15));
        assert_eq!(trader.get_signals_summary().len(), 3);
        assert_eq!(trader.get_signals_summary()[0].action, SignalAction::Buy);
    }

    #[tokio::test]
    async fn test_scan_only_never_trades() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_current_prices().returning(|_| Ok(HashMap::new()));
        mock.expect_get_technical_data()
            .returning(|symbol| Ok(Some(bullish_frame(symbol, 50.0))));

        let ledger = Ledger::in_memory(dec!(10000));
        let mut trader = Trader::new("dry", make_config(&["AMD"], &[]), ledger, Arc::new(mock))
            .with_scan_only(true);
        let report = trader.run_cycle(CycleScope::Full).await.unwrap();

        assert!(report.scan_only);
        assert_eq!(report.buy_candidates, 1);
        assert_eq!(report.trades_executed(), 0);
        assert!(trader.ledger().trade_history().is_empty());
        assert_eq!(trader.get_signals_summary().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_errors_are_per_symbol() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_current_prices()
            .returning(|_| Err(anyhow::anyhow!("quote service down")));
        mock.expect_get_technical_data().returning(|symbol| match symbol {
            "BAD" => Err(anyhow::anyhow!("timeout")),
            other => Ok(Some(bullish_frame(other, 20.0))),
        });

        let ledger = Ledger::in_memory(dec!(10000));
        let mut trader = Trader::new("test", make_config(&["BAD", "GOOD"], &[]), ledger, Arc::new(mock));
        let report = trader.run_cycle(CycleScope::Full).await.unwrap();

        assert_eq!(report.scan_errors, 1);
        assert_eq!(report.buys_executed, 1);
        assert!(trader.ledger().has_position("GOOD"));
    }

    #[tokio::test]
    async fn test_crypto_only_scope() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_current_prices()
            .withf(|symbols: &[String]| symbols.iter().all(|s| s.ends_with("-USD")))
            .returning(|_| Ok(HashMap::new()));
        mock.expect_get_technical_data()
            .withf(|s| s == "BTC-USD" || s == "ETH-USD")
            .returning(|symbol| Ok(Some(quiet_frame(symbol, 1000.0))));

        let mut ledger = Ledger::in_memory(dec!(10000));
        ledger.buy("AAPL", dec!(1), dec!(100), AssetType::Stock, "").unwrap();
        ledger.buy("ETH-USD", dec!(0.1), dec!(1000), AssetType::Crypto, "").unwrap();

        let mut trader = Trader::new("test", make_config(&["MSFT"], &["BTC-USD"]), ledger, Arc::new(mock));
        let report = trader.run_cycle(CycleScope::CryptoOnly).await.unwrap();

        assert_eq!(report.positions_checked, 1);
        assert_eq!(report.symbols_scanned, 1);
        assert!(trader.ledger().has_position("AAPL"));
    }

    #[tokio::test]
    async fn test_cap_reached_skips_scan() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_current_prices().returning(|_| Ok(HashMap::new()));
        mock.expect_get_technical_data()
            .returning(|symbol| Ok(Some(quiet_frame(symbol, 10.0))));

        let mut ledger = Ledger::in_memory(dec!(10000));
        ledger.buy("AAPL", dec!(1), dec!(10), AssetType::Stock, "").unwrap();
        let config = StrategyConfig {
            max_positions: 1,
            ..make_config(&["MSFT", "TSLA"], &[])
        };
        let mut trader = Trader::new("test", config, ledger, Arc::new(mock));
        let report = trader.run_cycle(CycleScope::Full).await.unwrap();
        assert_eq!(report.symbols_scanned, 0);
    }

    #[tokio::test]
    async fn test_update_prices_only_marks_without_trading() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_get_current_prices()
            .returning(|_| Ok(prices(&[("NVDA", dec!(90))])));
        mock.expect_get_technical_data().times(0);

        let mut ledger = Ledger::in_memory(dec!(10000));
        ledger.buy("NVDA", dec!(10), dec!(100), AssetType::Stock, "entry").unwrap();

        let mut trader = Trader::new("test", make_config(&["AAPL"], &[]), ledger, Arc::new(mock));
        assert_eq!(trader.update_prices_only().await.unwrap(), 1);

        // Past the stop loss, but an update never exits.
        let pos = trader.ledger().position("NVDA").unwrap();
        assert_eq!(pos.current_price, dec!(90));
        assert_eq!(trader.ledger().trade_history().len(), 1);
        assert_eq!(trader.cycle_count(), 0);
    }

    #[test]
    fn test_scope_session_mode() {
        assert_eq!(SessionMode::from(CycleScope::Full), SessionMode::Market);
        assert_eq!(SessionMode::from(CycleScope::CryptoOnly), SessionMode::CryptoOnly);
    }

    #[test]
    fn test_scope_includes() {
        assert!(CycleScope::Full.includes(AssetType::Stock));
        assert!(CycleScope::CryptoOnly.includes(AssetType::Crypto));
        assert!(!CycleScope::CryptoOnly.includes(AssetType::Etf));
    }
}
