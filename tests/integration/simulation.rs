//! End-to-end simulation harness.
//!
//! Drives real traders and the fleet through full cycles against the mock
//! feed (or CSV files on disk), and the scheduler against a simulated
//! clock.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::America::New_York;
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use paperbot::data::CsvMarketData;
use paperbot::engine::{CycleScope, Trader};
use paperbot::portfolio::Ledger;
use paperbot::scheduler::fleet::{BotSpec, Fleet, CONFIG_FILE};
use paperbot::scheduler::{
    CancelToken, Clock, CycleRunner, ScheduleConfig, Scheduler, SimulatedClock,
};
use paperbot::storage::{SessionMode, SnapshotStore};
use paperbot::strategy::{StrategyConfig, Watchlist};
use paperbot::types::{AssetType, SignalAction};

use crate::mock_feed::{bearish_frame, bullish_frame, quiet_frame, MockFeed};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("paperbot_sim_{tag}_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn et(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    New_York
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn make_config(stocks: &[&str]) -> StrategyConfig {
    StrategyConfig {
        watchlist: Watchlist {
            stocks: stocks.iter().map(|s| s.to_string()).collect(),
            ..Watchlist::default()
        },
        ..StrategyConfig::default()
    }
}

/// Wraps a trader, records the simulated time of every tick and cancels
/// after `stop_after` ticks.
struct TickRecorder {
    trader: Trader,
    clock: Arc<SimulatedClock>,
    cancel: CancelToken,
    ticks: Vec<DateTime<Utc>>,
    stop_after: usize,
}

#[async_trait]
impl CycleRunner for TickRecorder {
    async fn run_tick(&mut self, scope: CycleScope) -> Result<()> {
        self.ticks.push(self.clock.now());
        self.trader.run_tick(scope).await?;
        if self.ticks.len() >= self.stop_after {
            self.cancel.cancel();
        }
        Ok(())
    }
}

fn make_recorder(start: DateTime<Utc>, stop_after: usize) -> (TickRecorder, Arc<SimulatedClock>, CancelToken) {
    let clock = Arc::new(SimulatedClock::new(start));
    let cancel = CancelToken::new();
    let feed = Arc::new(MockFeed::new());
    feed.set_frame(quiet_frame("AAPL", 100.0));

    let trader = Trader::new("recorder", make_config(&["AAPL"]), Ledger::in_memory(dec!(10000)), feed);
    let recorder = TickRecorder {
        trader,
        clock: clock.clone(),
        cancel: cancel.clone(),
        ticks: Vec::new(),
        stop_after,
    };
    (recorder, clock, cancel)
}

fn write_bot(bots_dir: &Path, id: &str, json: &str) {
    let dir = bots_dir.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(CONFIG_FILE), json).unwrap();
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_weekend_start_waits_for_monday_open() {
    // Saturday noon, crypto after-hours disabled.
    let (mut recorder, clock, cancel) = make_recorder(et(2025, 6, 7, 12, 0), 1);
    let scheduler = Scheduler::new(ScheduleConfig::default(), clock.clone());

    let stats = scheduler.run(&mut recorder, &cancel).await;

    assert_eq!(stats.total_cycles(), 1);
    assert_eq!(recorder.trader.cycle_count(), 1);
    let first = recorder.ticks[0];
    assert_eq!(first, et(2025, 6, 9, 9, 30));
}

#[tokio::test]
async fn test_regular_session_tick_count() {
    // Wednesday open to close at 15-minute intervals, both bells included.
    let (mut recorder, clock, cancel) = make_recorder(et(2025, 6, 11, 9, 30), 27);
    let stats = Scheduler::new(ScheduleConfig::default(), clock.clone())
        .run(&mut recorder, &cancel)
        .await;

    assert_eq!(stats.full_cycles, 27);
    assert_eq!(recorder.ticks.last().copied(), Some(et(2025, 6, 11, 16, 0)));
}

#[tokio::test]
async fn test_friday_close_skips_to_monday() {
    let (mut recorder, clock, cancel) = make_recorder(et(2025, 6, 13, 16, 0), 2);
    Scheduler::new(ScheduleConfig::default(), clock.clone())
        .run(&mut recorder, &cancel)
        .await;

    assert_eq!(recorder.ticks[0], et(2025, 6, 13, 16, 0));
    assert_eq!(recorder.ticks[1], et(2025, 6, 16, 9, 30));
    assert!(recorder.ticks[1] - recorder.ticks[0] > Duration::days(2));
}

// ---------------------------------------------------------------------------
// Trader cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cycle_exits_then_entries_and_persists() {
    let dir = temp_dir("cycle");
    let feed = Arc::new(MockFeed::new());
    feed.set_price("NVDA", dec!(94));
    feed.set_price("AMD", dec!(51));
    feed.set_frame(bearish_frame("AMD", 51.0));
    feed.set_frame(bullish_frame("AAPL", 100.0));
    feed.set_frame(quiet_frame("MSFT", 400.0));
    feed.fail_symbol("BAD");

    let mut ledger = Ledger::open(SnapshotStore::new(&dir), dec!(10000));
    ledger.buy("NVDA", dec!(10), dec!(100), AssetType::Stock, "seed").unwrap();
    ledger.buy("AMD", dec!(10), dec!(50), AssetType::Stock, "seed").unwrap();

    let config = make_config(&["AAPL", "MSFT", "BAD", "AMD"]);
    let mut trader = Trader::new("sim", config, ledger, feed.clone());
    let report = trader.run_cycle(CycleScope::Full).await.unwrap();

    // NVDA hit its stop loss; AMD reversed on technicals.
    assert_eq!(report.exits_found, 2);
    assert_eq!(report.sells_executed, 2);
    assert_eq!(report.buys_executed, 1);
    assert_eq!(report.scan_errors, 1);
    assert!(!feed.technical_calls().contains(&"NVDA".to_string()));
    assert!(feed.technical_calls().contains(&"AMD".to_string()));

    let ledger = trader.ledger();
    let history = ledger.trade_history();
    assert_eq!(history.len(), 5);
    assert!(history[2].is_sell() && history[3].is_sell());
    assert_eq!(history[4].symbol, "AAPL");
    // 8500 + 940 + 510 = 9950 before the entry; 15% of that at $100.
    assert_eq!(ledger.position("AAPL").unwrap().quantity, dec!(14.925));
    assert!(ledger.cash() >= dec!(0));
    assert_eq!(ledger.total_value(), ledger.cash() + ledger.positions_value());

    let signals = trader.get_signals_summary();
    assert_eq!(signals[0].action, SignalAction::Sell);
    assert!(signals.iter().any(|s| s.symbol == "AAPL" && s.action == SignalAction::Buy));

    // Round trip through the snapshot file.
    let reopened = Ledger::open(SnapshotStore::new(&dir), dec!(1));
    assert_eq!(reopened.state(), trader.ledger().state());
    assert!(!SnapshotStore::new(&dir).load_history().is_empty());

    let session = SnapshotStore::new(&dir).load_session_log();
    assert_eq!(session.len(), 1);
    assert_eq!(session[0].mode, SessionMode::Market);
    assert_eq!(session[0].trades_executed, 3);
    assert_eq!(session[0].portfolio_value, trader.ledger().total_value());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_csv_feed_take_profit() {
    let data_dir = temp_dir("csv");
    let ledger_dir = temp_dir("csv_ledger");

    let mut body = String::from("date,open,high,low,close,volume\n");
    for day in 1..=30 {
        let close = if day == 30 { 112.0 } else { 100.0 };
        body.push_str(&format!("2025-05-{day:02},{close},{close},{close},{close},5000\n"));
    }
    std::fs::write(data_dir.join("AAPL.csv"), body).unwrap();

    let mut ledger = Ledger::open(SnapshotStore::new(&ledger_dir), dec!(10000));
    ledger.buy("AAPL", dec!(10), dec!(100), AssetType::Stock, "seed").unwrap();

    let feed = Arc::new(CsvMarketData::new(&data_dir));
    let mut trader = Trader::new("csv", make_config(&[]), ledger, feed);
    let report = trader.run_cycle(CycleScope::Full).await.unwrap();

    assert_eq!(report.prices_updated, 1);
    assert_eq!(report.sells_executed, 1);
    let sell = trader.ledger().trade_history().last().unwrap();
    assert!(sell.reason.starts_with("Take profit"));
    assert_eq!(sell.price, dec!(112));
    assert_eq!(sell.pnl, Some(dec!(120)));
    assert_eq!(trader.ledger().cash(), dec!(10120));

    let _ = std::fs::remove_dir_all(&data_dir);
    let _ = std::fs::remove_dir_all(&ledger_dir);
}

#[tokio::test]
async fn test_crypto_only_cycle_leaves_stocks_alone() {
    let feed = Arc::new(MockFeed::new());
    feed.set_price("AAPL", dec!(50));
    feed.set_price("BTC-USD", dec!(60000));
    feed.set_frame(quiet_frame("BTC-USD", 60000.0));

    let mut ledger = Ledger::in_memory(dec!(10000));
    ledger.buy("AAPL", dec!(10), dec!(100), AssetType::Stock, "seed").unwrap();
    ledger.buy("BTC-USD", dec!(0.01), dec!(60000), AssetType::Crypto, "seed").unwrap();

    let mut trader = Trader::new("night", make_config(&[]), ledger, feed);
    let report = trader.run_cycle(CycleScope::CryptoOnly).await.unwrap();

    // AAPL would be a stop loss at $50 but isn't marked or checked.
    assert_eq!(report.positions_checked, 1);
    assert_eq!(report.trades_executed(), 0);
    assert_eq!(trader.ledger().position("AAPL").unwrap().current_price, dec!(100));
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fleet_personalities_diverge() {
    let bots = temp_dir("fleet");
    write_bot(&bots, "eager", r#"{"watchlist": {"stocks": ["AAPL"]}}"#);
    write_bot(
        &bots,
        "picky",
        r#"{"strategy": {"min_signal_strength": 5}, "watchlist": {"stocks": ["AAPL"]}}"#,
    );

    let feed = Arc::new(MockFeed::new());
    feed.set_price("AAPL", dec!(100));
    feed.set_frame(bullish_frame("AAPL", 100.0));

    let roster = vec![BotSpec::new("picky", "Picky Pat"), BotSpec::new("eager", "Eager Ed")];
    let mut fleet = Fleet::load(&bots, feed.clone(), &roster, false).unwrap();

    let first = fleet.tick(CycleScope::Full).await;
    assert!(first.iter().all(|r| r.error.is_none()));
    assert_eq!(first[0].trades_this_cycle, 0);
    assert_eq!(first[1].trades_this_cycle, 1);

    feed.set_price("AAPL", dec!(105));
    fleet.tick(CycleScope::Full).await;

    let board = fleet.leaderboard();
    assert_eq!(board[0].id, "eager");
    assert_eq!(board[0].total_value, dec!(10075));
    assert_eq!(board[1].id, "picky");
    assert_eq!(board[1].total_return_pct, dec!(0));

    // Each bot persisted into its own directory.
    assert!(bots.join("eager").join("portfolio.json").exists());
    assert!(bots.join("picky").join("portfolio.json").exists());

    fleet.reset_all().unwrap();
    assert!(fleet.leaderboard().iter().all(|e| e.total_value == dec!(10000)));

    let _ = std::fs::remove_dir_all(&bots);
}
