//! PAPERBOT: indicator-driven paper trading agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores ledgers from disk (or creates fresh ones), and hands a single
//! trader or the whole fleet to the market-hours scheduler with graceful
//! shutdown on Ctrl+C / SIGTERM.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use paperbot::config::AppConfig;
use paperbot::data::{CsvMarketData, MarketDataProvider};
use paperbot::engine::{CycleScope, Trader};
use paperbot::portfolio::Ledger;
use paperbot::scheduler::fleet::Fleet;
use paperbot::scheduler::{CancelToken, CycleRunner, Scheduler, SystemClock};
use paperbot::storage::SnapshotStore;
use paperbot::strategy::StrategyConfig;

const BANNER: &str = r#"
 ____   _    ____  _____ ____  ____   ___ _____
|  _ \ / \  |  _ \| ____|  _ \| __ ) / _ \_   _|
| |_) / _ \ | |_) |  _| | |_) |  _ \| | | || |
|  __/ ___ \|  __/| |___|  _ <| |_) | |_| || |
|_| /_/   \_\_|   |_____|_| \_\____/ \___/ |_|

  Indicator-driven paper trading
  v0.1.0
"#;

#[derive(Parser)]
#[command(name = "paperbot", version, about = "Indicator-driven paper trading agent")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single trader on the market-hours schedule
    Run(RunArgs),
    /// Run every bot in the fleet on the market-hours schedule
    Fleet(RunArgs),
    /// Print portfolio status
    Status {
        /// Show the fleet leaderboard instead of the single trader
        #[arg(long)]
        fleet: bool,
    },
    /// Refresh prices on held positions and save, without scanning or trading
    Update {
        /// Update every fleet member instead of the single trader
        #[arg(long)]
        fleet: bool,
    },
    /// Wipe portfolio state back to starting cash
    Reset {
        /// Reset every fleet member instead of the single trader
        #[arg(long)]
        fleet: bool,
    },
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Run one full cycle and exit, regardless of market hours
    #[arg(long)]
    once: bool,

    /// Scan and rank only; never trade
    #[arg(long)]
    scan_only: bool,

    /// Minutes between cycles during market hours
    #[arg(long, value_name = "MINS", value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Use the 08:00–18:00 window instead of regular hours
    #[arg(long)]
    extended_hours: bool,

    /// Keep trading crypto on weekdays outside the window
    #[arg(long)]
    crypto_after_hours: bool,
}

fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_logging();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    let provider: Arc<dyn MarketDataProvider> = Arc::new(
        CsvMarketData::new(&cfg.market_data.csv_dir).with_lookback(cfg.market_data.lookback_bars),
    );

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            println!("{BANNER}");
            let scan_only = cfg.agent.scan_only || args.scan_only;
            let mut trader = load_trader(&cfg, provider, scan_only)?;
            info!(
                agent_name = %cfg.agent.name,
                value = format!("${:.2}", trader.ledger().total_value()),
                positions = trader.ledger().num_positions(),
                scan_only,
                "PAPERBOT starting up"
            );

            drive(&mut trader, &cfg, &args).await?;

            trader.ledger().save()?;
            println!("{}", trader.ledger().get_summary());
        }
        Command::Fleet(args) => {
            println!("{BANNER}");
            let scan_only = cfg.agent.scan_only || args.scan_only;
            let mut fleet = Fleet::load(&cfg.agent.bots_dir, provider, &cfg.fleet, scan_only)?;
            info!(members = fleet.len(), scan_only, "PAPERBOT fleet starting up");

            drive(&mut fleet, &cfg, &args).await?;
            print_leaderboard(&fleet);
        }
        Command::Status { fleet: true } => {
            let fleet = Fleet::load(&cfg.agent.bots_dir, provider, &cfg.fleet, true)?;
            print_leaderboard(&fleet);
        }
        Command::Status { fleet: false } => {
            let trader = load_trader(&cfg, provider, true)?;
            print_status(&trader);
        }
        Command::Update { fleet: true } => {
            let mut fleet = Fleet::load(&cfg.agent.bots_dir, provider, &cfg.fleet, true)?;
            let failed = fleet.update_all().await;
            if failed > 0 {
                warn!(failed, "Some fleet members could not be updated");
            }
            print_leaderboard(&fleet);
        }
        Command::Update { fleet: false } => {
            let mut trader = load_trader(&cfg, provider, true)?;
            trader.update_prices_only().await?;
            print_status(&trader);
        }
        Command::Reset { fleet: true } => {
            let mut fleet = Fleet::load(&cfg.agent.bots_dir, provider, &cfg.fleet, true)?;
            fleet.reset_all()?;
            println!("Reset {} bots to starting cash.", fleet.len());
        }
        Command::Reset { fleet: false } => {
            let mut trader = load_trader(&cfg, provider, true)?;
            trader.reset()?;
            println!(
                "Portfolio reset to ${:.2} in {}.",
                trader.config().starting_cash,
                cfg.agent.data_dir.display()
            );
        }
    }

    Ok(())
}

/// Run once, or hand the runner to the scheduler until a shutdown signal.
async fn drive<R: CycleRunner>(runner: &mut R, cfg: &AppConfig, args: &RunArgs) -> Result<()> {
    if args.once {
        return Scheduler::<SystemClock>::run_once(runner, CycleScope::Full).await;
    }

    let mut schedule = cfg.schedule.clone();
    if let Some(mins) = args.interval {
        schedule.interval_mins = mins;
    }
    schedule.extended_hours |= args.extended_hours;
    schedule.crypto_after_hours |= args.crypto_after_hours;

    let cancel = CancelToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    info!("Entering scheduler. Press Ctrl+C to stop.");
    let stats = Scheduler::new(schedule.to_schedule_config(), SystemClock)
        .run(runner, &cancel)
        .await;
    info!(
        cycles = stats.total_cycles(),
        failed = stats.failed_cycles,
        "PAPERBOT shut down cleanly."
    );
    Ok(())
}

/// Cancel on Ctrl+C or SIGTERM. The scheduler finishes its current cycle.
async fn watch_signals(cancel: CancelToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received, finishing current cycle");
    cancel.cancel();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

fn load_trader(cfg: &AppConfig, provider: Arc<dyn MarketDataProvider>, scan_only: bool) -> Result<Trader> {
    let strategy = StrategyConfig::load(&cfg.trader.strategy_file)?;
    let ledger = Ledger::open(SnapshotStore::new(&cfg.agent.data_dir), strategy.starting_cash);
    Ok(Trader::new(&cfg.agent.name, strategy, ledger, provider).with_scan_only(scan_only))
}

fn print_status(trader: &Trader) {
    let summary = trader.ledger().get_summary();
    println!("{} | {summary}", trader.name());
    for pos in &summary.positions {
        println!(
            "  {:<10} {:>12} @ ${:<10.2} now ${:<10.2} P&L ${:.2} ({:.2}%)",
            pos.symbol,
            pos.quantity,
            pos.entry_price,
            pos.current_price,
            pos.unrealized_pnl,
            pos.unrealized_pnl_pct,
        );
    }
}

fn print_leaderboard(fleet: &Fleet) {
    println!("Leaderboard");
    for entry in fleet.leaderboard() {
        println!("  {entry}");
    }
    if let Some(leader) = fleet.leader() {
        println!("Leader: {} ({:.2}%)", leader.name, leader.total_return_pct);
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("paperbot=info"));

    let json_logging = std::env::var("PAPERBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
