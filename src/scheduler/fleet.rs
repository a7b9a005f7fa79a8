//! Multi-strategy fleet.
//!
//! Each member is a complete [`Trader`] with its own strategy file and
//! storage directory under `<bots_dir>/<id>/`. A tick runs members in
//! roster order; one member failing never stops the others.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::CycleRunner;
use crate::data::MarketDataProvider;
use crate::engine::{CycleScope, Trader};
use crate::portfolio::{Ledger, PortfolioSummary};
use crate::storage::SnapshotStore;
use crate::strategy::StrategyConfig;
use crate::types::Signal;

/// Strategy file name inside each member's directory.
pub const CONFIG_FILE: &str = "config.json";

/// The stock personalities.
pub const ROSTER: &[(&str, &str)] = &[
    ("momentum_pete", "Momentum Pete"),
    ("cautious_carl", "Cautious Carl"),
    ("mean_reversion_mary", "Mean Reversion Mary"),
    ("volume_victor", "Volume Victor"),
    ("yolo_yolanda", "YOLO Yolanda"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSpec {
    pub id: String,
    pub name: String,
}

impl BotSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

pub fn default_roster() -> Vec<BotSpec> {
    ROSTER.iter().map(|(id, name)| BotSpec::new(*id, *name)).collect()
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One member's outcome for a tick.
#[derive(Debug, Clone)]
pub struct MemberResult {
    pub id: String,
    pub name: String,
    /// The personality blurb from the member's strategy file.
    pub description: Option<String>,
    pub summary: PortfolioSummary,
    /// This tick's scan, exits first. Empty when the cycle failed.
    pub signals: Vec<Signal>,
    pub trades_this_cycle: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub id: String,
    pub name: String,
    pub total_value: Decimal,
    pub total_return_pct: Decimal,
    pub num_positions: usize,
    pub num_trades: usize,
    pub win_rate: f64,
}

impl fmt::Display for LeaderboardEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.total_return_pct >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "#{} {:<22} ${:>10.2} ({sign}{:.2}%) positions={} trades={} win_rate={:.1}%",
            self.rank,
            self.name,
            self.total_value,
            self.total_return_pct,
            self.num_positions,
            self.num_trades,
            self.win_rate,
        )
    }
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

pub struct FleetMember {
    pub id: String,
    pub trader: Trader,
}

pub struct Fleet {
    members: Vec<FleetMember>,
}

impl Fleet {
    pub fn new(members: Vec<FleetMember>) -> Self {
        Self { members }
    }

    /// Load every roster entry from `<bots_dir>/<id>/config.json`. Any
    /// missing or invalid strategy file aborts the load.
    pub fn load(
        bots_dir: &Path,
        provider: Arc<dyn MarketDataProvider>,
        roster: &[BotSpec],
        scan_only: bool,
    ) -> Result<Self> {
        if roster.is_empty() {
            bail!("Fleet roster is empty");
        }

        let mut members = Vec::with_capacity(roster.len());
        for bot in roster {
            let dir = bots_dir.join(&bot.id);
            let config = StrategyConfig::load(dir.join(CONFIG_FILE))
                .with_context(|| format!("Failed to load bot {}", bot.id))?;
            let ledger = Ledger::open(SnapshotStore::new(&dir), config.starting_cash);
            let trader = Trader::new(&bot.name, config, ledger, provider.clone()).with_scan_only(scan_only);

            info!(
                id = %bot.id,
                name = %bot.name,
                description = trader.config().bot_description.as_deref().unwrap_or(""),
                value = format!("${:.2}", trader.ledger().total_value()),
                "Fleet member loaded"
            );
            members.push(FleetMember {
                id: bot.id.clone(),
                trader,
            });
        }

        Ok(Self { members })
    }

    pub fn members(&self) -> &[FleetMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Run one cycle for every member in roster order.
    pub async fn tick(&mut self, scope: CycleScope) -> Vec<MemberResult> {
        let mut results = Vec::with_capacity(self.members.len());

        for member in &mut self.members {
            let (trades, signals, err) = match member.trader.run_cycle(scope).await {
                Ok(report) => (
                    report.trades_executed(),
                    member.trader.get_signals_summary().to_vec(),
                    None,
                ),
                Err(e) => {
                    error!(id = %member.id, error = %e, "Fleet member cycle failed");
                    (0, Vec::new(), Some(format!("{e:#}")))
                }
            };
            results.push(MemberResult {
                id: member.id.clone(),
                name: member.trader.name().to_string(),
                description: member.trader.config().bot_description.clone(),
                summary: member.trader.ledger().get_summary(),
                signals,
                trades_this_cycle: trades,
                error: err,
            });
        }

        self.log_leaderboard();
        results
    }

    /// Members ranked by total return, best first. Ties keep roster order.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<(&FleetMember, PortfolioSummary)> = self
            .members
            .iter()
            .map(|m| (m, m.trader.ledger().get_summary()))
            .collect();
        rows.sort_by(|a, b| b.1.total_return_pct.cmp(&a.1.total_return_pct));

        rows.into_iter()
            .enumerate()
            .map(|(i, (member, summary))| LeaderboardEntry {
                rank: i + 1,
                id: member.id.clone(),
                name: member.trader.name().to_string(),
                total_value: summary.total_value,
                total_return_pct: summary.total_return_pct,
                num_positions: summary.num_positions,
                num_trades: summary.num_trades,
                win_rate: summary.win_rate,
            })
            .collect()
    }

    pub fn leader(&self) -> Option<LeaderboardEntry> {
        self.leaderboard().into_iter().next()
    }

    pub fn log_leaderboard(&self) {
        for entry in self.leaderboard() {
            info!(rank = entry.rank, id = %entry.id, "{entry}");
        }
    }

    /// Re-mark every member's holdings without scanning. Returns the number
    /// of members whose prices could not be saved.
    pub async fn update_all(&mut self) -> usize {
        let mut failed = 0;
        for member in &mut self.members {
            if let Err(e) = member.trader.update_prices_only().await {
                warn!(id = %member.id, error = %e, "Fleet member price update failed");
                failed += 1;
            }
        }
        failed
    }

    /// Wipe every member back to its starting cash.
    pub fn reset_all(&mut self) -> Result<()> {
        for member in &mut self.members {
            member
                .trader
                .reset()
                .with_context(|| format!("Failed to reset bot {}", member.id))?;
            info!(id = %member.id, "Fleet member reset");
        }
        Ok(())
    }
}

#[async_trait]
impl CycleRunner for Fleet {
    async fn run_tick(&mut self, scope: CycleScope) -> Result<()> {
        let results = self.tick(scope).await;
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        let trades: usize = results.iter().map(|r| r.trades_this_cycle).sum();
        info!(members = results.len(), failed, trades, %scope, "Fleet tick complete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
