//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section is optional; missing keys take the defaults below. Strategy
//! parameters live in separate JSON files (see [`crate::strategy`]).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::csv_feed::MIN_LOOKBACK;
use crate::scheduler::fleet::{default_roster, BotSpec};
use crate::scheduler::ScheduleConfig;
use crate::types::TradingError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub schedule: ScheduleSection,
    pub market_data: MarketDataConfig,
    pub trader: TraderConfig,
    pub fleet: Vec<BotSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            schedule: ScheduleSection::default(),
            market_data: MarketDataConfig::default(),
            trader: TraderConfig::default(),
            fleet: default_roster(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Single-trader ledger directory.
    pub data_dir: PathBuf,
    /// Root of the per-bot directories in fleet mode.
    pub bots_dir: PathBuf,
    pub scan_only: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "PAPERBOT-001".into(),
            data_dir: PathBuf::from("data"),
            bots_dir: PathBuf::from("bots"),
            scan_only: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleSection {
    pub interval_mins: u64,
    pub extended_hours: bool,
    pub crypto_after_hours: bool,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_mins: 15,
            extended_hours: false,
            crypto_after_hours: false,
        }
    }
}

impl ScheduleSection {
    pub fn to_schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: chrono::Duration::minutes(self.interval_mins as i64),
            extended_hours: self.extended_hours,
            crypto_after_hours: self.crypto_after_hours,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Directory of `<SYMBOL>.csv` OHLCV files.
    pub csv_dir: PathBuf,
    pub lookback_bars: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("market_data"),
            lookback_bars: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TraderConfig {
    pub strategy_file: PathBuf,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            strategy_file: PathBuf::from("config.json"),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TradingError> {
        if self.schedule.interval_mins == 0 {
            return Err(TradingError::Config("schedule.interval_mins must be at least 1".into()));
        }
        if self.market_data.lookback_bars < MIN_LOOKBACK {
            return Err(TradingError::Config(format!(
                "market_data.lookback_bars must be at least {MIN_LOOKBACK}, got {}",
                self.market_data.lookback_bars
            )));
        }

        let mut seen = HashSet::new();
        for bot in &self.fleet {
            if bot.id.trim().is_empty() {
                return Err(TradingError::Config("fleet entries need a non-empty id".into()));
            }
            if !seen.insert(bot.id.as_str()) {
                return Err(TradingError::Config(format!("duplicate fleet id: {}", bot.id)));
            }
        }
        Ok(())
    }
}
