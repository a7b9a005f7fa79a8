//! Strategy configuration: signal thresholds, exit rules, sizing and the
//! watchlist for one trader instance.
//!
//! A "personality" in the fleet is nothing more than a different
//! `StrategyConfig` value run through the same engine.

pub mod risk;
pub mod signals;
pub mod sizing;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::types::{AssetType, TradingError, WatchItem};
use risk::{ExitPolicy, ExitRules};
use signals::{SignalEngine, StrategyParams};
use sizing::PositionSizer;

// ---------------------------------------------------------------------------
// Watchlist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Watchlist {
    pub stocks: Vec<String>,
    pub etfs: Vec<String>,
    pub crypto: Vec<String>,
}

impl Watchlist {
    /// Flattened in scan order: stocks, then ETFs, then crypto.
    pub fn items(&self) -> Vec<WatchItem> {
        let tagged = [
            (&self.stocks, AssetType::Stock),
            (&self.etfs, AssetType::Etf),
            (&self.crypto, AssetType::Crypto),
        ];
        tagged
            .into_iter()
            .flat_map(|(symbols, asset_type)| {
                symbols.iter().map(move |s| WatchItem::new(s.clone(), asset_type))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stocks.len() + self.etfs.len() + self.crypto.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Strategy configuration
// ---------------------------------------------------------------------------

/// One trader's full configuration, as stored in its JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub starting_cash: Decimal,
    pub max_position_pct: Decimal,
    pub max_positions: usize,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_stop_pct: Decimal,
    pub strategy: StrategyParams,
    pub watchlist: Watchlist,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_description: Option<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            starting_cash: dec!(10000),
            max_position_pct: dec!(0.15),
            max_positions: 12,
            stop_loss_pct: dec!(0.05),
            take_profit_pct: dec!(0.10),
            trailing_stop_pct: dec!(0.03),
            strategy: StrategyParams::default(),
            watchlist: Watchlist::default(),
            bot_description: None,
        }
    }
}

impl StrategyConfig {
    /// Load and validate a strategy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read strategy config {}", path.display()))?;
        let config = Self::from_json(&json)
            .with_context(|| format!("Invalid strategy config {}", path.display()))?;

        info!(
            path = %path.display(),
            watchlist = config.watchlist.len(),
            min_strength = config.strategy.min_signal_strength,
            "Strategy config loaded"
        );
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse strategy JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TradingError> {
        let fraction = |name: &str, v: Decimal| {
            if v <= Decimal::ZERO || v > Decimal::ONE {
                Err(TradingError::Config(format!("{name} must be in (0, 1], got {v}")))
            } else {
                Ok(())
            }
        };

        if self.starting_cash <= Decimal::ZERO {
            return Err(TradingError::Config(format!(
                "starting_cash must be positive, got {}",
                self.starting_cash
            )));
        }
        fraction("max_position_pct", self.max_position_pct)?;
        fraction("stop_loss_pct", self.stop_loss_pct)?;
        fraction("trailing_stop_pct", self.trailing_stop_pct)?;
        if self.take_profit_pct <= Decimal::ZERO {
            return Err(TradingError::Config(format!(
                "take_profit_pct must be positive, got {}",
                self.take_profit_pct
            )));
        }
        if self.max_positions == 0 {
            return Err(TradingError::Config("max_positions must be at least 1".into()));
        }

        let p = &self.strategy;
        if !(0.0..=100.0).contains(&p.rsi_oversold)
            || !(0.0..=100.0).contains(&p.rsi_overbought)
            || p.rsi_oversold >= p.rsi_overbought
        {
            return Err(TradingError::Config(format!(
                "RSI thresholds must satisfy 0 <= oversold < overbought <= 100, got {} / {}",
                p.rsi_oversold, p.rsi_overbought
            )));
        }
        if !(p.volume_spike_multiplier.is_finite() && p.volume_spike_multiplier > 0.0) {
            return Err(TradingError::Config(format!(
                "volume_spike_multiplier must be positive, got {}",
                p.volume_spike_multiplier
            )));
        }
        if !(p.min_signal_strength.is_finite() && p.min_signal_strength > 0.0) {
            return Err(TradingError::Config(format!(
                "min_signal_strength must be positive, got {}",
                p.min_signal_strength
            )));
        }
        Ok(())
    }

    pub fn watch_items(&self) -> Vec<WatchItem> {
        self.watchlist.items()
    }

    pub fn signal_engine(&self) -> SignalEngine {
        SignalEngine::new(self.strategy.clone())
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        ExitPolicy::new(
            ExitRules {
                stop_loss_pct: self.stop_loss_pct,
                take_profit_pct: self.take_profit_pct,
                trailing_stop_pct: self.trailing_stop_pct,
            },
            self.strategy.min_signal_strength,
        )
    }

    pub fn sizer(&self) -> PositionSizer {
        PositionSizer::new(self.max_position_pct)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
