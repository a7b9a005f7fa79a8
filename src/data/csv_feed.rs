//! File-backed market data.
//!
//! Replays `<dir>/<SYMBOL>.csv` OHLCV files (header
//! `date,open,high,low,close,volume`, any capitalisation the usual
//! exporters produce). The last close is the current price; indicators are
//! derived over the trailing lookback window.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::indicators::{self, Bar};
use super::MarketDataProvider;
use crate::strategy::signals::MIN_HISTORY;
use crate::types::{IndicatorFrame, TradingError};

/// Trailing bars used for indicator derivation.
const DEFAULT_LOOKBACK: usize = 60;

/// Shortest lookback that yields a frame the signal engine will score.
pub const MIN_LOOKBACK: usize = if MIN_HISTORY > indicators::MIN_BARS {
    MIN_HISTORY
} else {
    indicators::MIN_BARS
};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date", alias = "Datetime", alias = "timestamp")]
    date: String,
    #[serde(alias = "Open")]
    open: f64,
    #[serde(alias = "High")]
    high: f64,
    #[serde(alias = "Low")]
    low: f64,
    #[serde(alias = "Close")]
    close: f64,
    #[serde(alias = "Volume")]
    volume: f64,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts.and_utc());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Unrecognised timestamp '{raw}'"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .ok_or_else(|| anyhow!("Invalid date '{raw}'"))
}

/// Market data provider reading OHLCV CSV files from a directory.
pub struct CsvMarketData {
    dir: PathBuf,
    lookback: usize,
}

impl CsvMarketData {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lookback: DEFAULT_LOOKBACK,
        }
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback.max(MIN_LOOKBACK);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    /// All bars for `symbol`, oldest first. `Ok(None)` when there is no file.
    pub fn load_bars(&self, symbol: &str) -> Result<Option<Vec<Bar>>> {
        let path = self.path_for(symbol);
        if !path.exists() {
            debug!(symbol, path = %path.display(), "No OHLCV file");
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut bars = Vec::new();
        for (line, record) in reader.deserialize::<CsvRow>().enumerate() {
            let row = record.map_err(|e| TradingError::DataProvider {
                symbol: symbol.to_string(),
                message: format!("row {}: {e}", line + 1),
            })?;
            bars.push(Bar {
                timestamp: parse_timestamp(&row.date)?,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        bars.sort_by_key(|b| b.timestamp);
        Ok(Some(bars))
    }
}

#[async_trait]
impl MarketDataProvider for CsvMarketData {
    async fn get_current_prices(&self, symbols: &[String]) -> Result<HashMap<String, Option<Decimal>>> {
        let mut prices = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let price = match self.load_bars(symbol) {
                Ok(Some(bars)) => bars
                    .last()
                    .map(|b| b.close)
                    .filter(|c| c.is_finite() && *c > 0.0)
                    .and_then(Decimal::from_f64),
                Ok(None) => None,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Price lookup failed");
                    None
                }
            };
            prices.insert(symbol.clone(), price);
        }
        Ok(prices)
    }

    async fn get_technical_data(&self, symbol: &str) -> Result<Option<IndicatorFrame>> {
        let Some(bars) = self.load_bars(symbol)? else {
            return Ok(None);
        };
        let start = bars.len().saturating_sub(self.lookback);
        Ok(indicators::derive(symbol, &bars[start..]))
    }
}
