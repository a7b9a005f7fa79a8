//! Market data collaborator.
//!
//! The trading core never fetches raw prices itself. It consumes current
//! quotes and an already-derived indicator frame through
//! [`MarketDataProvider`].

pub mod csv_feed;
pub mod indicators;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{AssetType, IndicatorFrame};

pub use csv_feed::CsvMarketData;

/// Symbols classified as ETFs when the watchlist doesn't say otherwise.
const KNOWN_ETFS: &[&str] = &[
    "SPY", "QQQ", "IWM", "DIA", "VTI", "VOO", "XLF", "XLE", "XLK", "XLV", "ARKK", "ARKG", "GLD",
    "SLV", "TLT", "HYG", "VNQ", "EEM",
];

/// Abstraction over the quote and indicator source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Latest price per requested symbol; `None` when unavailable.
    async fn get_current_prices(&self, symbols: &[String]) -> Result<HashMap<String, Option<Decimal>>>;

    /// Indicator history for `symbol`, oldest first. `None` when the
    /// provider has no (or too little) data.
    async fn get_technical_data(&self, symbol: &str) -> Result<Option<IndicatorFrame>>;
}

/// Asset class from the symbol alone: `-USD` pairs are crypto, a fixed set
/// of tickers are ETFs, everything else is a stock.
pub fn classify_asset(symbol: &str) -> AssetType {
    let upper = symbol.to_uppercase();
    if upper.contains("-USD") {
        AssetType::Crypto
    } else if KNOWN_ETFS.contains(&upper.as_str()) {
        AssetType::Etf
    } else {
        AssetType::Stock
    }
}
