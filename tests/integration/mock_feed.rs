//! Mock market data feed for integration testing.
//!
//! A deterministic `MarketDataProvider`: prices and indicator frames are
//! set from test code, every call is counted, and failures can be forced
//! per symbol. All state is in-memory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use paperbot::data::MarketDataProvider;
use paperbot::types::{IndicatorFrame, IndicatorRow};

#[derive(Default)]
pub struct MockFeed {
    prices: Mutex<HashMap<String, Decimal>>,
    frames: Mutex<HashMap<String, IndicatorFrame>>,
    failing: Mutex<HashSet<String>>,
    technical_calls: Mutex<Vec<String>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_frame(&self, frame: IndicatorFrame) {
        self.frames.lock().unwrap().insert(frame.symbol.clone(), frame);
    }

    /// Every lookup for `symbol` fails from now on.
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(symbol.to_string());
    }

    /// Symbols passed to `get_technical_data`, in call order.
    pub fn technical_calls(&self) -> Vec<String> {
        self.technical_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataProvider for MockFeed {
    async fn get_current_prices(&self, symbols: &[String]) -> Result<HashMap<String, Option<Decimal>>> {
        let prices = self.prices.lock().unwrap();
        Ok(symbols
            .iter()
            .map(|s| (s.clone(), prices.get(s).copied()))
            .collect())
    }

    async fn get_technical_data(&self, symbol: &str) -> Result<Option<IndicatorFrame>> {
        self.technical_calls.lock().unwrap().push(symbol.to_string());
        if self.failing.lock().unwrap().contains(symbol) {
            return Err(anyhow!("mock feed: {symbol} unavailable"));
        }
        Ok(self.frames.lock().unwrap().get(symbol).cloned())
    }
}

// ---------------------------------------------------------------------------
// Frame builders
// ---------------------------------------------------------------------------

fn quiet_rows(close: f64, n: usize) -> Vec<IndicatorRow> {
    vec![
        IndicatorRow {
            close,
            volume: 1000.0,
            ..Default::default()
        };
        n
    ]
}

/// 30 rows with no indicator activity: scores HOLD.
pub fn quiet_frame(symbol: &str, close: f64) -> IndicatorFrame {
    IndicatorFrame::new(symbol, quiet_rows(close, 30))
}

/// Oversold RSI, bullish MACD crossover and a lower-band touch on the last
/// row: scores BUY at strength 4.0.
pub fn bullish_frame(symbol: &str, close: f64) -> IndicatorFrame {
    let mut rows = quiet_rows(close, 28);
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

/// Overbought RSI, bearish MACD crossover and an upper-band touch: scores
/// SELL at strength 4.0.
pub fn bearish_frame(symbol: &str, close: f64) -> IndicatorFrame {
    let mut rows = quiet_rows(close, 28);
    rows.push(IndicatorRow {
        close,
        volume: 1000.0,
        macd_hist: Some(0.1),
        ..Default::default()
    });
    rows.push(IndicatorRow {
        close,
        volume: 1000.0,
        rsi: Some(78.0),
        macd: Some(0.2),
        macd_signal: Some(0.4),
        macd_hist: Some(-0.2),
        bb_pct: Some(0.97),
        ..Default::default()
    });
    IndicatorFrame::new(symbol, rows)
}
