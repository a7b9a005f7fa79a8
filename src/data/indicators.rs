//! Indicator derivation from raw OHLCV bars.
//!
//! Produces one [`IndicatorRow`] per bar. Rolling windows leave their
//! warm-up rows empty; EMAs are seeded with the first close.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{IndicatorFrame, IndicatorRow};

/// Bars required before a frame is produced at all.
pub const MIN_BARS: usize = 26;

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BB_PERIOD: usize = 20;
const BB_WIDTH: f64 = 2.0;
const VOLUME_PERIOD: usize = 20;

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Derive the full indicator frame. `None` with fewer than [`MIN_BARS`] bars.
pub fn derive(symbol: &str, bars: &[Bar]) -> Option<IndicatorFrame> {
    if bars.len() < MIN_BARS {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let rsi = rsi(&closes, RSI_PERIOD);

    let fast = ema(&closes, MACD_FAST);
    let slow = ema(&closes, MACD_SLOW);
    let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let macd_signal = ema(&macd, MACD_SIGNAL);

    let bb_mid = sma(&closes, BB_PERIOD);
    let bb_std = rolling_std(&closes, BB_PERIOD);
    let vol_sma = sma(&volumes, VOLUME_PERIOD);

    let sma_10 = sma(&closes, 10);
    let sma_20 = sma(&closes, 20);
    let ema_9 = ema(&closes, 9);
    let roc_5 = roc(&closes, 5);
    let roc_10 = roc(&closes, 10);

    let rows = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let bands = bb_mid[i].zip(bb_std[i]).map(|(mid, sd)| {
                (mid + BB_WIDTH * sd, mid - BB_WIDTH * sd)
            });
            let bb_pct = bands.and_then(|(upper, lower)| {
                let width = upper - lower;
                (width > 0.0).then(|| (bar.close - lower) / width)
            });
            let vol_ratio = vol_sma[i].map(|avg| {
                let avg = if avg == 0.0 { 1.0 } else { avg };
                bar.volume / avg
            });

            IndicatorRow {
                timestamp: bar.timestamp,
                close: bar.close,
                volume: bar.volume,
                rsi: rsi[i],
                macd: Some(macd[i]),
                macd_signal: Some(macd_signal[i]),
                macd_hist: Some(macd[i] - macd_signal[i]),
                bb_pct,
                bb_upper: bands.map(|(u, _)| u),
                bb_lower: bands.map(|(_, l)| l),
                vol_ratio,
                sma_10: sma_10[i],
                sma_20: sma_20[i],
                ema_9: Some(ema_9[i]),
                roc_5: roc_5[i],
                roc_10: roc_10[i],
            }
        })
        .collect();

    Some(IndicatorFrame::new(symbol, rows))
}

// ---------------------------------------------------------------------------
// Series helpers
// ---------------------------------------------------------------------------

/// Simple moving average; `None` during warm-up.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= values[i - period];
        }
        out.push((i + 1 >= period).then(|| sum / period as f64));
    }
    out
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with
/// the first value (no warm-up).
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Rolling sample standard deviation (divides by n − 1).
pub fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period < 2 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window = &values[i + 1 - period..=i];
            let mean = window.iter().sum::<f64>() / period as f64;
            let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
            Some(var.sqrt())
        })
        .collect()
}

/// RSI from simple rolling means of gains and losses over `period` changes.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }
    for i in period..closes.len() {
        let (mut gain, mut loss) = (0.0, 0.0);
        for j in i + 1 - period..=i {
            let delta = closes[j] - closes[j - 1];
            if delta > 0.0 {
                gain += delta;
            } else {
                loss -= delta;
            }
        }
        let avg_gain = gain / period as f64;
        let avg_loss = loss / period as f64;
        out[i] = Some(if avg_loss == 0.0 {
            if avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        });
    }
    out
}

/// Percent change over `periods` bars.
pub fn roc(closes: &[f64], periods: usize) -> Vec<Option<f64>> {
    (0..closes.len())
        .map(|i| {
            let base = *closes.get(i.checked_sub(periods)?)?;
            (base != 0.0).then(|| (closes[i] / base - 1.0) * 100.0)
        })
        .collect()
}
