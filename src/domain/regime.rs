//! Pure regime classification over a candle window. No I/O, no shared state.

use crate::domain::types::{Candle, Regime, RegimeMetrics};

const MIN_CANDLES: usize = 30;
const DEFAULT_PERIOD: usize = 14;
const DEFAULT_ADX_THRESHOLD: f64 = 25.0;
const DEFAULT_ATR_PERCENTILE: f64 = 50.0;

fn true_range(prev_close: f64, high: f64, low: f64) -> f64 {
    let a = high - low;
    let b = (high - prev_close).abs();
    let c = (low - prev_close).abs();
    a.max(b).max(c)
}

/// Exponential smoothing with `alpha = 2/(period+1)`, matching
/// `ewm(span=period, adjust=False)` semantics: the running value starts at
/// the first sample and is updated in place thereafter.
fn ewm(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Simple rolling-window mean of gains/losses (distinct from the ADX/ATR
/// exponential smoothing above), matching the reference implementation's
/// RSI method exactly.
fn rsi_last(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period {
        return 50.0;
    }
    let window = &closes[closes.len() - period - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn insufficient_data_metrics() -> RegimeMetrics {
    RegimeMetrics {
        regime: Regime::RangeQuiet,
        adx: 0.0,
        plus_di: 0.0,
        minus_di: 0.0,
        atr: 0.0,
        rsi: 50.0,
        insufficient_data: true,
    }
}

/// Classify a candle window. Windows shorter than 30 candles are
/// insufficient and return `RANGE_QUIET` with `insufficient_data = true`.
pub fn analyze(candles: &[Candle]) -> RegimeMetrics {
    if candles.len() < MIN_CANDLES {
        return insufficient_data_metrics();
    }

    let n = candles.len();
    let mut tr = Vec::with_capacity(n - 1);
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);

    for i in 1..n {
        let prev = &candles[i - 1];
        let cur = &candles[i];
        tr.push(true_range(prev.close, cur.high, cur.low));

        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;
        let pdm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let mdm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        plus_dm.push(pdm);
        minus_dm.push(mdm);
    }

    let atr_series = ewm(&tr, DEFAULT_PERIOD);
    let plus_dm_smoothed = ewm(&plus_dm, DEFAULT_PERIOD);
    let minus_dm_smoothed = ewm(&minus_dm, DEFAULT_PERIOD);

    let atr = *atr_series.last().unwrap_or(&0.0);

    let plus_di = if atr != 0.0 {
        100.0 * plus_dm_smoothed.last().copied().unwrap_or(0.0) / atr
    } else {
        0.0
    };
    let minus_di = if atr != 0.0 {
        100.0 * minus_dm_smoothed.last().copied().unwrap_or(0.0) / atr
    } else {
        0.0
    };

    let dx_series: Vec<f64> = plus_dm_smoothed
        .iter()
        .zip(minus_dm_smoothed.iter())
        .zip(atr_series.iter())
        .map(|((&pdm, &mdm), &atr_v)| {
            let pdi = if atr_v != 0.0 { 100.0 * pdm / atr_v } else { 0.0 };
            let mdi = if atr_v != 0.0 { 100.0 * mdm / atr_v } else { 0.0 };
            let denom = pdi + mdi;
            if denom == 0.0 { 0.0 } else { 100.0 * (pdi - mdi).abs() / denom }
        })
        .collect();
    let adx_series = ewm(&dx_series, DEFAULT_PERIOD);
    let adx = *adx_series.last().unwrap_or(&0.0);

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let rsi = rsi_last(&closes, DEFAULT_PERIOD);

    let atr_median = median(&atr_series);
    // `atr_percentile` is exposed as a tunable for parity with the
    // reference's configurable median threshold; only the 50th-percentile
    // (ordinary median) case is exercised today.
    let _ = DEFAULT_ATR_PERCENTILE;

    let regime = if adx > DEFAULT_ADX_THRESHOLD {
        if plus_di >= minus_di {
            Regime::TrendingUp
        } else {
            Regime::TrendingDown
        }
    } else if atr > atr_median {
        Regime::RangeVolatile
    } else {
        Regime::RangeQuiet
    };

    RegimeMetrics {
        regime,
        adx,
        plus_di,
        minus_di,
        atr,
        rsi,
        insufficient_data: false,
    }
}
