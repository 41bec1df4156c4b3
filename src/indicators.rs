//! Technical indicators
//!
//! Pure functions over OHLCV columns. Every output is aligned to the input
//! index; leading positions where the indicator is undefined hold `None`.
//! Callers must treat `None` as "no signal".

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if i + 1 < period || period == 0 {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Calculate Exponential Moving Average, seeded with the first period-mean
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[0..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev_ema) = ema_value {
            let new_ema = (value - prev_ema) * multiplier + prev_ema;
            ema_value = Some(new_ema);
            result.push(Some(new_ema));
        }
    }

    result
}

/// Wilder smoothing (alpha = 1/period), seeded with the first period-mean.
/// Used by RSI and ATR.
fn wilder(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let mut smoothed: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[0..period].iter().sum();
            smoothed = Some(sum / period as f64);
            result.push(smoothed);
        } else if let Some(prev) = smoothed {
            let new = (prev * (period as f64 - 1.0) + value) / period as f64;
            smoothed = Some(new);
            result.push(Some(new));
        }
    }

    result
}

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (Wilder's smoothing)
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    wilder(&tr, period)
}

/// Calculate RSI (Wilder's), defined for index >= period
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];

    if values.len() <= period || period == 0 {
        return result;
    }

    let mut gains = Vec::with_capacity(values.len());
    let mut losses = Vec::with_capacity(values.len());
    gains.push(0.0);
    losses.push(0.0);

    for i in 1..values.len() {
        let change = values[i] - values[i - 1];
        gains.push(if change > 0.0 { change } else { 0.0 });
        losses.push(if change < 0.0 { -change } else { 0.0 });
    }

    // First average covers the first `period` price changes; the day-zero
    // placeholder entries are excluded.
    let mut avg_gain: f64 = gains[1..=period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in period + 1..values.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
        result[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

/// Calculate MACD: (line, signal, histogram)
///
/// The signal line is an EMA over the defined segment of the MACD line.
pub fn macd(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let ema_fast = ema(values, fast);
    let ema_slow = ema(values, slow);

    let mut line = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        match (ema_fast[i], ema_slow[i]) {
            (Some(f), Some(s)) => line.push(Some(f - s)),
            _ => line.push(None),
        }
    }

    let first_defined = line.iter().position(|v| v.is_some());
    let mut signal_line = vec![None; values.len()];
    if let Some(start) = first_defined {
        let dense: Vec<f64> = line[start..].iter().map(|v| v.unwrap()).collect();
        for (offset, v) in ema(&dense, signal).into_iter().enumerate() {
            signal_line[start + offset] = v;
        }
    }

    let mut histogram = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        match (line[i], signal_line[i]) {
            (Some(l), Some(s)) => histogram.push(Some(l - s)),
            _ => histogram.push(None),
        }
    }

    (line, signal_line, histogram)
}

/// Calculate Bollinger Bands: (upper, middle, lower)
///
/// Bands are placed at +/- num_std sample standard deviations of the last
/// `period` values.
pub fn bollinger_bands(
    values: &[f64],
    period: usize,
    num_std: f64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let middle = sma(values, period);
    let mut upper = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        match middle[i] {
            Some(mid) if period > 1 => {
                let window = &values[i + 1 - period..=i];
                let variance: f64 = window
                    .iter()
                    .map(|&x| {
                        let diff = x - mid;
                        diff * diff
                    })
                    .sum::<f64>()
                    / (period as f64 - 1.0);
                let std_dev = variance.sqrt();

                upper.push(Some(mid + num_std * std_dev));
                lower.push(Some(mid - num_std * std_dev));
            }
            _ => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    (upper, middle, lower)
}

/// SMA over an already-gappy series; a window containing any `None` is `None`
fn sma_opt(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if i + 1 < period || period == 0 {
            result.push(None);
            continue;
        }
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_some()) {
            let sum: f64 = window.iter().map(|v| v.unwrap()).sum();
            result.push(Some(sum / period as f64));
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate the Stochastic Oscillator: (%K, %D)
///
/// Fast %K over `k_fast` bars, slowed by an SMA of `k_slow`, with %D an SMA
/// of `d_slow` over the slow %K. A zero high-low range yields `None`.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_fast: usize,
    k_slow: usize,
    d_slow: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut fast_k = Vec::with_capacity(close.len());

    for i in 0..close.len() {
        if i + 1 < k_fast || k_fast == 0 {
            fast_k.push(None);
            continue;
        }
        let window_high = high[i + 1 - k_fast..=i]
            .iter()
            .fold(f64::MIN, |a, &b| a.max(b));
        let window_low = low[i + 1 - k_fast..=i]
            .iter()
            .fold(f64::MAX, |a, &b| a.min(b));
        let range = window_high - window_low;

        if range == 0.0 {
            fast_k.push(None);
        } else {
            fast_k.push(Some((close[i] - window_low) / range * 100.0));
        }
    }

    let slow_k = sma_opt(&fast_k, k_slow);
    let slow_d = sma_opt(&slow_k, d_slow);

    (slow_k, slow_d)
}

/// Calculate VWAP, cumulative over the window
pub fn vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(close.len());
    let mut cum_pv = 0.0;
    let mut cum_vol = 0.0;

    for i in 0..close.len() {
        let typical = (high[i] + low[i] + close[i]) / 3.0;
        cum_pv += typical * volume[i];
        cum_vol += volume[i];

        if cum_vol == 0.0 {
            result.push(None);
        } else {
            result.push(Some(cum_pv / cum_vol));
        }
    }

    result
}

/// Calculate SuperTrend: (line, direction)
///
/// direction is +1 (bullish) or -1 (bearish), defined for index >= period,
/// seeded bullish. The line sits on the band opposite the trend.
pub fn supertrend(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    multiplier: f64,
) -> (Vec<Option<f64>>, Vec<Option<i32>>) {
    let len = close.len();
    let mut line = vec![None; len];
    let mut direction: Vec<Option<i32>> = vec![None; len];

    if len <= period || period == 0 {
        return (line, direction);
    }

    let atr_values = atr(high, low, close, period);

    let mut upper = vec![None; len];
    let mut lower = vec![None; len];
    for i in 0..len {
        if let Some(atr_val) = atr_values[i] {
            let hl2 = (high[i] + low[i]) / 2.0;
            upper[i] = Some(hl2 + multiplier * atr_val);
            lower[i] = Some(hl2 - multiplier * atr_val);
        }
    }

    for i in period..len {
        let (prev_upper, prev_lower) = match (upper[i - 1], lower[i - 1]) {
            (Some(u), Some(l)) => (u, l),
            _ => continue,
        };

        let dir = if close[i] > prev_upper {
            1
        } else if close[i] < prev_lower {
            -1
        } else if i == period {
            1
        } else {
            direction[i - 1].unwrap_or(1)
        };

        direction[i] = Some(dir);
        line[i] = if dir == 1 { lower[i] } else { upper[i] };
    }

    (line, direction)
}
