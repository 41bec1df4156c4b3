//! Trading strategies
//!
//! Every strategy is a pure rule over an OHLCV window producing a
//! [`Verdict`]. Strategies are values (name + weight + rule), registered with
//! the voting engine under a stable key. A strategy returns `Hold` whenever
//! its indicator is undefined on the last or second-to-last bar.

use crate::indicators::{bollinger_bands, ema, macd, rsi, sma, stochastic, supertrend, vwap};
use crate::types::Window;

/// Directional verdict of a single strategy or the combined vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Sell,
    Hold,
    Buy,
}

impl Verdict {
    /// Numeric value used in weighted voting: -1, 0, +1
    pub fn value(&self) -> f64 {
        match self {
            Verdict::Sell => -1.0,
            Verdict::Hold => 0.0,
            Verdict::Buy => 1.0,
        }
    }

    pub fn as_i8(&self) -> i8 {
        match self {
            Verdict::Sell => -1,
            Verdict::Hold => 0,
            Verdict::Buy => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Sell => "SELL",
            Verdict::Hold => "HOLD",
            Verdict::Buy => "BUY",
        }
    }
}

/// A named, weighted trading rule
pub struct Strategy {
    name: &'static str,
    weight: f64,
    rule: Box<dyn Fn(&Window) -> Verdict + Send + Sync>,
}

impl Strategy {
    pub(crate) fn new(
        name: &'static str,
        weight: f64,
        rule: impl Fn(&Window) -> Verdict + Send + Sync + 'static,
    ) -> Self {
        Strategy {
            name,
            weight,
            rule: Box::new(rule),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn verdict(&self, window: &Window) -> Verdict {
        if window.len() < 2 {
            return Verdict::Hold;
        }
        (self.rule)(window)
    }
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Last two entries of an indicator series, if both are defined
fn last_two<T: Copy>(series: &[Option<T>]) -> Option<(T, T)> {
    if series.len() < 2 {
        return None;
    }
    match (series[series.len() - 2], series[series.len() - 1]) {
        (Some(prev), Some(last)) => Some((prev, last)),
        _ => None,
    }
}

/// Golden/death cross of a short moving average over a long one
pub fn ma_crossover(short_period: usize, long_period: usize, use_ema: bool) -> Strategy {
    let name = if use_ema {
        "EMA Crossover"
    } else {
        "Moving Average Crossover"
    };
    Strategy::new(name, 1.0, move |window| {
        let (short_ma, long_ma) = if use_ema {
            (ema(&window.close, short_period), ema(&window.close, long_period))
        } else {
            (sma(&window.close, short_period), sma(&window.close, long_period))
        };

        let (Some((s_prev, s_last)), Some((l_prev, l_last))) =
            (last_two(&short_ma), last_two(&long_ma))
        else {
            return Verdict::Hold;
        };

        if s_prev <= l_prev && s_last > l_last {
            Verdict::Buy
        } else if s_prev >= l_prev && s_last < l_last {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    })
}

/// RSI mean reversion: buy on a fresh drop into oversold, sell on a fresh
/// push into overbought
pub fn rsi_mean_reversion(period: usize, overbought: f64, oversold: f64) -> Strategy {
    Strategy::new("RSI Mean Reversion", 0.8, move |window| {
        let series = rsi(&window.close, period);
        let Some((prev, last)) = last_two(&series) else {
            return Verdict::Hold;
        };

        if last < oversold && prev >= oversold {
            Verdict::Buy
        } else if last > overbought && prev <= overbought {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    })
}

/// Bollinger band mean reversion on band crossings
pub fn bollinger_reversion(period: usize, std_dev: f64) -> Strategy {
    Strategy::new("Bollinger Bands", 0.7, move |window| {
        let (upper, _, lower) = bollinger_bands(&window.close, period, std_dev);
        let (Some((upper_prev, upper_last)), Some((lower_prev, lower_last))) =
            (last_two(&upper), last_two(&lower))
        else {
            return Verdict::Hold;
        };

        let last = window.close[window.len() - 1];
        let prev = window.close[window.len() - 2];

        if prev >= lower_prev && last < lower_last {
            Verdict::Buy
        } else if prev <= upper_prev && last > upper_last {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    })
}

/// MACD line crossing its signal line
pub fn macd_crossover(fast: usize, slow: usize, signal: usize) -> Strategy {
    Strategy::new("MACD", 1.0, move |window| {
        let (line, signal_line, _) = macd(&window.close, fast, slow, signal);
        let (Some((line_prev, line_last)), Some((sig_prev, sig_last))) =
            (last_two(&line), last_two(&signal_line))
        else {
            return Verdict::Hold;
        };

        if line_prev <= sig_prev && line_last > sig_last {
            Verdict::Buy
        } else if line_prev >= sig_prev && line_last < sig_last {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    })
}

/// VWAP crossing with volume confirmation on the buy side
pub fn vwap_cross(volume_mult: f64) -> Strategy {
    Strategy::new("VWAP", 0.9, move |window| {
        let series = vwap(&window.high, &window.low, &window.close, &window.volume);
        let avg_volume = sma(&window.volume, 20);

        let (Some((vwap_prev, vwap_last)), Some((_, avg_vol_last))) =
            (last_two(&series), last_two(&avg_volume))
        else {
            return Verdict::Hold;
        };

        let last = window.close[window.len() - 1];
        let prev = window.close[window.len() - 2];
        let volume_confirmed =
            window.volume[window.len() - 1] > avg_vol_last * volume_mult;

        if prev <= vwap_prev && last > vwap_last && volume_confirmed {
            Verdict::Buy
        } else if prev >= vwap_prev && last < vwap_last {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    })
}

/// SuperTrend direction flips
pub fn supertrend_flip(period: usize, multiplier: f64) -> Strategy {
    Strategy::new("SuperTrend", 1.2, move |window| {
        let (_, direction) = supertrend(
            &window.high,
            &window.low,
            &window.close,
            period,
            multiplier,
        );
        let Some((prev, last)) = last_two(&direction) else {
            return Verdict::Hold;
        };

        if prev == -1 && last == 1 {
            Verdict::Buy
        } else if prev == 1 && last == -1 {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    })
}

/// Combined Stochastic + RSI oscillator agreement
pub fn stoch_rsi(rsi_period: usize, stoch_period: usize) -> Strategy {
    Strategy::new("Stochastic RSI", 0.8, move |window| {
        let rsi_series = rsi(&window.close, rsi_period);
        let (slow_k, _) = stochastic(
            &window.high,
            &window.low,
            &window.close,
            stoch_period,
            3,
            3,
        );

        let (Some((_, rsi_last)), Some((_, k_last))) =
            (last_two(&rsi_series), last_two(&slow_k))
        else {
            return Verdict::Hold;
        };

        if rsi_last < 30.0 && k_last < 20.0 {
            Verdict::Buy
        } else if rsi_last > 70.0 && k_last > 80.0 {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, Window};
    use chrono::{Duration, Utc};

    /// Window with high/low bracketing each close by +/- spread
    pub(crate) fn window_from_closes(closes: &[f64], spread: f64) -> Window {
        let start = Utc::now() - Duration::minutes(closes.len() as i64);
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                datetime: start + Duration::minutes(i as i64),
                open: c,
                high: c + spread,
                low: c - spread,
                close: c,
                volume: 1000.0,
            })
            .collect();
        Window::from_candles(&candles)
    }

    /// The golden-cross fixture: SMA(20) crosses above SMA(50) only on the
    /// final bar, while every other registry strategy stays quiet.
    pub(crate) fn golden_cross_window() -> Window {
        let mut closes = Vec::new();
        closes.extend(std::iter::repeat(160.0).take(20));
        closes.extend(std::iter::repeat(100.0).take(14));
        for i in 0..18 {
            closes.push(104.0 + 4.0 * i as f64);
        }
        closes.push(140.0);
        window_from_closes(&closes, 2.0)
    }

    #[test]
    fn test_short_window_holds() {
        let window = window_from_closes(&[100.0], 1.0);
        assert_eq!(ma_crossover(20, 50, false).verdict(&window), Verdict::Hold);
        assert_eq!(rsi_mean_reversion(14, 70.0, 30.0).verdict(&window), Verdict::Hold);
        assert_eq!(supertrend_flip(10, 3.0).verdict(&window), Verdict::Hold);
    }

    #[test]
    fn test_golden_cross_fires_only_ma_crossover() {
        let window = golden_cross_window();
        assert!(window.len() >= 50);

        assert_eq!(ma_crossover(20, 50, false).verdict(&window), Verdict::Buy);

        // Same bars, every other default strategy holds
        assert_eq!(ma_crossover(12, 26, true).verdict(&window), Verdict::Hold);
        assert_eq!(rsi_mean_reversion(14, 70.0, 30.0).verdict(&window), Verdict::Hold);
        assert_eq!(bollinger_reversion(20, 2.0).verdict(&window), Verdict::Hold);
        assert_eq!(macd_crossover(12, 26, 9).verdict(&window), Verdict::Hold);
        assert_eq!(vwap_cross(1.5).verdict(&window), Verdict::Hold);
        assert_eq!(supertrend_flip(10, 3.0).verdict(&window), Verdict::Hold);
        assert_eq!(stoch_rsi(14, 14).verdict(&window), Verdict::Hold);
    }

    #[test]
    fn test_ma_crossover_death_cross() {
        let window = window_from_closes(&[10.0, 10.0, 10.0, 10.0, 4.0], 0.5);
        assert_eq!(ma_crossover(2, 3, false).verdict(&window), Verdict::Sell);

        let window = window_from_closes(&[10.0, 10.0, 10.0, 10.0, 16.0], 0.5);
        assert_eq!(ma_crossover(2, 3, false).verdict(&window), Verdict::Buy);
    }

    #[test]
    fn test_rsi_reversion_crossings() {
        // Gains then a hard drop: RSI crosses down through the oversold line
        let window = window_from_closes(&[100.0, 101.0, 102.0, 103.0, 95.0], 0.5);
        assert_eq!(rsi_mean_reversion(3, 70.0, 30.0).verdict(&window), Verdict::Buy);

        // Losses then a hard rally: RSI crosses up through the overbought line
        let window = window_from_closes(&[100.0, 99.0, 98.0, 97.0, 105.0], 0.5);
        assert_eq!(rsi_mean_reversion(3, 70.0, 30.0).verdict(&window), Verdict::Sell);

        // Staying inside the band is not a signal
        let window = window_from_closes(&[100.0, 101.0, 100.0, 101.0, 100.0], 0.5);
        assert_eq!(rsi_mean_reversion(3, 70.0, 30.0).verdict(&window), Verdict::Hold);
    }

    #[test]
    fn test_bollinger_band_crossings() {
        let window = window_from_closes(&[10.0, 10.0, 10.0, 10.0, 4.0], 0.5);
        assert_eq!(bollinger_reversion(3, 1.0).verdict(&window), Verdict::Buy);

        let window = window_from_closes(&[10.0, 10.0, 10.0, 10.0, 16.0], 0.5);
        assert_eq!(bollinger_reversion(3, 1.0).verdict(&window), Verdict::Sell);
    }

    #[test]
    fn test_macd_cross_up() {
        let mut closes = vec![10.0; 10];
        closes.push(12.0);
        let window = window_from_closes(&closes, 0.5);
        assert_eq!(macd_crossover(2, 4, 2).verdict(&window), Verdict::Buy);

        let mut closes = vec![10.0; 10];
        closes.push(8.0);
        let window = window_from_closes(&closes, 0.5);
        assert_eq!(macd_crossover(2, 4, 2).verdict(&window), Verdict::Sell);
    }

    #[test]
    fn test_vwap_cross_needs_volume_on_buys() {
        let start = Utc::now() - Duration::minutes(21);
        let mut candles: Vec<Candle> = (0..20)
            .map(|i| Candle {
                datetime: start + Duration::minutes(i as i64),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.0,
                volume: 1000.0,
            })
            .collect();
        // Upward cross on triple the average volume
        candles.push(Candle {
            datetime: start + Duration::minutes(20),
            open: 10.0,
            high: 12.0,
            low: 10.0,
            close: 11.0,
            volume: 3000.0,
        });
        let window = Window::from_candles(&candles);
        assert_eq!(vwap_cross(1.5).verdict(&window), Verdict::Buy);

        // Same cross on average volume: filtered out
        let mut quiet = candles.clone();
        quiet[20].volume = 1000.0;
        let window = Window::from_candles(&quiet);
        assert_eq!(vwap_cross(1.5).verdict(&window), Verdict::Hold);
    }

    #[test]
    fn test_vwap_cross_down_has_no_volume_filter() {
        let mut closes = vec![11.0; 20];
        closes.push(9.0);
        let window = window_from_closes(&closes, 1.0);
        assert_eq!(vwap_cross(1.5).verdict(&window), Verdict::Sell);
    }

    #[test]
    fn test_supertrend_flip_to_bullish() {
        let window = window_from_closes(&[10.0, 10.0, 10.0, 5.0, 5.0, 12.0], 1.0);
        assert_eq!(supertrend_flip(2, 1.0).verdict(&window), Verdict::Buy);

        // No flip while the trend persists
        let window = window_from_closes(&[10.0, 10.0, 10.0, 10.0, 10.0, 10.0], 1.0);
        assert_eq!(supertrend_flip(2, 1.0).verdict(&window), Verdict::Hold);
    }

    #[test]
    fn test_stoch_rsi_double_oversold_and_overbought() {
        let closes: Vec<f64> = (0..8).map(|i| 170.0 - 10.0 * i as f64).collect();
        let window = window_from_closes(&closes, 1.0);
        assert_eq!(stoch_rsi(2, 2).verdict(&window), Verdict::Buy);

        let closes: Vec<f64> = (0..8).map(|i| 100.0 + 10.0 * i as f64).collect();
        let window = window_from_closes(&closes, 1.0);
        assert_eq!(stoch_rsi(2, 2).verdict(&window), Verdict::Sell);
    }

    #[test]
    fn test_verdict_domain_over_long_windows() {
        let window = golden_cross_window();
        for strategy in [
            ma_crossover(20, 50, false),
            ma_crossover(12, 26, true),
            rsi_mean_reversion(14, 70.0, 30.0),
            bollinger_reversion(20, 2.0),
            macd_crossover(12, 26, 9),
            vwap_cross(1.5),
            supertrend_flip(10, 3.0),
            stoch_rsi(14, 14),
        ] {
            let v = strategy.verdict(&window);
            assert!(matches!(v, Verdict::Buy | Verdict::Hold | Verdict::Sell));
        }
    }
}
