//! Multi-strategy voting engine
//!
//! Holds the strategy registry and combines the verdicts of the active
//! strategies into one weighted signal. External strategy names (as stored by
//! the configuration backend) are resolved to registry keys by substring
//! matching over a priority-ordered pattern list.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::config::IndicatorConfig;
use crate::strategy::{
    bollinger_reversion, ma_crossover, macd_crossover, rsi_mean_reversion, stoch_rsi,
    supertrend_flip, vwap_cross, Strategy, Verdict,
};

/// Weighted-average magnitude required before the combined verdict leaves
/// Hold. The comparison is strict: exactly +/-0.30 is still Hold.
const COMBINED_THRESHOLD: f64 = 0.30;

/// Registry keys in canonical order
pub const STRATEGY_KEYS: &[&str] = &[
    "ma_crossover",
    "ema_crossover",
    "rsi",
    "bollinger",
    "macd",
    "vwap",
    "supertrend",
    "stoch_rsi",
];

/// External-name patterns in priority order. More specific patterns must come
/// first: "macd" and "ema" are tested before "ma", "stoch" before "rsi".
const NAME_PATTERNS: &[(&str, &str)] = &[
    ("macd", "macd"),
    ("ema", "ema_crossover"),
    ("supertrend", "supertrend"),
    ("super trend", "supertrend"),
    ("stoch", "stoch_rsi"),
    ("bollinger", "bollinger"),
    ("vwap", "vwap"),
    ("rsi", "rsi"),
    ("ma_crossover", "ma_crossover"),
    ("moving average", "ma_crossover"),
    ("sma", "ma_crossover"),
    ("crossover", "ma_crossover"),
];

/// Resolve external strategy names to registry keys.
///
/// Unrecognized names are dropped; duplicates keep their first occurrence.
pub fn map_strategy_names(names: &[String]) -> Vec<&'static str> {
    let mut keys = Vec::new();
    for name in names {
        let lower = name.to_lowercase();
        if let Some((_, key)) = NAME_PATTERNS.iter().find(|(pat, _)| lower.contains(pat)) {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
    }
    keys
}

/// Outcome of one voting round
#[derive(Debug)]
pub struct Vote {
    pub combined: Verdict,
    /// Per-strategy verdicts, one entry per active key
    pub signals: BTreeMap<&'static str, Verdict>,
}

impl Vote {
    /// Fraction of active strategies agreeing with the combined verdict
    pub fn confidence(&self) -> f64 {
        if self.signals.is_empty() {
            return 0.0;
        }
        let agreeing = self
            .signals
            .values()
            .filter(|v| **v == self.combined)
            .count();
        agreeing as f64 / self.signals.len() as f64
    }
}

/// Registry of weighted strategies plus the combination rule
pub struct VotingEngine {
    strategies: HashMap<&'static str, Strategy>,
}

impl VotingEngine {
    /// Build the full default registry from indicator configuration
    pub fn new(cfg: &IndicatorConfig) -> Self {
        let mut strategies = HashMap::new();
        strategies.insert(
            "ma_crossover",
            ma_crossover(cfg.sma_short, cfg.sma_long, false),
        );
        strategies.insert(
            "ema_crossover",
            ma_crossover(cfg.ema_short, cfg.ema_long, true),
        );
        strategies.insert(
            "rsi",
            rsi_mean_reversion(cfg.rsi_period, cfg.rsi_overbought, cfg.rsi_oversold),
        );
        strategies.insert(
            "bollinger",
            bollinger_reversion(cfg.bollinger_period, cfg.bollinger_std),
        );
        strategies.insert(
            "macd",
            macd_crossover(cfg.macd_fast, cfg.macd_slow, cfg.macd_signal),
        );
        strategies.insert("vwap", vwap_cross(cfg.vwap_volume_mult));
        strategies.insert(
            "supertrend",
            supertrend_flip(cfg.supertrend_period, cfg.supertrend_multiplier),
        );
        strategies.insert(
            "stoch_rsi",
            stoch_rsi(cfg.rsi_period, cfg.stochastic_period),
        );
        VotingEngine { strategies }
    }

    /// Registry with explicit contents, used by tests
    pub fn with_strategies(entries: Vec<(&'static str, Strategy)>) -> Self {
        VotingEngine {
            strategies: entries.into_iter().collect(),
        }
    }

    pub fn strategy_keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = self.strategies.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Evaluate every active strategy and combine the weighted verdicts.
    ///
    /// Every active key that is present in the registry gets an entry in
    /// `signals`; unknown keys contribute a Hold with zero weight.
    pub fn evaluate(&self, window: &crate::types::Window, active_keys: &[&'static str]) -> Vote {
        let mut signals = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for &key in active_keys {
            match self.strategies.get(key) {
                Some(strategy) => {
                    let verdict = strategy.verdict(window);
                    signals.insert(key, verdict);
                    weighted_sum += verdict.value() * strategy.weight();
                    total_weight += strategy.weight();
                }
                None => {
                    signals.insert(key, Verdict::Hold);
                }
            }
        }

        let normalized = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        };

        let combined = if normalized > COMBINED_THRESHOLD {
            Verdict::Buy
        } else if normalized < -COMBINED_THRESHOLD {
            Verdict::Sell
        } else {
            Verdict::Hold
        };

        Vote { combined, signals }
    }
}
