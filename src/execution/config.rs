//! Configuration for the execution manager

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::types::Interval;

/// Whether orders are paper-filled or routed to a brokerage connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Orders fill locally at the reference price
    Paper,
    /// Orders go to a real brokerage account
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Configuration for live sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,

    /// Symbol traded when a start request names none
    pub default_symbol: String,

    /// Candle interval for live sessions
    pub default_interval: Interval,

    /// Capital used when a start request omits it
    pub default_capital: f64,

    /// Daily loss limit used when a start request omits it
    pub default_max_daily_loss: f64,

    /// Fraction of capital committed per position
    pub default_allocation: f64,

    /// Placements allowed in any trailing 60 seconds
    pub max_orders_per_minute: usize,

    /// Largest quantity a single order may carry
    pub max_qty_per_order: u32,

    /// Orders for symbols without this suffix are rejected (e.g. ".NS")
    pub allowed_symbol_suffix: Option<String>,

    /// Candles kept in the rolling evaluation window
    pub history_window: usize,

    /// Upper bound on one feed read
    #[serde(with = "millis")]
    pub feed_timeout: Duration,

    /// Cadence of the polling fallback
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            default_symbol: "RELIANCE.NS".to_string(),
            default_interval: Interval::Minute5,
            default_capital: 100_000.0,
            default_max_daily_loss: 5_000.0,
            default_allocation: 1.0,
            max_orders_per_minute: 5,
            max_qty_per_order: 1_000,
            allowed_symbol_suffix: None,
            history_window: 500,
            feed_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ExecutionConfig {
    /// Paper trading restricted to NSE symbols
    pub fn nse_paper() -> Self {
        Self {
            allowed_symbol_suffix: Some(".NS".to_string()),
            ..Default::default()
        }
    }

    /// Read overrides from the environment.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are a
    /// configuration error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(paper) = parse::<bool>(&lookup, "PAPER_MODE")? {
            config.mode = if paper {
                ExecutionMode::Paper
            } else {
                ExecutionMode::Live
            };
        }
        if let Some(symbol) = lookup("DEFAULT_SYMBOL").filter(|s| !s.trim().is_empty()) {
            config.default_symbol = symbol.trim().to_string();
        }
        if let Some(raw) = lookup("DEFAULT_INTERVAL") {
            config.default_interval = Interval::from_str(&raw)
                .map_err(|e| EngineError::configuration(format!("DEFAULT_INTERVAL: {e}")))?;
        }
        if let Some(v) = parse(&lookup, "DEFAULT_CAPITAL")? {
            config.default_capital = v;
        }
        if let Some(v) = parse(&lookup, "DEFAULT_MAX_DAILY_LOSS")? {
            config.default_max_daily_loss = v;
        }
        if let Some(v) = parse(&lookup, "DEFAULT_ALLOCATION")? {
            config.default_allocation = v;
        }
        if let Some(v) = parse(&lookup, "MAX_ORDERS_PER_MINUTE")? {
            config.max_orders_per_minute = v;
        }
        if let Some(v) = parse(&lookup, "MAX_QTY_PER_ORDER")? {
            config.max_qty_per_order = v;
        }
        if let Some(suffix) = lookup("ALLOWED_SYMBOL_SUFFIX") {
            let suffix = suffix.trim();
            config.allowed_symbol_suffix = (!suffix.is_empty()).then(|| suffix.to_string());
        }
        if let Some(v) = parse(&lookup, "HISTORY_WINDOW")? {
            config.history_window = v;
        }
        if let Some(ms) = parse(&lookup, "FEED_TIMEOUT_MS")? {
            config.feed_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_capital > 0.0) {
            return Err(EngineError::configuration("DEFAULT_CAPITAL must be positive"));
        }
        if !(self.default_max_daily_loss > 0.0) {
            return Err(EngineError::configuration("DEFAULT_MAX_DAILY_LOSS must be positive"));
        }
        if !(self.default_allocation > 0.0 && self.default_allocation <= 1.0) {
            return Err(EngineError::configuration("DEFAULT_ALLOCATION must be in (0, 1]"));
        }
        if self.max_orders_per_minute == 0 {
            return Err(EngineError::configuration("MAX_ORDERS_PER_MINUTE must be at least 1"));
        }
        if self.max_qty_per_order == 0 {
            return Err(EngineError::configuration("MAX_QTY_PER_ORDER must be at least 1"));
        }
        if self.history_window < 2 {
            return Err(EngineError::configuration("HISTORY_WINDOW must be at least 2"));
        }
        Ok(())
    }

    pub fn is_paper(&self) -> bool {
        self.mode == ExecutionMode::Paper
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EngineError::configuration(format!("{key}={raw:?}: {e}"))),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_paper_trading_setup() {
        let config = ExecutionConfig::from_lookup(env(&[])).unwrap();
        assert!(config.is_paper());
        assert_eq!(config.max_orders_per_minute, 5);
        assert_eq!(config.max_qty_per_order, 1000);
        assert_eq!(config.default_max_daily_loss, 5000.0);
        assert_eq!(config.default_interval, Interval::Minute5);
        assert_eq!(config.allowed_symbol_suffix, None);
    }

    #[test]
    fn reads_overrides() {
        let config = ExecutionConfig::from_lookup(env(&[
            ("PAPER_MODE", "false"),
            ("MAX_ORDERS_PER_MINUTE", "2"),
            ("ALLOWED_SYMBOL_SUFFIX", ".NS"),
            ("DEFAULT_INTERVAL", "1m"),
            ("FEED_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.mode, ExecutionMode::Live);
        assert_eq!(config.max_orders_per_minute, 2);
        assert_eq!(config.allowed_symbol_suffix.as_deref(), Some(".NS"));
        assert_eq!(config.default_interval, Interval::Minute1);
        assert_eq!(config.feed_timeout, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        for pairs in [
            [("MAX_ORDERS_PER_MINUTE", "lots")],
            [("DEFAULT_ALLOCATION", "1.5")],
            [("PAPER_MODE", "maybe")],
            [("DEFAULT_INTERVAL", "7m")],
        ] {
            let err = ExecutionConfig::from_lookup(env(&pairs)).unwrap_err();
            assert!(matches!(err, EngineError::Configuration(_)), "{pairs:?}");
        }
    }

    #[test]
    fn nse_preset_restricts_suffix() {
        assert_eq!(ExecutionConfig::nse_paper().allowed_symbol_suffix.as_deref(), Some(".NS"));
    }
}
