//! Strategy definitions, parameter parsing and the in-memory strategy book

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::error::{EngineError, Result};

pub type StrategyId = u64;

/// Keys that may ride along in a stored payload without affecting evaluation
const METADATA_KEYS: &[&str] = &["name", "symbol", "interval"];

/// Signal rule selected by the `type` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyRule {
    /// Fast EMA crossing the slow EMA
    EmaCross { fast: usize, slow: usize },
    /// Run of strictly rising closes enters, run of falling closes exits
    Momentum { entry_bars: usize, exit_bars: usize },
}

impl StrategyRule {
    /// Number of candles needed before the rule can emit anything but HOLD
    pub fn lookback(&self) -> usize {
        match self {
            // one extra bar to compare against for the crossover
            Self::EmaCross { slow, .. } => slow + 1,
            Self::Momentum {
                entry_bars,
                exit_bars,
            } => (*entry_bars).max(*exit_bars),
        }
    }
}

/// Parsed, validated strategy parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyParams {
    #[serde(flatten)]
    pub rule: StrategyRule,
    /// Units traded per position in backtests
    pub qty: u32,
    /// Falling signals open shorts instead of only exiting longs
    pub allow_short: bool,
}

impl StrategyParams {
    pub fn ema_cross(fast: usize, slow: usize) -> Self {
        Self {
            rule: StrategyRule::EmaCross { fast, slow },
            qty: 1,
            allow_short: false,
        }
    }

    pub fn momentum(entry_bars: usize, exit_bars: usize) -> Self {
        Self {
            rule: StrategyRule::Momentum {
                entry_bars,
                exit_bars,
            },
            qty: 1,
            allow_short: false,
        }
    }

    pub fn with_qty(mut self, qty: u32) -> Self {
        self.qty = qty;
        self
    }

    pub fn with_shorts(mut self) -> Self {
        self.allow_short = true;
        self
    }

    /// Parse a JSON parameter mapping.
    ///
    /// Unknown keys and out-of-range values are rejected; nothing is defaulted
    /// except `qty` and `allow_short`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| EngineError::configuration("strategy params must be a JSON object"))?;

        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::configuration("missing strategy 'type'"))?;

        let (rule, rule_keys): (StrategyRule, &[&str]) = match kind {
            "ema_cross" => {
                let fast = required_count(map, "fast")?;
                let slow = required_count(map, "slow")?;
                if fast >= slow {
                    return Err(EngineError::configuration(format!(
                        "ema_cross requires fast < slow (got fast={fast}, slow={slow})"
                    )));
                }
                (StrategyRule::EmaCross { fast, slow }, &["fast", "slow"])
            }
            "momentum" => {
                let entry_bars = required_count(map, "entry_bars")?;
                let exit_bars = required_count(map, "exit_bars")?;
                if entry_bars < 2 || exit_bars < 2 {
                    return Err(EngineError::configuration(
                        "momentum entry_bars and exit_bars must be at least 2",
                    ));
                }
                (
                    StrategyRule::Momentum {
                        entry_bars,
                        exit_bars,
                    },
                    &["entry_bars", "exit_bars"],
                )
            }
            other => {
                return Err(EngineError::configuration(format!(
                    "unknown strategy type '{other}'"
                )))
            }
        };

        for key in map.keys() {
            let known = key == "type"
                || key == "qty"
                || key == "allow_short"
                || rule_keys.contains(&key.as_str())
                || METADATA_KEYS.contains(&key.as_str());
            if !known {
                return Err(EngineError::configuration(format!(
                    "unknown parameter '{key}' for strategy type '{kind}'"
                )));
            }
        }

        let qty = match map.get("qty") {
            None => 1,
            Some(_) => {
                let qty = required_count(map, "qty")?;
                u32::try_from(qty)
                    .map_err(|_| EngineError::configuration("'qty' is too large"))?
            }
        };

        let allow_short = match map.get("allow_short") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(EngineError::configuration("'allow_short' must be a boolean"))
            }
        };

        Ok(Self {
            rule,
            qty,
            allow_short,
        })
    }
}

/// Reads a strictly positive integer parameter
fn required_count(map: &Map<String, Value>, key: &str) -> Result<usize> {
    let value = map
        .get(key)
        .ok_or_else(|| EngineError::configuration(format!("missing parameter '{key}'")))?;
    match value.as_u64() {
        Some(n) if n > 0 => usize::try_from(n)
            .map_err(|_| EngineError::configuration(format!("'{key}' is too large"))),
        _ => Err(EngineError::configuration(format!(
            "'{key}' must be a positive integer, got {value}"
        ))),
    }
}

/// Named strategy stored by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub id: StrategyId,
    pub name: String,
    pub params: Value,
    pub created_at: DateTime<Utc>,
}

impl StrategyDefinition {
    pub fn parsed_params(&self) -> Result<StrategyParams> {
        StrategyParams::from_json(&self.params)
    }
}

#[derive(Debug, Default)]
struct BookInner {
    strategies: BTreeMap<StrategyId, Arc<StrategyDefinition>>,
    next_id: StrategyId,
}

/// Registry of strategy definitions referenced by backtest and live requests
#[derive(Debug, Default)]
pub struct StrategyBook {
    inner: RwLock<BookInner>,
}

impl StrategyBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a definition. Params are kept as given; parse failures surface
    /// when the strategy is used.
    pub fn create(&self, name: impl Into<String>, params: Value) -> Arc<StrategyDefinition> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let definition = Arc::new(StrategyDefinition {
            id: inner.next_id,
            name: name.into(),
            params,
            created_at: Utc::now(),
        });
        inner.strategies.insert(definition.id, definition.clone());
        info!("Stored strategy {} '{}'", definition.id, definition.name);
        definition
    }

    pub fn get(&self, id: StrategyId) -> Result<Arc<StrategyDefinition>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .strategies
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("strategy", id))
    }

    pub fn list(&self) -> Vec<Arc<StrategyDefinition>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .strategies
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ema_cross_payload_with_metadata() {
        let params = StrategyParams::from_json(&json!({
            "name": "E2E EMA", "type": "ema_cross", "fast": 5, "slow": 13,
            "symbol": "RELIANCE.NS", "interval": "1d"
        }))
        .unwrap();
        assert_eq!(params.rule, StrategyRule::EmaCross { fast: 5, slow: 13 });
        assert_eq!(params.qty, 1);
        assert!(!params.allow_short);
        assert_eq!(params.rule.lookback(), 14);
    }

    #[test]
    fn parses_momentum_with_qty_and_shorts() {
        let params = StrategyParams::from_json(&json!({
            "type": "momentum", "entry_bars": 2, "exit_bars": 3, "qty": 10, "allow_short": true
        }))
        .unwrap();
        assert_eq!(params, StrategyParams::momentum(2, 3).with_qty(10).with_shorts());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = StrategyParams::from_json(&json!({
            "type": "momentum", "entry_bars": 2, "exit_bars": 2, "stop_loss": 5
        }))
        .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().contains("stop_loss"));
    }

    #[test]
    fn rejects_malformed_values() {
        for payload in [
            json!({"type": "ema_cross", "fast": 13, "slow": 5}),
            json!({"type": "ema_cross", "fast": 0, "slow": 5}),
            json!({"type": "ema_cross", "fast": "5", "slow": 13}),
            json!({"type": "ema_cross", "fast": 5}),
            json!({"type": "momentum", "entry_bars": 1, "exit_bars": 2}),
            json!({"type": "momentum", "entry_bars": 2, "exit_bars": 2, "allow_short": "yes"}),
            json!({"type": "grid", "levels": 4}),
            json!({"fast": 5, "slow": 13}),
            json!([1, 2, 3]),
        ] {
            let err = StrategyParams::from_json(&payload).unwrap_err();
            assert!(
                matches!(err, EngineError::Configuration(_)),
                "expected configuration error for {payload}"
            );
        }
    }

    #[test]
    fn book_assigns_sequential_ids() {
        let book = StrategyBook::new();
        let a = book.create("a", json!({"type": "momentum", "entry_bars": 2, "exit_bars": 2}));
        let b = book.create("b", json!({"type": "oops"}));
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(book.list().len(), 2);
        assert!(book.get(2).unwrap().parsed_params().is_err());
        assert!(matches!(book.get(9), Err(EngineError::NotFound { .. })));
    }
}
