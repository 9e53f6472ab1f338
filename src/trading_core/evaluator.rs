//! Strategy evaluation
//!
//! `evaluate` is a pure function of the candle window and the parameters, which
//! is what lets backtests and live sessions share it and stay deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::indicators::{ema, falling, rising};
use super::strategy::{StrategyParams, StrategyRule};
use crate::error::Result;
use crate::types::{Candle, Side};

/// Discrete strategy output for one time step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    EnterLong,
    EnterShort,
    Exit,
    Hold,
}

impl Signal {
    /// Side a position would take on this signal, if it is an entry
    pub fn entry_side(&self) -> Option<Side> {
        match self {
            Self::EnterLong => Some(Side::Long),
            Self::EnterShort => Some(Side::Short),
            Self::Exit | Self::Hold => None,
        }
    }

    /// Whether this signal closes a position held on `side`.
    ///
    /// An entry in the opposite direction closes the current position; the
    /// reversal itself is not taken on the same bar.
    pub fn closes(&self, side: Side) -> bool {
        match (self, side) {
            (Self::Exit, Side::Long | Side::Short) => true,
            (Self::EnterShort, Side::Long) | (Self::EnterLong, Side::Short) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnterLong => write!(f, "ENTER_LONG"),
            Self::EnterShort => write!(f, "ENTER_SHORT"),
            Self::Exit => write!(f, "EXIT"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Evaluate the strategy on the window ending at the last candle.
///
/// Windows shorter than the rule's lookback yield `Hold`.
pub fn evaluate(history: &[Candle], params: &StrategyParams) -> Signal {
    if history.len() < params.rule.lookback() {
        return Signal::Hold;
    }

    match params.rule {
        StrategyRule::EmaCross { fast, slow } => ema_cross(history, fast, slow, params.allow_short),
        StrategyRule::Momentum {
            entry_bars,
            exit_bars,
        } => {
            if rising(history, entry_bars) {
                Signal::EnterLong
            } else if falling(history, exit_bars) {
                bearish(params.allow_short)
            } else {
                Signal::Hold
            }
        }
    }
}

/// Parse raw parameters and evaluate; malformed params are a configuration error
pub fn evaluate_json(history: &[Candle], params: &Value) -> Result<Signal> {
    let params = StrategyParams::from_json(params)?;
    Ok(evaluate(history, &params))
}

fn ema_cross(history: &[Candle], fast: usize, slow: usize, allow_short: bool) -> Signal {
    let fast_line = ema(history, fast);
    let slow_line = ema(history, slow);
    let n = history.len();

    let (Some(fast_prev), Some(fast_now), Some(slow_prev), Some(slow_now)) = (
        fast_line[n - 2],
        fast_line[n - 1],
        slow_line[n - 2],
        slow_line[n - 1],
    ) else {
        return Signal::Hold;
    };

    if fast_prev <= slow_prev && fast_now > slow_now {
        Signal::EnterLong
    } else if fast_prev >= slow_prev && fast_now < slow_now {
        bearish(allow_short)
    } else {
        Signal::Hold
    }
}

fn bearish(allow_short: bool) -> Signal {
    if allow_short {
        Signal::EnterShort
    } else {
        Signal::Exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::flat(start + Duration::minutes(i as i64), c, 10))
            .collect()
    }

    #[test]
    fn momentum_signals_follow_price_runs() {
        let params = StrategyParams::momentum(2, 2);
        let c = candles(&[100.0, 105.0, 95.0, 110.0]);

        assert_eq!(evaluate(&c[..1], &params), Signal::Hold);
        assert_eq!(evaluate(&c[..2], &params), Signal::EnterLong);
        assert_eq!(evaluate(&c[..3], &params), Signal::Exit);
        assert_eq!(evaluate(&c[..4], &params), Signal::EnterLong);
    }

    #[test]
    fn momentum_shorts_when_allowed() {
        let params = StrategyParams::momentum(2, 2).with_shorts();
        let c = candles(&[105.0, 95.0]);
        assert_eq!(evaluate(&c, &params), Signal::EnterShort);
    }

    #[test]
    fn short_window_holds() {
        let params = StrategyParams::ema_cross(3, 5);
        assert_eq!(evaluate(&candles(&[1.0, 2.0, 3.0, 4.0, 5.0]), &params), Signal::Hold);
        assert_eq!(evaluate(&[], &params), Signal::Hold);
    }

    #[test]
    fn ema_cross_detects_upward_cross() {
        let params = StrategyParams::ema_cross(2, 4);
        // falling then a sharp jump on the last bar
        let c = candles(&[10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 12.0]);
        assert_eq!(evaluate(&c, &params), Signal::EnterLong);
        assert_eq!(evaluate(&c[..6], &params), Signal::Hold);
    }

    #[test]
    fn ema_cross_detects_downward_cross() {
        let c = candles(&[5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 2.0]);
        assert_eq!(evaluate(&c, &StrategyParams::ema_cross(2, 4)), Signal::Exit);
        assert_eq!(
            evaluate(&c, &StrategyParams::ema_cross(2, 4).with_shorts()),
            Signal::EnterShort
        );
    }

    #[test]
    fn evaluation_ignores_candles_after_the_window() {
        let params = StrategyParams::momentum(2, 2);
        let mut c = candles(&[100.0, 105.0, 95.0, 110.0]);
        let before = evaluate(&c[..2], &params);
        c[2].close = 1.0;
        c[3].close = 1_000.0;
        assert_eq!(evaluate(&c[..2], &params), before);
    }

    #[test]
    fn evaluate_json_surfaces_configuration_errors() {
        let c = candles(&[1.0, 2.0]);
        let err = evaluate_json(&c, &json!({"type": "momentum"})).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        let ok = evaluate_json(&c, &json!({"type": "momentum", "entry_bars": 2, "exit_bars": 2}));
        assert_eq!(ok.unwrap(), Signal::EnterLong);
    }

    #[test]
    fn opposite_entry_closes_position() {
        assert!(Signal::Exit.closes(Side::Long));
        assert!(Signal::EnterShort.closes(Side::Long));
        assert!(Signal::EnterLong.closes(Side::Short));
        assert!(!Signal::EnterLong.closes(Side::Long));
        assert!(!Signal::Hold.closes(Side::Short));
        assert!(!Signal::Exit.closes(Side::Flat));
    }
}
