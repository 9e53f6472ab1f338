//! Price indicators used by the strategy rules
//!
//! All functions are pure over the supplied slice; values that fall inside the
//! warmup period are `None`.

use crate::types::Candle;

/// Exponential moving average over closes.
///
/// k = 2/(n+1), seeded with the SMA of the first `period` closes.
pub fn ema(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut values = Vec::with_capacity(candles.len());
    if period == 0 {
        values.resize(candles.len(), None);
        return values;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut sum = 0.0;
    let mut current = 0.0;

    for (i, candle) in candles.iter().enumerate() {
        if i + 1 < period {
            sum += candle.close;
            values.push(None);
        } else if i + 1 == period {
            sum += candle.close;
            current = sum / period as f64;
            values.push(Some(current));
        } else {
            current = candle.close * k + current * (1.0 - k);
            values.push(Some(current));
        }
    }

    values
}

/// True when the last `bars` closes are strictly increasing
pub fn rising(candles: &[Candle], bars: usize) -> bool {
    bars >= 2
        && candles.len() >= bars
        && candles[candles.len() - bars..]
            .windows(2)
            .all(|w| w[1].close > w[0].close)
}

/// True when the last `bars` closes are strictly decreasing
pub fn falling(candles: &[Candle], bars: usize) -> bool {
    bars >= 2
        && candles.len() >= bars
        && candles[candles.len() - bars..]
            .windows(2)
            .all(|w| w[1].close < w[0].close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::flat(start + Duration::minutes(i as i64), c, 100))
            .collect()
    }

    #[test]
    fn ema_warmup_is_none() {
        let values = ema(&candles(&[10.0, 20.0, 30.0, 40.0]), 3);
        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert!(values[2].is_some());
        assert!(values[3].is_some());
    }

    #[test]
    fn ema_seed_is_sma() {
        let values = ema(&candles(&[10.0, 20.0, 30.0]), 3);
        assert!((values[2].unwrap() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn ema_step() {
        let values = ema(&candles(&[10.0, 20.0, 30.0, 40.0]), 3);
        // k = 0.5: 40 * 0.5 + 20 * 0.5
        assert!((values[3].unwrap() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn ema_period_zero_is_all_none() {
        let values = ema(&candles(&[1.0, 2.0]), 0);
        assert_eq!(values, vec![None, None]);
    }

    #[test]
    fn rising_and_falling_runs() {
        let c = candles(&[100.0, 105.0, 95.0, 96.0, 97.0]);
        assert!(rising(&c[..2], 2));
        assert!(!rising(&c[..3], 2));
        assert!(falling(&c[..3], 2));
        assert!(rising(&c, 3));
        assert!(!rising(&c, 4));
    }

    #[test]
    fn short_window_is_never_a_run() {
        let c = candles(&[100.0]);
        assert!(!rising(&c, 2));
        assert!(!falling(&c, 2));
    }
}
