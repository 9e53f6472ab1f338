use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// OHLCV candle for one symbol/interval bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Candle {
    /// Flat candle where every price equals `price`
    pub fn flat(timestamp: DateTime<Utc>, price: f64, volume: u64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Live price update, finer grained than a candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: u64,
}

impl From<&Tick> for Candle {
    fn from(tick: &Tick) -> Self {
        Candle::flat(tick.timestamp, tick.price, tick.volume)
    }
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Minute30 => "30m",
            Self::Hour1 => "1h",
            Self::Day1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Minute1 => Duration::minutes(1),
            Self::Minute5 => Duration::minutes(5),
            Self::Minute15 => Duration::minutes(15),
            Self::Minute30 => Duration::minutes(30),
            Self::Hour1 => Duration::hours(1),
            Self::Day1 => Duration::days(1),
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::Minute5
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" | "minute" => Ok(Self::Minute1),
            "5m" | "5minute" => Ok(Self::Minute5),
            "15m" | "15minute" => Ok(Self::Minute15),
            "30m" | "30minute" => Ok(Self::Minute30),
            "1h" | "60m" | "60minute" => Ok(Self::Hour1),
            "1d" | "day" => Ok(Self::Day1),
            other => Err(EngineError::validation(format!("unknown interval '{other}'"))),
        }
    }
}

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    /// +1 for long, -1 for short, 0 when flat
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
            Self::Flat => 0.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Flat => write!(f, "FLAT"),
        }
    }
}

/// Parse an RFC 3339 timestamp, a naive `YYYY-MM-DD HH:MM:SS` (taken as UTC)
/// or a bare date. A bare date maps to the start of the day, or to its last
/// second when `end_of_day` is set, so date ranges are inclusive.
pub fn parse_timestamp(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, EngineError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| EngineError::validation(format!("invalid timestamp '{raw}'")))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| EngineError::validation(format!("invalid timestamp '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trips_through_str() {
        for interval in [Interval::Minute1, Interval::Minute15, Interval::Day1] {
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
        assert!("7m".parse::<Interval>().is_err());
    }

    #[test]
    fn interval_accepts_broker_aliases() {
        assert_eq!("day".parse::<Interval>().unwrap(), Interval::Day1);
        assert_eq!("60minute".parse::<Interval>().unwrap(), Interval::Hour1);
    }

    #[test]
    fn timestamps_accept_dates_and_rfc3339() {
        let start = parse_timestamp("2024-03-01", false).unwrap();
        let end = parse_timestamp("2024-03-01", true).unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-03-01T23:59:59+00:00");

        let offset = parse_timestamp("2024-03-01T09:15:00+05:30", false).unwrap();
        assert_eq!(offset.to_rfc3339(), "2024-03-01T03:45:00+00:00");
        assert_eq!(
            parse_timestamp("2024-03-01 09:15:00", false).unwrap().to_rfc3339(),
            "2024-03-01T09:15:00+00:00"
        );
        assert!(parse_timestamp("yesterday", false).is_err());
    }

    #[test]
    fn side_sign() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Flat.sign(), 0.0);
    }
}
