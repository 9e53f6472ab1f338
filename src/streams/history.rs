//! Historical candle storage
//!
//! Candles are keyed by timestamp per (symbol, interval), so ordering and the
//! no-duplicate rule hold by construction.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::types::{Candle, Interval};

/// Read access to stored candle history
pub trait CandleSource: Send + Sync {
    /// Candles for `symbol`/`interval` with `from <= timestamp <= to`, ascending.
    ///
    /// Unknown symbols fail with `NotFound`; a known symbol with no candles in
    /// range yields an empty vec.
    fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>>;

    /// Most recent stored candle
    fn latest(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>>;

    fn symbols(&self) -> Vec<String>;
}

type Series = BTreeMap<DateTime<Utc>, Candle>;

/// In-memory candle store
#[derive(Debug, Default)]
pub struct CandleStore {
    series: RwLock<BTreeMap<(String, Interval), Series>>,
}

/// One row of the candle CSV format
#[derive(Debug, Deserialize)]
struct CandleRow {
    symbol: String,
    interval: Interval,
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candle, rejecting duplicate timestamps and inconsistent prices
    pub fn insert(&self, symbol: &str, interval: Interval, candle: Candle) -> Result<()> {
        if !(candle.low <= candle.open.min(candle.close) && candle.high >= candle.open.max(candle.close))
        {
            return Err(EngineError::validation(format!(
                "inconsistent candle for {symbol} at {}: o={} h={} l={} c={}",
                candle.timestamp, candle.open, candle.high, candle.low, candle.close
            )));
        }

        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let entries = series.entry((symbol.to_string(), interval)).or_default();
        if entries.contains_key(&candle.timestamp) {
            return Err(EngineError::validation(format!(
                "duplicate candle for {symbol} {interval} at {}",
                candle.timestamp
            )));
        }
        entries.insert(candle.timestamp, candle);
        Ok(())
    }

    pub fn extend(
        &self,
        symbol: &str,
        interval: Interval,
        candles: impl IntoIterator<Item = Candle>,
    ) -> Result<usize> {
        let mut count = 0;
        for candle in candles {
            self.insert(symbol, interval, candle)?;
            count += 1;
        }
        Ok(count)
    }

    /// Load `symbol,interval,timestamp,open,high,low,close,volume` rows
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let store = Self::new();
        let mut rdr = csv::Reader::from_reader(reader);
        let mut rows = 0usize;
        for row in rdr.deserialize() {
            let row: CandleRow = row?;
            let candle = Candle {
                timestamp: row.timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            };
            store.insert(&row.symbol, row.interval, candle)?;
            rows += 1;
        }
        debug!("Parsed {} candle rows", rows);
        Ok(store)
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let store = Self::from_csv_reader(file)?;
        info!(
            "Loaded candle dataset from {:?}: {} symbols",
            path,
            store.symbols().len()
        );
        Ok(store)
    }
}

impl CandleSource for CandleStore {
    fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        if !series.keys().any(|(s, _)| s == symbol) {
            return Err(EngineError::not_found("symbol", symbol));
        }
        let Some(entries) = series.get(&(symbol.to_string(), interval)) else {
            return Ok(Vec::new());
        };
        if matches!((from, to), (Some(f), Some(t)) if f > t) {
            return Ok(Vec::new());
        }

        let lower = from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let upper = to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(entries.range(lower..=upper).map(|(_, c)| *c).collect())
    }

    fn latest(&self, symbol: &str, interval: Interval) -> Result<Option<Candle>> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        if !series.keys().any(|(s, _)| s == symbol) {
            return Err(EngineError::not_found("symbol", symbol));
        }
        Ok(series
            .get(&(symbol.to_string(), interval))
            .and_then(|entries| entries.values().next_back().copied()))
    }

    fn symbols(&self) -> Vec<String> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let mut symbols: Vec<String> = series.keys().map(|(s, _)| s.clone()).collect();
        symbols.dedup();
        symbols
    }
}
