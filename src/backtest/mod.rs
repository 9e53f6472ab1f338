//! Backtesting - replays a strategy over stored candles with a simulated
//! position and cash ledger

mod engine;
mod metrics;

pub use engine::{simulate, BacktestEngine, Simulation};
pub use metrics::Metrics;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::TradeRecord;
use crate::trading_core::StrategyParams;
use crate::types::Interval;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Nominal starting cash for the equity curve
    pub initial_capital: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// One entry of a batch run
#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub symbol: String,
    pub interval: Interval,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub params: StrategyParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub interval: Interval,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
    pub candles_count: usize,
}
