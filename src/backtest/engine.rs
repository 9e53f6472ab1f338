use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::metrics::Metrics;
use super::{BacktestConfig, BacktestReport, BacktestRequest, EquityPoint};
use crate::error::Result;
use crate::ledger::{NewTrade, TradeId, TradeRecord};
use crate::streams::CandleSource;
use crate::trading_core::{evaluate, StrategyDefinition, StrategyId, StrategyParams};
use crate::types::{Candle, Interval};

/// Output of a single pass over a candle series
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Replay `params` over `candles`.
///
/// At step t the evaluator sees `candles[..=t]` only. Fills happen at the
/// candle close. A position still open on the last candle is closed there, and
/// no position is opened on the last candle.
pub fn simulate(
    candles: &[Candle],
    params: &StrategyParams,
    symbol: &str,
    strategy_id: Option<StrategyId>,
    initial_capital: f64,
) -> Result<Simulation> {
    let mut trades = Vec::new();
    let mut equity_curve = Vec::with_capacity(candles.len());
    let mut open: Option<TradeRecord> = None;
    let mut realized = 0.0;
    let mut next_id: TradeId = 1;

    for (t, candle) in candles.iter().enumerate() {
        let last = t + 1 == candles.len();
        let signal = evaluate(&candles[..=t], params);

        match open.as_mut() {
            Some(position) => {
                if signal.closes(position.side) || last {
                    realized += position.finalize(candle.close, candle.timestamp)?;
                    trades.extend(open.take());
                }
            }
            None if !last => {
                if let Some(side) = signal.entry_side() {
                    open = Some(TradeRecord::open(
                        next_id,
                        NewTrade {
                            strategy_id,
                            symbol: symbol.to_string(),
                            side,
                            qty: params.qty,
                            entry_price: candle.close,
                            opened_at: candle.timestamp,
                        },
                    )?);
                    next_id += 1;
                }
            }
            None => {}
        }

        let unrealized = open.as_ref().map_or(0.0, |p| p.pnl_at(candle.close));
        equity_curve.push(EquityPoint {
            timestamp: candle.timestamp,
            equity: initial_capital + realized + unrealized,
        });
    }

    Ok(Simulation {
        trades,
        equity_curve,
    })
}

/// Runs strategies over stored history. Holds no mutable state, so runs are
/// independent and may execute in parallel.
pub struct BacktestEngine {
    source: Arc<dyn CandleSource>,
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(source: Arc<dyn CandleSource>, config: BacktestConfig) -> Self {
        Self { source, config }
    }

    pub fn run(
        &self,
        symbol: &str,
        interval: Interval,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        params: &StrategyParams,
    ) -> Result<BacktestReport> {
        self.run_inner(symbol, interval, from, to, params, None)
    }

    /// Same as `run`, with raw JSON params
    pub fn run_json(
        &self,
        symbol: &str,
        interval: Interval,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        params: &Value,
    ) -> Result<BacktestReport> {
        let params = StrategyParams::from_json(params)?;
        self.run(symbol, interval, from, to, &params)
    }

    /// Backtest a stored strategy; trades carry its id
    pub fn run_definition(
        &self,
        definition: &StrategyDefinition,
        symbol: &str,
        interval: Interval,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<BacktestReport> {
        let params = definition.parsed_params()?;
        self.run_inner(symbol, interval, from, to, &params, Some(definition.id))
    }

    /// Run independent requests in parallel; results keep request order
    pub fn run_batch(&self, requests: &[BacktestRequest]) -> Vec<Result<BacktestReport>> {
        let started = Instant::now();
        let reports: Vec<Result<BacktestReport>> = requests
            .par_iter()
            .map(|req| self.run(&req.symbol, req.interval, req.from, req.to, &req.params))
            .collect();
        info!(
            "Batch of {} backtests finished in {:.2?}",
            requests.len(),
            started.elapsed()
        );
        reports
    }

    fn run_inner(
        &self,
        symbol: &str,
        interval: Interval,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        params: &StrategyParams,
        strategy_id: Option<StrategyId>,
    ) -> Result<BacktestReport> {
        let candles = self.source.candles(symbol, interval, from, to)?;
        debug!(
            "Backtesting {} {} over {} candles with {:?}",
            symbol,
            interval,
            candles.len(),
            params.rule
        );

        let sim = simulate(
            &candles,
            params,
            symbol,
            strategy_id,
            self.config.initial_capital,
        )?;
        let metrics = Metrics::compute(&sim.trades, &sim.equity_curve);

        info!(
            "Backtest {} {}: {} candles, {} trades, P&L {:.2}",
            symbol,
            interval,
            candles.len(),
            metrics.trades,
            metrics.total_pnl
        );

        Ok(BacktestReport {
            symbol: symbol.to_string(),
            interval,
            from,
            to,
            trades: sim.trades,
            equity_curve: sim.equity_curve,
            metrics,
            candles_count: candles.len(),
        })
    }
}
