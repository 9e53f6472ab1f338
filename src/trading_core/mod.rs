//! Trading Core - strategy logic shared by the backtest and live paths
//!
//! This module contains:
//! - Indicator math over candle windows
//! - Strategy parameter parsing and the strategy book
//! - The pure signal evaluator

pub mod evaluator;
pub mod indicators;
pub mod strategy;

pub use evaluator::{evaluate, evaluate_json, Signal};
pub use strategy::{StrategyBook, StrategyDefinition, StrategyId, StrategyParams, StrategyRule};
