// Library crate - strategy evaluation, backtesting and live execution

pub mod api;
pub mod backtest;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod streams;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use types::*;
