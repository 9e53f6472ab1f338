//! Execution module for live and paper trading
//!
//! This module runs a strategy against a market data feed, validates each
//! order intent, routes orders through a broker and records fills in the
//! trade ledger.

mod broker;
mod config;
mod engine;
mod order;
mod position;
mod risk;
mod session;

pub use broker::{Broker, PaperBroker};
pub use config::{ExecutionConfig, ExecutionMode};
pub use engine::{ControlOutcome, ControlStatus, ExecutionManager, ManagerStatus, StartRequest};
pub use order::{Fill, OrderIntent, OrderRequest, OrderSide, OrderState};
pub use position::Position;
pub use risk::{daily_loss_breached, OrderGate, OrderRateLimiter, Rejection};
pub use session::{ExecutionEvent, LiveSession, LiveTrader, SessionSpec, SessionState, TickOutcome};
