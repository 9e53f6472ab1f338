//! Live session state and per-tick processing
//!
//! [`LiveTrader`] is synchronous: one call to `on_candle` runs the whole
//! mark → evaluate → validate → place → record sequence before returning, so
//! the caller only needs to hold the session lock for the duration of a tick.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::broker::Broker;
use super::config::ExecutionConfig;
use super::order::{Fill, OrderIntent, OrderRequest, OrderSide, OrderState};
use super::position::Position;
use super::risk::{daily_loss_breached, OrderGate, Rejection};
use crate::error::{EngineError, Result};
use crate::ledger::{NewTrade, PositionSnapshot, TradeId, TradeLedger, TradeRecord};
use crate::trading_core::{evaluate, Signal, StrategyId, StrategyParams};
use crate::types::{Candle, Interval, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Stopped,
    Running,
    Halted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

/// Events emitted by the execution manager
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    SessionStarted {
        session_id: Uuid,
        strategy_id: StrategyId,
        symbol: String,
    },
    PositionOpened {
        trade_id: TradeId,
        side: Side,
        quantity: u32,
        price: f64,
    },
    PositionClosed {
        trade_id: TradeId,
        price: f64,
        pnl: f64,
        running_pnl: f64,
    },
    OrderRejected {
        reason: String,
    },
    /// Broker token expired; the user must re-authenticate
    ReauthRequired,
    Halted {
        running_pnl: f64,
        max_daily_loss: f64,
    },
    FeedUnavailable {
        reason: String,
    },
    /// The broker filled an order the session could not book
    FillUnrecorded {
        order_id: Uuid,
        reason: String,
    },
    SessionStopped {
        session_id: Uuid,
        realized_pnl: f64,
    },
}

/// Session data visible to callers
#[derive(Debug, Clone, Serialize)]
pub struct LiveSession {
    pub id: Uuid,
    pub strategy_id: StrategyId,
    pub symbol: String,
    pub interval: Interval,
    pub capital: f64,
    pub max_daily_loss: f64,
    pub allocation: f64,
    /// Realized PnL of closed trades since session start
    pub realized_pnl: f64,
    /// Realized plus unrealized at the last seen price
    pub running_pnl: f64,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub last_price: Option<f64>,
    pub position: Position,
    pub ticks: u64,
    pub orders_placed: u64,
}

/// Result of processing one candle
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Session is not running
    Ignored,
    Held,
    Opened { trade_id: TradeId, side: Side, quantity: u32, price: f64 },
    Closed { trade_id: TradeId, pnl: f64, halted: bool },
    Rejected(Rejection),
    Halted(Rejection),
    /// Passed validation but the broker refused the order
    OrderFailed(String),
    /// Filled but not booked; the session is halted
    FillUnrecorded(String),
}

/// Session parameters fixed at start
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub strategy_id: StrategyId,
    pub params: StrategyParams,
    pub symbol: String,
    pub interval: Interval,
    pub capital: f64,
    pub max_daily_loss: f64,
    pub allocation: f64,
}

pub struct LiveTrader {
    session: LiveSession,
    params: StrategyParams,
    history: VecDeque<Candle>,
    window: usize,
    max_qty: u32,
    gate: OrderGate,
    broker: Arc<dyn Broker>,
    ledger: Arc<TradeLedger>,
    events: broadcast::Sender<ExecutionEvent>,
}

impl LiveTrader {
    pub fn new(
        spec: SessionSpec,
        config: &ExecutionConfig,
        broker: Arc<dyn Broker>,
        ledger: Arc<TradeLedger>,
        events: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        let session = LiveSession {
            id: Uuid::new_v4(),
            strategy_id: spec.strategy_id,
            position: Position::flat(&spec.symbol),
            symbol: spec.symbol,
            interval: spec.interval,
            capital: spec.capital,
            max_daily_loss: spec.max_daily_loss,
            allocation: spec.allocation,
            realized_pnl: 0.0,
            running_pnl: 0.0,
            state: SessionState::Stopped,
            started_at: Utc::now(),
            last_price: None,
            ticks: 0,
            orders_placed: 0,
        };
        Self {
            session,
            params: spec.params,
            // the window must at least cover the rule's lookback
            window: config.history_window.max(spec.params.rule.lookback()),
            history: VecDeque::new(),
            max_qty: config.max_qty_per_order,
            gate: OrderGate::new(config),
            broker,
            ledger,
            events,
        }
    }

    pub fn session(&self) -> &LiveSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn is_running(&self) -> bool {
        self.session.state == SessionState::Running
    }

    pub fn start(&mut self) {
        self.session.state = SessionState::Running;
        self.session.started_at = Utc::now();
        info!(
            "Live session {} started: strategy {} on {} ({}) | capital {:.2} | max daily loss {:.2} | allocation {:.2}",
            self.session.id,
            self.session.strategy_id,
            self.session.symbol,
            self.session.interval,
            self.session.capital,
            self.session.max_daily_loss,
            self.session.allocation
        );
        self.emit(ExecutionEvent::SessionStarted {
            session_id: self.session.id,
            strategy_id: self.session.strategy_id,
            symbol: self.session.symbol.clone(),
        });
    }

    /// Process one candle while RUNNING
    pub fn on_candle(&mut self, candle: Candle, now: Instant) -> Result<TickOutcome> {
        if !self.is_running() {
            return Ok(TickOutcome::Ignored);
        }
        if let Some(last) = self.history.back() {
            if candle.timestamp < last.timestamp {
                debug!("Dropping out-of-order candle at {}", candle.timestamp);
                return Ok(TickOutcome::Held);
            }
        }

        self.history.push_back(candle);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
        self.session.ticks += 1;
        self.session.last_price = Some(candle.close);
        self.mark(candle.close);

        if daily_loss_breached(self.session.running_pnl, self.session.max_daily_loss) {
            let rejection = self.breach();
            self.halt();
            return Ok(TickOutcome::Halted(rejection));
        }

        let signal = evaluate(self.history.make_contiguous(), &self.params);
        let Some(intent) = self.intent_for(signal) else {
            return Ok(TickOutcome::Held);
        };
        debug!("{} -> {:?} @ {:.2}", signal, intent, candle.close);

        let mut order = self.build_order(intent, candle.close);
        if let Err(rejection) = self.gate.check(
            self.session.running_pnl,
            self.session.max_daily_loss,
            self.broker.as_ref(),
            &order,
            now,
        ) {
            order.update_state(OrderState::Rejected);
            return Ok(self.reject(rejection));
        }

        order.update_state(OrderState::Submitted);
        let fill = match self.broker.place_order(&order) {
            Ok(fill) => fill,
            Err(e) => {
                order.update_state(OrderState::Rejected);
                warn!("Order {} failed: {}", order.id, e);
                self.emit(ExecutionEvent::OrderRejected {
                    reason: e.to_string(),
                });
                return Ok(TickOutcome::OrderFailed(e.to_string()));
            }
        };
        order.update_state(OrderState::Filled);
        self.gate.record_placement(now);
        self.session.orders_placed += 1;
        debug!(
            "Order {} {} x{} {}",
            order.id, order.side, order.quantity, order.state
        );

        let applied = check_fill(&order, &fill).and_then(|()| match intent {
            OrderIntent::Open(side) => self.apply_open(side, &fill),
            OrderIntent::Close => self.apply_close(&fill).map(|record| TickOutcome::Closed {
                trade_id: record.id,
                pnl: record.pnl.unwrap_or_default(),
                halted: false,
            }),
        });

        match applied {
            Ok(TickOutcome::Closed { trade_id, pnl, .. }) => {
                let halted =
                    daily_loss_breached(self.session.running_pnl, self.session.max_daily_loss);
                if halted {
                    self.halt();
                }
                Ok(TickOutcome::Closed {
                    trade_id,
                    pnl,
                    halted,
                })
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => Ok(self.halt_unrecorded(&order, e)),
        }
    }

    /// Close any open position at the last seen price.
    ///
    /// Fails without touching the session if the broker refuses the order.
    pub fn flatten(&mut self) -> Result<Option<TradeRecord>> {
        if self.session.position.is_flat() {
            return Ok(None);
        }
        let price = self
            .session
            .last_price
            .unwrap_or(self.session.position.entry_price);
        let order = self.build_order(OrderIntent::Close, price);
        let fill = self.broker.place_order(&order)?;
        self.session.orders_placed += 1;
        check_fill(&order, &fill)?;
        info!("Flattened {} @ {:.2}", self.session.symbol, fill.price);
        self.apply_close(&fill).map(Some)
    }

    pub fn stop(&mut self) {
        self.session.state = SessionState::Stopped;
        info!(
            "Live session {} stopped | realized PnL {:.2}",
            self.session.id, self.session.realized_pnl
        );
        self.emit(ExecutionEvent::SessionStopped {
            session_id: self.session.id,
            realized_pnl: self.session.realized_pnl,
        });
    }

    fn intent_for(&self, signal: Signal) -> Option<OrderIntent> {
        let side = self.session.position.side;
        if side == Side::Flat {
            signal.entry_side().map(OrderIntent::Open)
        } else if signal.closes(side) {
            Some(OrderIntent::Close)
        } else {
            None
        }
    }

    fn build_order(&self, intent: OrderIntent, price: f64) -> OrderRequest {
        let (side, quantity) = match intent {
            OrderIntent::Open(side) => (
                OrderSide::to_open(side).unwrap_or(OrderSide::Buy),
                self.entry_quantity(price),
            ),
            OrderIntent::Close => (
                OrderSide::to_close(self.session.position.side).unwrap_or(OrderSide::Sell),
                self.session.position.quantity,
            ),
        };
        OrderRequest::market(&self.session.symbol, side, quantity, price, intent)
    }

    /// floor(capital * allocation / price), capped at the per-order maximum
    fn entry_quantity(&self, price: f64) -> u32 {
        if price <= 0.0 {
            return 0;
        }
        let qty = (self.session.capital * self.session.allocation / price).floor();
        qty.min(self.max_qty as f64) as u32
    }

    fn apply_open(&mut self, side: Side, fill: &Fill) -> Result<TickOutcome> {
        let record = self.ledger.open(NewTrade {
            strategy_id: Some(self.session.strategy_id),
            symbol: self.session.symbol.clone(),
            side,
            qty: fill.quantity,
            entry_price: fill.price,
            opened_at: fill.filled_at,
        })?;
        self.session
            .position
            .open(side, fill.quantity, fill.price, fill.filled_at, record.id);
        self.mark(fill.price);
        info!(
            "ENTRY: {} {} x{} @ {:.2}",
            side, self.session.symbol, fill.quantity, fill.price
        );
        self.emit(ExecutionEvent::PositionOpened {
            trade_id: record.id,
            side,
            quantity: fill.quantity,
            price: fill.price,
        });
        Ok(TickOutcome::Opened {
            trade_id: record.id,
            side,
            quantity: fill.quantity,
            price: fill.price,
        })
    }

    fn apply_close(&mut self, fill: &Fill) -> Result<TradeRecord> {
        let trade_id = self
            .session
            .position
            .trade_id
            .ok_or_else(|| EngineError::Ledger("open position has no trade record".into()))?;
        let record = self.ledger.close(trade_id, fill.price, fill.filled_at)?;
        let pnl = self.session.position.close(fill.price);
        self.session.realized_pnl += pnl;
        self.mark(fill.price);
        info!(
            "EXIT: {} @ {:.2} | P&L: {:.2} | running: {:.2}",
            self.session.symbol, fill.price, pnl, self.session.running_pnl
        );
        self.emit(ExecutionEvent::PositionClosed {
            trade_id,
            price: fill.price,
            pnl,
            running_pnl: self.session.running_pnl,
        });
        Ok(record)
    }

    fn mark(&mut self, price: f64) {
        let unrealized = self.session.position.unrealized(price);
        self.session.running_pnl = self.session.realized_pnl + unrealized;
        if !self.session.position.is_flat() {
            self.ledger.snapshot(&PositionSnapshot {
                session_id: self.session.id,
                symbol: self.session.symbol.clone(),
                side: self.session.position.side,
                qty: self.session.position.quantity,
                entry_price: self.session.position.entry_price,
                mark_price: price,
                unrealized_pnl: unrealized,
                running_pnl: self.session.running_pnl,
                timestamp: Utc::now(),
            });
        }
    }

    fn breach(&self) -> Rejection {
        Rejection::DailyLossBreached {
            running_pnl: self.session.running_pnl,
            max_daily_loss: self.session.max_daily_loss,
        }
    }

    fn reject(&mut self, rejection: Rejection) -> TickOutcome {
        match rejection {
            Rejection::DailyLossBreached { .. } => {
                self.halt();
                TickOutcome::Halted(rejection)
            }
            Rejection::AuthExpired => {
                self.broker.request_reauth();
                self.emit(ExecutionEvent::ReauthRequired);
                TickOutcome::Rejected(rejection)
            }
            _ => {
                info!("REJECTED: {}", rejection);
                self.emit(ExecutionEvent::OrderRejected {
                    reason: rejection.to_string(),
                });
                TickOutcome::Rejected(rejection)
            }
        }
    }

    fn halt(&mut self) {
        self.session.state = SessionState::Halted;
        warn!(
            "Max daily loss hit: running PnL {:.2} (limit {:.2}) - session HALTED",
            self.session.running_pnl, self.session.max_daily_loss
        );
        self.emit(ExecutionEvent::Halted {
            running_pnl: self.session.running_pnl,
            max_daily_loss: self.session.max_daily_loss,
        });
    }

    /// Broker and session disagree from here on; stop trading until the
    /// session is stopped and the account reconciled.
    fn halt_unrecorded(&mut self, order: &OrderRequest, err: EngineError) -> TickOutcome {
        self.session.state = SessionState::Halted;
        error!(
            "Fill for order {} could not be recorded: {} - session HALTED",
            order.id, err
        );
        self.emit(ExecutionEvent::FillUnrecorded {
            order_id: order.id,
            reason: err.to_string(),
        });
        TickOutcome::FillUnrecorded(err.to_string())
    }

    fn emit(&self, event: ExecutionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// A fill the session can book: full quantity at a positive price
fn check_fill(order: &OrderRequest, fill: &Fill) -> Result<()> {
    if !(fill.price.is_finite() && fill.price > 0.0) {
        return Err(EngineError::Order(format!(
            "order {} filled at invalid price {}",
            order.id, fill.price
        )));
    }
    if fill.quantity != order.quantity {
        return Err(EngineError::Order(format!(
            "order {} filled {} of {}",
            order.id, fill.quantity, order.quantity
        )));
    }
    Ok(())
}
