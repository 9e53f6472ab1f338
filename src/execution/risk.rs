//! Pre-trade validation
//!
//! Every order intent passes, in order: daily-loss check, broker auth check,
//! rate limit, order sanity. The first failing step produces a [`Rejection`];
//! a rejected check leaves no trace in the gate.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::broker::Broker;
use super::config::ExecutionConfig;
use super::order::OrderRequest;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Why an order intent was not placed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    DailyLossBreached { running_pnl: f64, max_daily_loss: f64 },
    AuthExpired,
    RateLimited { limit: usize },
    InvalidOrder { detail: String },
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DailyLossBreached { .. } => "risk_breach",
            Self::AuthExpired => "auth_expired",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidOrder { .. } => "invalid_order",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyLossBreached {
                running_pnl,
                max_daily_loss,
            } => write!(
                f,
                "daily loss limit breached ({:.2} <= -{:.2})",
                running_pnl, max_daily_loss
            ),
            Self::AuthExpired => write!(f, "broker token expired"),
            Self::RateLimited { limit } => write!(f, "more than {} orders in the last minute", limit),
            Self::InvalidOrder { detail } => write!(f, "invalid order: {}", detail),
        }
    }
}

/// Daily loss is breached once running PnL reaches the negative limit
pub fn daily_loss_breached(running_pnl: f64, max_daily_loss: f64) -> bool {
    running_pnl <= -max_daily_loss
}

/// Sliding one-minute window over placement times
#[derive(Debug)]
pub struct OrderRateLimiter {
    limit: usize,
    window: Duration,
    placed: VecDeque<Instant>,
}

impl OrderRateLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            window: RATE_WINDOW,
            placed: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.placed.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.placed.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn allows(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.placed.len() < self.limit
    }

    pub fn record(&mut self, now: Instant) {
        self.placed.push_back(now);
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// The validation pipeline for one session
#[derive(Debug)]
pub struct OrderGate {
    limiter: OrderRateLimiter,
    max_qty: u32,
    allowed_suffix: Option<String>,
}

impl OrderGate {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            limiter: OrderRateLimiter::new(config.max_orders_per_minute),
            max_qty: config.max_qty_per_order,
            allowed_suffix: config.allowed_symbol_suffix.clone(),
        }
    }

    pub fn check(
        &mut self,
        running_pnl: f64,
        max_daily_loss: f64,
        broker: &dyn Broker,
        order: &OrderRequest,
        now: Instant,
    ) -> Result<(), Rejection> {
        if daily_loss_breached(running_pnl, max_daily_loss) {
            return Err(Rejection::DailyLossBreached {
                running_pnl,
                max_daily_loss,
            });
        }
        if !broker.is_authenticated() {
            return Err(Rejection::AuthExpired);
        }
        if !self.limiter.allows(now) {
            return Err(Rejection::RateLimited {
                limit: self.limiter.limit(),
            });
        }
        self.sanity(order)
    }

    /// Count a successful placement against the rate limit
    pub fn record_placement(&mut self, now: Instant) {
        self.limiter.record(now);
    }

    fn sanity(&self, order: &OrderRequest) -> Result<(), Rejection> {
        if order.quantity == 0 {
            return Err(Rejection::InvalidOrder {
                detail: format!("quantity is zero at price {:.2}", order.reference_price),
            });
        }
        if order.quantity > self.max_qty {
            return Err(Rejection::InvalidOrder {
                detail: format!("quantity {} exceeds max {}", order.quantity, self.max_qty),
            });
        }
        if let Some(suffix) = &self.allowed_suffix {
            if !order.symbol.ends_with(suffix.as_str()) {
                return Err(Rejection::InvalidOrder {
                    detail: format!("symbol {} does not end with {}", order.symbol, suffix),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::PaperBroker;
    use crate::execution::order::{OrderIntent, OrderSide};
    use crate::types::Side;

    fn order(symbol: &str, qty: u32) -> OrderRequest {
        OrderRequest::market(symbol, OrderSide::Buy, qty, 100.0, OrderIntent::Open(Side::Long))
    }

    fn gate() -> OrderGate {
        OrderGate::new(&ExecutionConfig {
            max_orders_per_minute: 2,
            max_qty_per_order: 50,
            allowed_symbol_suffix: Some(".NS".into()),
            ..Default::default()
        })
    }

    #[test]
    fn risk_is_checked_before_auth() {
        let broker = PaperBroker::new();
        broker.set_authenticated(false);
        let mut gate = gate();
        let now = Instant::now();

        let rejection = gate.check(-600.0, 500.0, &broker, &order("TCS.NS", 1), now).unwrap_err();
        assert_eq!(rejection.kind(), "risk_breach");

        let rejection = gate.check(-100.0, 500.0, &broker, &order("TCS.NS", 1), now).unwrap_err();
        assert_eq!(rejection, Rejection::AuthExpired);
    }

    #[test]
    fn loss_exactly_at_limit_is_a_breach() {
        assert!(daily_loss_breached(-500.0, 500.0));
        assert!(!daily_loss_breached(-499.99, 500.0));
    }

    #[test]
    fn rate_limit_uses_a_sliding_minute() {
        let broker = PaperBroker::new();
        let mut gate = gate();
        let t0 = Instant::now();

        for _ in 0..2 {
            assert!(gate.check(0.0, 500.0, &broker, &order("TCS.NS", 1), t0).is_ok());
            gate.record_placement(t0);
        }
        let rejection = gate.check(0.0, 500.0, &broker, &order("TCS.NS", 1), t0).unwrap_err();
        assert_eq!(rejection, Rejection::RateLimited { limit: 2 });

        let later = t0 + Duration::from_secs(61);
        assert!(gate.check(0.0, 500.0, &broker, &order("TCS.NS", 1), later).is_ok());
    }

    #[test]
    fn rejected_checks_do_not_consume_rate_budget() {
        let broker = PaperBroker::new();
        let mut gate = gate();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(gate.check(0.0, 500.0, &broker, &order("TCS.NS", 0), now).is_err());
        }
        assert!(gate.check(0.0, 500.0, &broker, &order("TCS.NS", 1), now).is_ok());
    }

    #[test]
    fn sanity_checks_quantity_and_suffix() {
        let broker = PaperBroker::new();
        let mut gate = gate();
        let now = Instant::now();
        for bad in [order("TCS.NS", 0), order("TCS.NS", 51), order("AAPL", 1)] {
            let rejection = gate.check(0.0, 500.0, &broker, &bad, now).unwrap_err();
            assert_eq!(rejection.kind(), "invalid_order");
        }
    }
}
