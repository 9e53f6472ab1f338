//! Broker collaborator
//!
//! The brokerage protocol itself lives outside this crate. The engine needs
//! only an auth check, a way to ask for re-authentication, and order placement.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{info, warn};

use super::order::{Fill, OrderRequest};
use crate::error::{EngineError, Result};

pub trait Broker: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_authenticated(&self) -> bool;

    /// Ask the user to refresh the broker token. Fire and forget.
    fn request_reauth(&self);

    fn place_order(&self, order: &OrderRequest) -> Result<Fill>;
}

/// Local paper broker: fills every order at its reference price
#[derive(Debug)]
pub struct PaperBroker {
    authenticated: AtomicBool,
    accepting: AtomicBool,
    reauth_requests: AtomicUsize,
    fills: AtomicUsize,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            accepting: AtomicBool::new(true),
            reauth_requests: AtomicUsize::new(0),
            fills: AtomicUsize::new(0),
        }
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// When false, every placement is refused as a broker error
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn reauth_requests(&self) -> usize {
        self.reauth_requests.load(Ordering::SeqCst)
    }

    pub fn fill_count(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }
}

impl Broker for PaperBroker {
    fn name(&self) -> &'static str {
        "paper"
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn request_reauth(&self) {
        self.reauth_requests.fetch_add(1, Ordering::SeqCst);
        warn!("Broker token expired - re-authentication requested");
    }

    fn place_order(&self, order: &OrderRequest) -> Result<Fill> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::Order(format!(
                "paper broker refused {} {} x{}",
                order.side, order.symbol, order.quantity
            )));
        }
        self.fills.fetch_add(1, Ordering::SeqCst);
        info!(
            "PAPER: {} {} x{} @ {:.2}",
            order.side, order.symbol, order.quantity, order.reference_price
        );
        Ok(Fill {
            order_id: order.id,
            broker_order_id: None,
            price: order.reference_price,
            quantity: order.quantity,
            filled_at: Utc::now(),
        })
    }
}
