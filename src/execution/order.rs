//! Order types and lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Side;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Side of the order that opens a position in `side`
    pub fn to_open(side: Side) -> Option<Self> {
        match side {
            Side::Long => Some(Self::Buy),
            Side::Short => Some(Self::Sell),
            Side::Flat => None,
        }
    }

    /// Side of the order that flattens a position in `side`
    pub fn to_close(side: Side) -> Option<Self> {
        Self::to_open(side).map(|s| s.opposite())
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// What an order is meant to do to the session's position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderIntent {
    Open(Side),
    Close,
}

/// Order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Built, not yet validated
    Pending,
    /// Passed validation, handed to the broker
    Submitted,
    Filled,
    /// Stopped by validation or refused by the broker
    Rejected,
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Market order handed to a broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-side order id
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    /// Last seen price; paper fills execute here
    pub reference_price: f64,
    pub intent: OrderIntent,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn market(
        symbol: &str,
        side: OrderSide,
        quantity: u32,
        reference_price: f64,
        intent: OrderIntent,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            quantity,
            reference_price,
            intent,
            state: OrderState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn update_state(&mut self, state: OrderState) {
        self.state = state;
    }
}

/// Broker execution report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Uuid,
    /// Broker-side reference, if any
    pub broker_order_id: Option<String>,
    pub price: f64,
    pub quantity: u32,
    pub filled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_sides_for_positions() {
        assert_eq!(OrderSide::to_open(Side::Long), Some(OrderSide::Buy));
        assert_eq!(OrderSide::to_close(Side::Long), Some(OrderSide::Sell));
        assert_eq!(OrderSide::to_close(Side::Short), Some(OrderSide::Buy));
        assert_eq!(OrderSide::to_open(Side::Flat), None);
    }

    #[test]
    fn lifecycle_states() {
        let mut order = OrderRequest::market("TCS.NS", OrderSide::Buy, 3, 10.0, OrderIntent::Open(Side::Long));
        assert_eq!(order.state, OrderState::Pending);
        order.update_state(OrderState::Submitted);
        assert_eq!(order.state, OrderState::Submitted);
        order.update_state(OrderState::Filled);
        assert_eq!(order.state.to_string(), "FILLED");
    }
}
