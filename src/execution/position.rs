//! Position tracking for a live session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::TradeId;
use crate::types::Side;

/// Net position in one symbol. At most one is open per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: f64,
    pub opened_at: Option<DateTime<Utc>>,
    /// Ledger record backing the open position
    pub trade_id: Option<TradeId>,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::Flat,
            quantity: 0,
            entry_price: 0.0,
            opened_at: None,
            trade_id: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == Side::Flat
    }

    /// Mark-to-market PnL at `price`
    pub fn unrealized(&self, price: f64) -> f64 {
        if self.is_flat() {
            return 0.0;
        }
        (price - self.entry_price) * self.quantity as f64 * self.side.sign()
    }

    pub fn open(&mut self, side: Side, quantity: u32, price: f64, at: DateTime<Utc>, trade_id: TradeId) {
        self.side = side;
        self.quantity = quantity;
        self.entry_price = price;
        self.opened_at = Some(at);
        self.trade_id = Some(trade_id);
    }

    /// Flatten and return the realized PnL at `price`
    pub fn close(&mut self, price: f64) -> f64 {
        let pnl = self.unrealized(price);
        *self = Self::flat(&self.symbol);
        pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_and_short_marks() {
        let mut pos = Position::flat("INFY.NS");
        assert_eq!(pos.unrealized(100.0), 0.0);

        pos.open(Side::Long, 10, 100.0, Utc::now(), 1);
        assert_eq!(pos.unrealized(94.0), -60.0);

        pos.close(94.0);
        pos.open(Side::Short, 10, 100.0, Utc::now(), 2);
        assert_eq!(pos.unrealized(94.0), 60.0);
    }

    #[test]
    fn close_returns_pnl_and_flattens() {
        let mut pos = Position::flat("INFY.NS");
        pos.open(Side::Long, 2, 50.0, Utc::now(), 7);
        assert_eq!(pos.close(55.0), 10.0);
        assert!(pos.is_flat());
        assert_eq!(pos.trade_id, None);
        assert_eq!(pos.symbol, "INFY.NS");
    }
}
