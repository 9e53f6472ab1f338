//! Order/trade ledger
//!
//! Append-only record of trades. A record is created when a position opens and
//! finalized once when it closes; both steps happen under the ledger lock so a
//! reader never observes a partially closed trade. Every change is forwarded to
//! the configured persistence sinks.

mod journal;

pub use journal::CsvJournal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::trading_core::StrategyId;
use crate::types::Side;

pub type TradeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Fields needed to open a trade
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub strategy_id: Option<StrategyId>,
    pub symbol: String,
    pub side: Side,
    pub qty: u32,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    pub strategy_id: Option<StrategyId>,
    pub symbol: String,
    pub side: Side,
    pub qty: u32,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    pub fn open(id: TradeId, trade: NewTrade) -> Result<Self> {
        if trade.side == Side::Flat {
            return Err(EngineError::validation("cannot open a FLAT trade"));
        }
        if trade.qty == 0 {
            return Err(EngineError::validation("trade quantity must be positive"));
        }
        if !(trade.entry_price.is_finite() && trade.entry_price > 0.0) {
            return Err(EngineError::validation(format!(
                "invalid entry price {}",
                trade.entry_price
            )));
        }

        Ok(Self {
            id,
            strategy_id: trade.strategy_id,
            symbol: trade.symbol,
            side: trade.side,
            qty: trade.qty,
            entry_price: trade.entry_price,
            exit_price: None,
            pnl: None,
            status: TradeStatus::Open,
            created_at: trade.opened_at,
            closed_at: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// `(exit - entry) * qty * sign(side)`
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.qty as f64 * self.side.sign()
    }

    /// Finalize the record. Fails if it is already closed.
    pub fn finalize(&mut self, exit_price: f64, at: DateTime<Utc>) -> Result<f64> {
        if !self.is_open() {
            return Err(EngineError::Ledger(format!("trade {} is already closed", self.id)));
        }
        let pnl = self.pnl_at(exit_price);
        self.exit_price = Some(exit_price);
        self.pnl = Some(pnl);
        self.status = TradeStatus::Closed;
        self.closed_at = Some(at);
        Ok(pnl)
    }
}

/// Trade lifecycle change handed to sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "trade", rename_all = "snake_case")]
pub enum LedgerEvent {
    Opened(TradeRecord),
    Closed(TradeRecord),
}

impl LedgerEvent {
    pub fn record(&self) -> &TradeRecord {
        match self {
            Self::Opened(r) | Self::Closed(r) => r,
        }
    }
}

/// Point-in-time view of a live session's position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub session_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub qty: u32,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub running_pnl: f64,
    pub timestamp: DateTime<Utc>,
}

/// Durable storage collaborator
pub trait PersistenceSink: Send + Sync {
    fn record_trade(&self, event: &LedgerEvent) -> Result<()>;
    fn record_snapshot(&self, snapshot: &PositionSnapshot) -> Result<()>;
}

#[derive(Debug, Default)]
struct LedgerInner {
    records: BTreeMap<TradeId, TradeRecord>,
    next_id: TradeId,
}

/// In-memory ledger; the source of truth for trade state.
///
/// Sink failures are logged and do not roll back the in-memory change.
#[derive(Default)]
pub struct TradeLedger {
    inner: RwLock<LedgerInner>,
    sinks: Vec<Arc<dyn PersistenceSink>>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append an open record
    pub fn open(&self, trade: NewTrade) -> Result<TradeRecord> {
        let record = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let record = TradeRecord::open(inner.next_id + 1, trade)?;
            inner.next_id = record.id;
            inner.records.insert(record.id, record.clone());
            record
        };
        debug!(
            "Ledger opened trade {} {} {} x{} @ {:.2}",
            record.id, record.symbol, record.side, record.qty, record.entry_price
        );
        self.publish(&LedgerEvent::Opened(record.clone()));
        Ok(record)
    }

    /// Finalize an open record with its exit
    pub fn close(&self, id: TradeId, exit_price: f64, at: DateTime<Utc>) -> Result<TradeRecord> {
        let record = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let record = inner
                .records
                .get_mut(&id)
                .ok_or_else(|| EngineError::not_found("trade", id))?;
            record.finalize(exit_price, at)?;
            record.clone()
        };
        debug!(
            "Ledger closed trade {} @ {:.2} pnl {:.2}",
            record.id,
            exit_price,
            record.pnl.unwrap_or_default()
        );
        self.publish(&LedgerEvent::Closed(record.clone()));
        Ok(record)
    }

    pub fn get(&self, id: TradeId) -> Result<TradeRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("trade", id))
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<TradeRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self, snapshot: &PositionSnapshot) {
        for sink in &self.sinks {
            if let Err(e) = sink.record_snapshot(snapshot) {
                warn!("Failed to persist position snapshot: {}", e);
            }
        }
    }

    fn publish(&self, event: &LedgerEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.record_trade(event) {
                warn!("Failed to persist trade {}: {}", event.record().id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        trades: Mutex<Vec<LedgerEvent>>,
        snapshots: Mutex<Vec<PositionSnapshot>>,
    }

    impl PersistenceSink for MemorySink {
        fn record_trade(&self, event: &LedgerEvent) -> Result<()> {
            self.trades.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn record_snapshot(&self, snapshot: &PositionSnapshot) -> Result<()> {
            self.snapshots.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl PersistenceSink for FailingSink {
        fn record_trade(&self, _: &LedgerEvent) -> Result<()> {
            Err(EngineError::Ledger("disk full".into()))
        }

        fn record_snapshot(&self, _: &PositionSnapshot) -> Result<()> {
            Err(EngineError::Ledger("disk full".into()))
        }
    }

    fn trade(side: Side, price: f64) -> NewTrade {
        NewTrade {
            strategy_id: Some(1),
            symbol: "RELIANCE.NS".into(),
            side,
            qty: 10,
            entry_price: price,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn open_then_close_computes_pnl() {
        let ledger = TradeLedger::new();
        let opened = ledger.open(trade(Side::Long, 105.0)).unwrap();
        assert!(opened.is_open());

        let closed = ledger.close(opened.id, 95.0, Utc::now()).unwrap();
        assert_eq!(closed.status, TradeStatus::Closed);
        assert_eq!(closed.pnl, Some(-100.0));
        assert_eq!(ledger.get(opened.id).unwrap(), closed);
    }

    #[test]
    fn short_pnl_is_inverted() {
        let ledger = TradeLedger::new();
        let opened = ledger.open(trade(Side::Short, 100.0)).unwrap();
        let closed = ledger.close(opened.id, 90.0, Utc::now()).unwrap();
        assert_eq!(closed.pnl, Some(100.0));
    }

    #[test]
    fn closed_records_are_immutable() {
        let ledger = TradeLedger::new();
        let opened = ledger.open(trade(Side::Long, 100.0)).unwrap();
        ledger.close(opened.id, 101.0, Utc::now()).unwrap();
        let err = ledger.close(opened.id, 50.0, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Ledger(_)));
        assert_eq!(ledger.get(opened.id).unwrap().exit_price, Some(101.0));
        assert!(matches!(ledger.close(99, 1.0, Utc::now()), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let ledger = TradeLedger::new();
        for price in [1.0, 2.0, 3.0] {
            ledger.open(trade(Side::Long, price)).unwrap();
        }
        let recent = ledger.recent(2);
        assert_eq!(recent.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(ledger.recent(100).len(), 3);
    }

    #[test]
    fn rejects_invalid_opens() {
        let ledger = TradeLedger::new();
        assert!(ledger.open(trade(Side::Flat, 1.0)).is_err());
        assert!(ledger.open(trade(Side::Long, 0.0)).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn sinks_receive_events_and_failures_do_not_block() {
        let sink = Arc::new(MemorySink::default());
        let ledger = TradeLedger::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(sink.clone());

        let opened = ledger.open(trade(Side::Long, 100.0)).unwrap();
        ledger.close(opened.id, 110.0, Utc::now()).unwrap();
        ledger.snapshot(&PositionSnapshot {
            session_id: Uuid::new_v4(),
            symbol: "RELIANCE.NS".into(),
            side: Side::Flat,
            qty: 0,
            entry_price: 0.0,
            mark_price: 110.0,
            unrealized_pnl: 0.0,
            running_pnl: 100.0,
            timestamp: Utc::now(),
        });

        let trades = sink.trades.lock().unwrap();
        assert!(matches!(trades[0], LedgerEvent::Opened(_)));
        assert!(matches!(trades[1], LedgerEvent::Closed(_)));
        assert_eq!(sink.snapshots.lock().unwrap().len(), 1);
        assert_eq!(ledger.len(), 1);
    }
}
