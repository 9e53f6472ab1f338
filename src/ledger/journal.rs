use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::{LedgerEvent, PersistenceSink, PositionSnapshot};
use crate::error::Result;
use crate::types::Side;

/// CSV trade journal, one row per ledger event or position snapshot
pub struct CsvJournal {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

#[derive(Debug, Serialize)]
struct JournalRow<'a> {
    timestamp: DateTime<Utc>,
    event_type: &'static str,
    trade_id: Option<u64>,
    symbol: &'a str,
    side: Side,
    qty: u32,
    entry_price: f64,
    price: Option<f64>,
    pnl: Option<f64>,
}

impl CsvJournal {
    /// Open for append; the header is written only to an empty file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let needs_header = file.metadata()?.len() == 0;
        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        info!("Trade journal initialized - logging to {:?}", path);
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, row: &JournalRow<'_>) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }
}

impl PersistenceSink for CsvJournal {
    fn record_trade(&self, event: &LedgerEvent) -> Result<()> {
        let record = event.record();
        let (event_type, timestamp, price) = match event {
            LedgerEvent::Opened(r) => ("ENTRY", r.created_at, Some(r.entry_price)),
            LedgerEvent::Closed(r) => ("EXIT", r.closed_at.unwrap_or(r.created_at), r.exit_price),
        };
        self.write(&JournalRow {
            timestamp,
            event_type,
            trade_id: Some(record.id),
            symbol: &record.symbol,
            side: record.side,
            qty: record.qty,
            entry_price: record.entry_price,
            price,
            pnl: record.pnl,
        })
    }

    fn record_snapshot(&self, snapshot: &PositionSnapshot) -> Result<()> {
        self.write(&JournalRow {
            timestamp: snapshot.timestamp,
            event_type: "SNAPSHOT",
            trade_id: None,
            symbol: &snapshot.symbol,
            side: snapshot.side,
            qty: snapshot.qty,
            entry_price: snapshot.entry_price,
            price: Some(snapshot.mark_price),
            pnl: Some(snapshot.running_pnl),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{NewTrade, TradeLedger};
    use std::sync::Arc;

    #[test]
    fn journals_entries_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        let journal = Arc::new(CsvJournal::open(&path).unwrap());
        let ledger = TradeLedger::new().with_sink(journal.clone());

        let opened = ledger
            .open(NewTrade {
                strategy_id: None,
                symbol: "TCS.NS".into(),
                side: Side::Long,
                qty: 3,
                entry_price: 100.0,
                opened_at: Utc::now(),
            })
            .unwrap();
        ledger.close(opened.id, 104.0, Utc::now()).unwrap();

        let contents = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,event_type,trade_id"));
        assert!(lines[1].contains(",ENTRY,1,TCS.NS,long,3,"));
        assert!(lines[2].contains(",EXIT,1,TCS.NS,long,3,100.0,104.0,12.0"));
    }

    #[test]
    fn reopening_does_not_repeat_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        let snapshot = PositionSnapshot {
            session_id: uuid::Uuid::new_v4(),
            symbol: "TCS.NS".into(),
            side: Side::Flat,
            qty: 0,
            entry_price: 0.0,
            mark_price: 10.0,
            unrealized_pnl: 0.0,
            running_pnl: 0.0,
            timestamp: Utc::now(),
        };
        CsvJournal::open(&path).unwrap().record_snapshot(&snapshot).unwrap();
        CsvJournal::open(&path).unwrap().record_snapshot(&snapshot).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("event_type").count(), 1);
        assert_eq!(contents.matches("SNAPSHOT").count(), 2);
    }
}
