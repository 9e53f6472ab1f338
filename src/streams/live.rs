use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{FeedEvent, TickFeed};
use crate::error::{EngineError, Result};
use crate::types::{Candle, Tick};

/// Fan-out point for pushed ticks.
///
/// Upstream connectors publish here; each live session subscribes for its
/// symbol. Disconnecting drops the sender, which closes every subscriber.
pub struct TickHub {
    capacity: usize,
    sender: Mutex<Option<broadcast::Sender<Tick>>>,
}

impl TickHub {
    /// New hub, connected
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            capacity,
            sender: Mutex::new(Some(tx)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Publish a tick; returns the number of subscribers that received it
    pub fn publish(&self, tick: Tick) -> usize {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(tick).unwrap_or(0),
            None => 0,
        }
    }

    pub fn connect(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let (tx, _) = broadcast::channel(self.capacity);
            *guard = Some(tx);
            info!("Tick stream connected");
        }
    }

    pub fn disconnect(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            warn!("Tick stream disconnected");
        }
    }

    pub fn subscribe(&self, symbol: &str, read_timeout: Duration) -> Result<StreamFeed> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard
            .as_ref()
            .ok_or_else(|| EngineError::FeedUnavailable("tick stream is not connected".into()))?;
        Ok(StreamFeed {
            symbol: symbol.to_string(),
            rx: tx.subscribe(),
            read_timeout,
        })
    }
}

/// Per-session view of the tick stream, filtered to one symbol
pub struct StreamFeed {
    symbol: String,
    rx: broadcast::Receiver<Tick>,
    read_timeout: Duration,
}

#[async_trait]
impl TickFeed for StreamFeed {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn next(&mut self) -> Result<FeedEvent> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            match timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return Ok(FeedEvent::WouldBlock),
                Ok(Ok(tick)) if tick.symbol == self.symbol => {
                    return Ok(FeedEvent::Candle(Candle::from(&tick)))
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    // later ticks supersede the skipped ones
                    debug!("Stream for {} lagged, skipped {} ticks", self.symbol, skipped);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(EngineError::FeedUnavailable(format!(
                        "tick stream closed for {}",
                        self.symbol
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            price,
            volume: 1,
        }
    }

    #[tokio::test]
    async fn delivers_ticks_for_the_subscribed_symbol() {
        let hub = TickHub::new(16);
        let mut feed = hub.subscribe("INFY.NS", Duration::from_millis(200)).unwrap();
        hub.publish(tick("TCS.NS", 1.0));
        hub.publish(tick("INFY.NS", 1500.0));

        match feed.next().await.unwrap() {
            FeedEvent::Candle(c) => assert_eq!(c.close, 1500.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn quiet_stream_reports_would_block() {
        let hub = TickHub::new(16);
        let mut feed = hub.subscribe("INFY.NS", Duration::from_millis(20)).unwrap();
        assert_eq!(feed.next().await.unwrap(), FeedEvent::WouldBlock);
    }

    #[tokio::test]
    async fn disconnect_closes_subscribers() {
        let hub = TickHub::new(16);
        let mut feed = hub.subscribe("INFY.NS", Duration::from_secs(1)).unwrap();
        hub.disconnect();
        assert!(matches!(feed.next().await, Err(EngineError::FeedUnavailable(_))));
        assert!(hub.subscribe("INFY.NS", Duration::from_secs(1)).is_err());
        hub.connect();
        assert!(hub.is_connected());
    }
}
