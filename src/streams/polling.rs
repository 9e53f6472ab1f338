use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::{CandleSource, FeedEvent, TickFeed};
use crate::error::{EngineError, Result};
use crate::types::{Candle, Interval};

/// Polls the newest stored candle and emits it once per new timestamp
pub struct PollingFeed {
    source: Arc<dyn CandleSource>,
    symbol: String,
    interval: Interval,
    every: Duration,
    last_seen: Option<DateTime<Utc>>,
    primed: bool,
}

impl PollingFeed {
    pub fn new(
        source: Arc<dyn CandleSource>,
        symbol: &str,
        interval: Interval,
        every: Duration,
    ) -> Self {
        Self {
            source,
            symbol: symbol.to_string(),
            interval,
            every,
            last_seen: None,
            primed: false,
        }
    }

    fn fresh(&mut self, candle: Candle) -> Option<Candle> {
        if self.last_seen.is_some_and(|seen| candle.timestamp <= seen) {
            return None;
        }
        self.last_seen = Some(candle.timestamp);
        Some(candle)
    }
}

#[async_trait]
impl TickFeed for PollingFeed {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn next(&mut self) -> Result<FeedEvent> {
        // first read is immediate
        if self.primed {
            tokio::time::sleep(self.every).await;
        }
        self.primed = true;

        let latest = self
            .source
            .latest(&self.symbol, self.interval)
            .map_err(|e| EngineError::FeedUnavailable(format!("polling {}: {e}", self.symbol)))?;

        Ok(match latest.and_then(|c| self.fresh(c)) {
            Some(candle) => FeedEvent::Candle(candle),
            None => FeedEvent::WouldBlock,
        })
    }
}
