use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use super::{FeedEvent, FeedProvider, TickFeed};
use crate::error::Result;
use crate::types::{Candle, Interval};

/// Plays a fixed candle sequence, then reports end of stream
pub struct ReplayFeed {
    candles: VecDeque<Candle>,
    pace: Duration,
}

impl ReplayFeed {
    pub fn new(candles: impl IntoIterator<Item = Candle>, pace: Duration) -> Self {
        Self {
            candles: candles.into_iter().collect(),
            pace,
        }
    }
}

#[async_trait]
impl TickFeed for ReplayFeed {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn next(&mut self) -> Result<FeedEvent> {
        if !self.pace.is_zero() {
            tokio::time::sleep(self.pace).await;
        }
        Ok(match self.candles.pop_front() {
            Some(candle) => FeedEvent::Candle(candle),
            None => FeedEvent::EndOfStream,
        })
    }
}

/// Provider that hands every session the same recorded sequence
#[derive(Debug, Clone)]
pub struct ReplayFeeds {
    candles: Vec<Candle>,
    pace: Duration,
}

impl ReplayFeeds {
    pub fn new(candles: Vec<Candle>, pace: Duration) -> Self {
        Self { candles, pace }
    }
}

impl FeedProvider for ReplayFeeds {
    fn open(&self, _symbol: &str, _interval: Interval) -> Result<Box<dyn TickFeed>> {
        Ok(Box::new(ReplayFeed::new(self.candles.clone(), self.pace)))
    }
}
