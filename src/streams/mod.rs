//! Market data feeds
//!
//! - `history`: stored candles queried by backtests and the polling fallback
//! - `live`: push stream of ticks fanned out through a [`TickHub`]
//! - `polling`: pulls the latest stored candle on a fixed cadence
//! - `demo`: seeded random-walk generator for sessions without a tick stream
//! - `replay`: plays a fixed candle sequence, used for dataset playback
//! - `fallback`: stream first, switching to a secondary feed on disconnect

mod demo;
mod fallback;
mod history;
mod live;
mod polling;
mod replay;

pub use demo::SimulatedFeed;
pub use fallback::FallbackFeed;
pub use history::{CandleSource, CandleStore};
pub use live::{StreamFeed, TickHub};
pub use polling::PollingFeed;
pub use replay::{ReplayFeed, ReplayFeeds};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::types::{Candle, Interval};

/// Outcome of one read from a feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Candle(Candle),
    /// Nothing arrived within the read window; the session keeps running
    WouldBlock,
    /// The feed has no more data and will not produce any
    EndOfStream,
}

/// Ordered per-symbol source of candles for a live session
#[async_trait]
pub trait TickFeed: Send {
    fn name(&self) -> &'static str;

    /// Wait for the next event. `FeedUnavailable` means the source is gone.
    async fn next(&mut self) -> Result<FeedEvent>;
}

/// Opens a feed for a session. Which implementation backs it is fixed when
/// the provider is built.
pub trait FeedProvider: Send + Sync {
    fn open(&self, symbol: &str, interval: Interval) -> Result<Box<dyn TickFeed>>;
}

/// Timing knobs for the default provider
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// How long a stream read waits before reporting `WouldBlock`
    pub read_timeout: Duration,
    /// Cadence of the polling fallback
    pub poll_interval: Duration,
    /// Wall-clock pacing of the simulated generator
    pub simulated_pace: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            simulated_pace: Duration::from_secs(1),
        }
    }
}

/// Default provider.
///
/// With a hub configured the session reads the tick stream and falls back to
/// polling stored history for its (symbol, interval), or to the simulated
/// generator when nothing is stored. Without a hub it runs on the simulated
/// generator, continuing from the last stored candle when there is one.
pub struct MarketFeeds {
    hub: Option<Arc<TickHub>>,
    history: Arc<dyn CandleSource>,
    settings: FeedSettings,
}

impl MarketFeeds {
    pub fn new(history: Arc<dyn CandleSource>, settings: FeedSettings) -> Self {
        Self {
            hub: None,
            history,
            settings,
        }
    }

    pub fn with_stream(mut self, hub: Arc<TickHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    fn simulated(&self, symbol: &str, interval: Interval, last: Option<Candle>) -> Box<dyn TickFeed> {
        let feed = SimulatedFeed::for_symbol(symbol, interval, self.settings.simulated_pace);
        Box::new(match last {
            Some(candle) => feed.continuing_from(&candle),
            None => feed,
        })
    }
}

impl FeedProvider for MarketFeeds {
    fn open(&self, symbol: &str, interval: Interval) -> Result<Box<dyn TickFeed>> {
        // unknown symbols have no stored series either
        let last = self.history.latest(symbol, interval).ok().flatten();

        let Some(hub) = &self.hub else {
            info!(
                "No tick stream configured for {} {} - using simulated feed",
                symbol, interval
            );
            return Ok(self.simulated(symbol, interval, last));
        };

        let secondary: Box<dyn TickFeed> = match last {
            Some(_) => Box::new(PollingFeed::new(
                self.history.clone(),
                symbol,
                interval,
                self.settings.poll_interval,
            )),
            None => self.simulated(symbol, interval, None),
        };
        let primary = hub
            .subscribe(symbol, self.settings.read_timeout)
            .map(|feed| Box::new(feed) as Box<dyn TickFeed>);
        Ok(Box::new(FallbackFeed::new(primary, secondary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn history() -> Arc<dyn CandleSource> {
        let store = CandleStore::new();
        store
            .insert(
                "TCS.NS",
                Interval::Minute1,
                Candle::flat(Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap(), 10.0, 1),
            )
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn simulation_backs_sessions_without_a_stream() {
        let feeds = MarketFeeds::new(history(), FeedSettings::default());
        assert_eq!(feeds.open("TCS.NS", Interval::Minute1).unwrap().name(), "simulated");
        assert_eq!(feeds.open("TCS.NS", Interval::Day1).unwrap().name(), "simulated");
        assert_eq!(feeds.open("NIFTY 50", Interval::Minute1).unwrap().name(), "simulated");
    }

    #[tokio::test]
    async fn simulation_continues_from_the_last_stored_candle() {
        let feeds = MarketFeeds::new(
            history(),
            FeedSettings {
                simulated_pace: Duration::ZERO,
                ..FeedSettings::default()
            },
        );
        let mut feed = feeds.open("TCS.NS", Interval::Minute1).unwrap();
        let FeedEvent::Candle(first) = feed.next().await.unwrap() else {
            panic!("expected candle");
        };
        assert_eq!(first.open, 10.0);
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 16, 0).unwrap()
        );
    }

    #[test]
    fn stream_fallback_is_chosen_per_interval() {
        let hub = Arc::new(TickHub::new(16));
        hub.disconnect();
        let feeds = MarketFeeds::new(history(), FeedSettings::default()).with_stream(hub);
        // the stream cannot be opened, so each feed starts on its fallback
        assert_eq!(feeds.open("TCS.NS", Interval::Minute1).unwrap().name(), "polling");
        assert_eq!(feeds.open("TCS.NS", Interval::Day1).unwrap().name(), "simulated");
    }

    #[test]
    fn stream_is_preferred_when_configured() {
        let hub = Arc::new(TickHub::new(16));
        let feeds = MarketFeeds::new(history(), FeedSettings::default()).with_stream(hub);
        assert_eq!(feeds.open("TCS.NS", Interval::Minute1).unwrap().name(), "stream");
    }
}
