use async_trait::async_trait;
use tracing::warn;

use super::{FeedEvent, TickFeed};
use crate::error::{EngineError, Result};

/// Reads from the primary feed until it becomes unavailable, then switches to
/// the secondary for the rest of the session.
pub struct FallbackFeed {
    primary: Option<Box<dyn TickFeed>>,
    secondary: Box<dyn TickFeed>,
}

impl FallbackFeed {
    /// A primary that failed to open starts the feed on the secondary
    pub fn new(primary: Result<Box<dyn TickFeed>>, secondary: Box<dyn TickFeed>) -> Self {
        let primary = match primary {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!(
                    "Primary feed unavailable at open ({}) - falling back to {}",
                    e,
                    secondary.name()
                );
                None
            }
        };
        Self { primary, secondary }
    }

    pub fn on_primary(&self) -> bool {
        self.primary.is_some()
    }
}

#[async_trait]
impl TickFeed for FallbackFeed {
    fn name(&self) -> &'static str {
        match &self.primary {
            Some(primary) => primary.name(),
            None => self.secondary.name(),
        }
    }

    async fn next(&mut self) -> Result<FeedEvent> {
        if let Some(primary) = self.primary.as_mut() {
            match primary.next().await {
                Err(EngineError::FeedUnavailable(reason)) => {
                    warn!(
                        "{} feed lost ({}) - falling back to {}",
                        primary.name(),
                        reason,
                        self.secondary.name()
                    );
                    self.primary = None;
                }
                other => return other,
            }
        }

        self.secondary.next().await.map_err(|e| match e {
            EngineError::FeedUnavailable(reason) => {
                EngineError::FeedUnavailable(format!("primary and fallback feeds failed: {reason}"))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{ReplayFeed, TickHub};
    use crate::types::{Candle, Tick};
    use chrono::Utc;
    use std::time::Duration;

    fn replay(prices: &[f64]) -> Box<dyn TickFeed> {
        let now = Utc::now();
        Box::new(ReplayFeed::new(
            prices
                .iter()
                .enumerate()
                .map(|(i, &p)| Candle::flat(now + chrono::Duration::minutes(i as i64), p, 1)),
            Duration::ZERO,
        ))
    }

    #[tokio::test]
    async fn switches_when_stream_drops() {
        let hub = TickHub::new(8);
        let stream = hub.subscribe("A", Duration::from_secs(1)).unwrap();
        let mut feed = FallbackFeed::new(Ok(Box::new(stream)), replay(&[42.0]));

        hub.publish(Tick {
            symbol: "A".into(),
            timestamp: Utc::now(),
            price: 7.0,
            volume: 1,
        });
        assert!(matches!(feed.next().await.unwrap(), FeedEvent::Candle(c) if c.close == 7.0));

        hub.disconnect();
        assert!(matches!(feed.next().await.unwrap(), FeedEvent::Candle(c) if c.close == 42.0));
        assert!(!feed.on_primary());
        assert_eq!(feed.name(), "replay");
    }

    #[tokio::test]
    async fn starts_on_secondary_when_primary_fails_to_open() {
        let mut feed = FallbackFeed::new(
            Err(EngineError::FeedUnavailable("offline".into())),
            replay(&[1.0]),
        );
        assert!(!feed.on_primary());
        assert!(matches!(feed.next().await.unwrap(), FeedEvent::Candle(_)));
    }
}
