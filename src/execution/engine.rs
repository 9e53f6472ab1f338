//! Execution manager - owns the live session and its background tick loop

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::Broker;
use super::config::{ExecutionConfig, ExecutionMode};
use super::session::{ExecutionEvent, LiveSession, LiveTrader, SessionSpec, SessionState};
use crate::error::{EngineError, Result};
use crate::ledger::TradeLedger;
use crate::streams::{FeedEvent, FeedProvider, TickFeed};
use crate::trading_core::{StrategyBook, StrategyDefinition, StrategyId};
use crate::types::Interval;

/// How long `stop_live` waits for the tick loop before aborting it
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters of a start request; omitted values fall back to config defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    pub strategy_id: StrategyId,
    pub capital: Option<f64>,
    pub max_daily_loss: Option<f64>,
    pub allocation: Option<f64>,
    pub symbol: Option<String>,
    pub interval: Option<Interval>,
}

impl StartRequest {
    pub fn new(strategy_id: StrategyId, capital: f64, max_daily_loss: f64, allocation: f64) -> Self {
        Self {
            strategy_id,
            capital: Some(capital),
            max_daily_loss: Some(max_daily_loss),
            allocation: Some(allocation),
            ..Default::default()
        }
    }

    pub fn on(mut self, symbol: &str, interval: Interval) -> Self {
        self.symbol = Some(symbol.to_string());
        self.interval = Some(interval);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Started,
    AlreadyRunning,
    Halted,
    Stopped,
    AlreadyStopped,
    FlattenFailed,
}

impl std::fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::AlreadyRunning => "already_running",
            Self::Halted => "halted",
            Self::Stopped => "stopped",
            Self::AlreadyStopped => "already_stopped",
            Self::FlattenFailed => "flatten_failed",
        };
        f.write_str(s)
    }
}

/// `(ok, status)` answer of a start/stop call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub ok: bool,
    pub status: ControlStatus,
}

impl ControlOutcome {
    fn ok(status: ControlStatus) -> Self {
        Self { ok: true, status }
    }

    fn refused(status: ControlStatus) -> Self {
        Self { ok: false, status }
    }
}

/// Snapshot returned by `status()`
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub mode: ExecutionMode,
    pub state: SessionState,
    /// Current session, or the last one after a stop
    pub session: Option<LiveSession>,
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    trader: Option<Arc<Mutex<LiveTrader>>>,
    worker: Option<Worker>,
    last: Option<LiveSession>,
}

/// Runs at most one live session at a time
pub struct ExecutionManager {
    config: ExecutionConfig,
    strategies: Arc<StrategyBook>,
    broker: Arc<dyn Broker>,
    feeds: Arc<dyn FeedProvider>,
    ledger: Arc<TradeLedger>,
    events: broadcast::Sender<ExecutionEvent>,
    control: Mutex<Control>,
}

impl ExecutionManager {
    pub fn new(
        config: ExecutionConfig,
        strategies: Arc<StrategyBook>,
        broker: Arc<dyn Broker>,
        feeds: Arc<dyn FeedProvider>,
        ledger: Arc<TradeLedger>,
    ) -> Self {
        let (events, _) = broadcast::channel(1000);
        info!(
            "Execution manager ready: {} mode via {} broker",
            config.mode,
            broker.name()
        );
        Self {
            config,
            strategies,
            broker,
            feeds,
            ledger,
            events,
            control: Mutex::new(Control::default()),
        }
    }

    pub fn ledger(&self) -> &Arc<TradeLedger> {
        &self.ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Start a session. Only valid from STOPPED.
    pub async fn start_live(&self, request: StartRequest) -> Result<ControlOutcome> {
        let mut control = self.control.lock().await;

        if let Some(trader) = &control.trader {
            match trader.lock().await.state() {
                SessionState::Running => {
                    return Ok(ControlOutcome::refused(ControlStatus::AlreadyRunning))
                }
                SessionState::Halted => return Ok(ControlOutcome::refused(ControlStatus::Halted)),
                SessionState::Stopped => {}
            }
        }

        let capital = request.capital.unwrap_or(self.config.default_capital);
        let max_daily_loss = request
            .max_daily_loss
            .unwrap_or(self.config.default_max_daily_loss);
        let allocation = request.allocation.unwrap_or(self.config.default_allocation);
        validate_limits(capital, max_daily_loss, allocation)?;

        let definition = self.strategies.get(request.strategy_id)?;
        let params = definition.parsed_params()?;

        if !self.broker.is_authenticated() {
            self.broker.request_reauth();
            let _ = self.events.send(ExecutionEvent::ReauthRequired);
            return Err(EngineError::AuthExpired);
        }

        let symbol = request
            .symbol
            .or_else(|| payload_str(&definition, "symbol"))
            .unwrap_or_else(|| self.config.default_symbol.clone());
        let interval = match request.interval {
            Some(interval) => interval,
            None => payload_str(&definition, "interval")
                .map(|raw| Interval::from_str(&raw))
                .transpose()?
                .unwrap_or(self.config.default_interval),
        };

        let feed = self.feeds.open(&symbol, interval)?;

        let mut trader = LiveTrader::new(
            SessionSpec {
                strategy_id: definition.id,
                params,
                symbol,
                interval,
                capital,
                max_daily_loss,
                allocation,
            },
            &self.config,
            self.broker.clone(),
            self.ledger.clone(),
            self.events.clone(),
        );
        trader.start();
        let trader = Arc::new(Mutex::new(trader));

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_session(
            trader.clone(),
            feed,
            stop_rx,
            self.events.clone(),
        ));

        control.trader = Some(trader);
        control.worker = Some(Worker { stop_tx, handle });
        Ok(ControlOutcome::ok(ControlStatus::Started))
    }

    /// Stop the loop, flatten at the last seen price and return to STOPPED.
    ///
    /// Stopping a stopped manager is a successful no-op. If flattening fails
    /// the session is left as is and the call can be retried.
    pub async fn stop_live(&self) -> Result<ControlOutcome> {
        let mut control = self.control.lock().await;

        let Some(trader) = control.trader.clone() else {
            return Ok(ControlOutcome::ok(ControlStatus::AlreadyStopped));
        };

        if let Some(worker) = control.worker.take() {
            // the loop may already have exited on its own
            let _ = worker.stop_tx.send(true);
            let mut handle = worker.handle;
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("Tick loop did not stop within {:?} - aborting", STOP_JOIN_TIMEOUT);
                handle.abort();
            }
        }

        let mut trader = trader.lock().await;
        if let Err(e) = trader.flatten() {
            error!("Failed to flatten on stop: {}", e);
            return Ok(ControlOutcome::refused(ControlStatus::FlattenFailed));
        }
        trader.stop();
        control.last = Some(trader.session().clone());
        drop(trader);
        control.trader = None;

        Ok(ControlOutcome::ok(ControlStatus::Stopped))
    }

    pub async fn status(&self) -> ManagerStatus {
        let control = self.control.lock().await;
        let session = match &control.trader {
            Some(trader) => Some(trader.lock().await.session().clone()),
            None => control.last.clone(),
        };
        let state = match &control.trader {
            Some(_) => session
                .as_ref()
                .map(|s| s.state)
                .unwrap_or(SessionState::Stopped),
            None => SessionState::Stopped,
        };
        ManagerStatus {
            mode: self.config.mode,
            state,
            session,
        }
    }
}

fn validate_limits(capital: f64, max_daily_loss: f64, allocation: f64) -> Result<()> {
    if !(capital.is_finite() && capital > 0.0) {
        return Err(EngineError::validation(format!(
            "capital must be positive, got {capital}"
        )));
    }
    if !(max_daily_loss.is_finite() && max_daily_loss > 0.0) {
        return Err(EngineError::validation(format!(
            "max_daily_loss must be positive, got {max_daily_loss}"
        )));
    }
    if !(allocation > 0.0 && allocation <= 1.0) {
        return Err(EngineError::validation(format!(
            "allocation must be in (0, 1], got {allocation}"
        )));
    }
    Ok(())
}

/// Metadata string carried in the stored strategy payload
fn payload_str(definition: &StrategyDefinition, key: &str) -> Option<String> {
    definition
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Background tick loop. Exits on stop, end of stream, feed failure, or once
/// the session leaves RUNNING.
async fn run_session(
    trader: Arc<Mutex<LiveTrader>>,
    mut feed: Box<dyn TickFeed>,
    mut stop_rx: watch::Receiver<bool>,
    events: broadcast::Sender<ExecutionEvent>,
) {
    info!("Tick loop started on {} feed", feed.name());
    loop {
        let event = tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                debug!("Tick loop received stop");
                break;
            }
            event = feed.next() => event,
        };

        match event {
            Ok(FeedEvent::Candle(candle)) => {
                let mut trader = trader.lock().await;
                match trader.on_candle(candle, Instant::now()) {
                    Ok(outcome) => debug!("Tick {} -> {:?}", candle.timestamp, outcome),
                    Err(e) => error!("Tick processing failed: {}", e),
                }
                if !trader.is_running() {
                    info!("Session is {} - tick loop exiting", trader.state());
                    break;
                }
            }
            Ok(FeedEvent::WouldBlock) => continue,
            Ok(FeedEvent::EndOfStream) => {
                info!("{} feed ended", feed.name());
                break;
            }
            Err(e) => {
                error!("Market data lost: {}", e);
                let _ = events.send(ExecutionEvent::FeedUnavailable {
                    reason: e.to_string(),
                });
                break;
            }
        }
    }
}
