use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::backtest::{BacktestEngine, BacktestReport};
use crate::error::EngineError;
use crate::execution::{ControlOutcome, ExecutionManager, ManagerStatus, StartRequest};
use crate::ledger::TradeRecord;
use crate::streams::CandleSource;
use crate::trading_core::{StrategyBook, StrategyId};
use crate::types::{parse_timestamp, Candle, Interval};

/// Served by `/api/symbols` while no history is loaded
pub const FALLBACK_SYMBOLS: [&str; 5] = ["NIFTY 50", "BANKNIFTY", "RELIANCE.NS", "TCS.NS", "INFY.NS"];

const DEFAULT_TRADES_LIMIT: usize = 100;

/// Shared handles behind every route
pub struct AppState {
    pub strategies: Arc<StrategyBook>,
    pub history: Arc<dyn CandleSource>,
    pub backtests: Arc<BacktestEngine>,
    pub manager: Arc<ExecutionManager>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/symbols", get(list_symbols))
        .route("/api/candles", get(get_candles))
        .route("/api/strategies", get(list_strategies).post(create_strategy))
        .route("/api/backtest", post(run_backtest))
        .route("/api/live/start", post(start_live))
        .route("/api/live/stop", post(stop_live))
        .route("/api/live/status", get(live_status))
        .route("/api/trades", get(list_trades))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .with_state(state)
}

/// JSON error body with an HTTP status derived from the engine error kind
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal_error",
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Validation(_) | EngineError::Configuration(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::RiskBreach { .. } => StatusCode::CONFLICT,
            EngineError::AuthExpired => StatusCode::UNAUTHORIZED,
            EngineError::FeedUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Order(_) => StatusCode::BAD_GATEWAY,
            EngineError::Ledger(_) | EngineError::Io(_) | EngineError::Csv(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": self.message, "kind": self.kind})),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// GET /api/ping
async fn ping() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// GET /api/symbols
async fn list_symbols(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    let symbols = state.history.symbols();
    if symbols.is_empty() {
        return Json(FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect());
    }
    Json(symbols)
}

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    pub symbol: String,
    #[serde(default)]
    pub interval: Interval,
    pub from_ts: Option<String>,
    pub to_ts: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CandlesResponse {
    pub symbol: String,
    pub interval: Interval,
    pub candles: Vec<Candle>,
}

/// GET /api/candles
async fn get_candles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandlesQuery>,
) -> ApiResult<CandlesResponse> {
    let from = query.from_ts.as_deref().map(|raw| parse_timestamp(raw, false)).transpose()?;
    let to = query.to_ts.as_deref().map(|raw| parse_timestamp(raw, true)).transpose()?;
    let candles = state.history.candles(&query.symbol, query.interval, from, to)?;
    Ok(Json(CandlesResponse {
        symbol: query.symbol,
        interval: query.interval,
        candles,
    }))
}

#[derive(Debug, Serialize)]
pub struct StrategySummary {
    pub id: StrategyId,
    pub name: String,
}

/// POST /api/strategies - stores the whole payload as the strategy params
async fn create_strategy(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> ApiResult<Value> {
    if !payload.is_object() {
        return Err(EngineError::validation("strategy payload must be a JSON object").into());
    }
    let name = payload
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("unnamed")
        .to_string();
    let definition = state.strategies.create(name, payload);
    Ok(Json(json!({"id": definition.id})))
}

/// GET /api/strategies
async fn list_strategies(State(state): State<Arc<AppState>>) -> Json<Vec<StrategySummary>> {
    Json(
        state
            .strategies
            .list()
            .iter()
            .map(|s| StrategySummary {
                id: s.id,
                name: s.name.clone(),
            })
            .collect(),
    )
}

/// Strategy ids arrive as numbers or numeric strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StrategyRef {
    Id(StrategyId),
    Text(String),
}

impl StrategyRef {
    fn resolve(&self) -> Result<StrategyId, EngineError> {
        match self {
            Self::Id(id) => Ok(*id),
            Self::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| EngineError::not_found("strategy", raw)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BacktestBody {
    pub symbol: String,
    #[serde(default)]
    pub interval: Interval,
    pub from_ts: Option<String>,
    pub to_ts: Option<String>,
    pub strategy_id: StrategyRef,
}

/// POST /api/backtest
async fn run_backtest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BacktestBody>,
) -> ApiResult<BacktestReport> {
    let definition = state.strategies.get(body.strategy_id.resolve()?)?;
    let from = body.from_ts.as_deref().map(|raw| parse_timestamp(raw, false)).transpose()?;
    let to = body.to_ts.as_deref().map(|raw| parse_timestamp(raw, true)).transpose()?;

    let engine = state.backtests.clone();
    let report = tokio::task::spawn_blocking(move || {
        engine.run_definition(&definition, &body.symbol, body.interval, from, to)
    })
    .await
    .map_err(|e| ApiError::internal(format!("backtest task failed: {e}")))??;

    Ok(Json(report))
}

fn control_response(outcome: ControlOutcome) -> (StatusCode, Json<ControlOutcome>) {
    let status = if outcome.ok {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(outcome))
}

/// POST /api/live/start
async fn start_live(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let strategy_id = request.strategy_id;
    let outcome = state.manager.start_live(request).await?;
    if outcome.ok {
        info!("Live session started for strategy {}", strategy_id);
    } else {
        warn!("Live start refused: {}", outcome.status);
    }
    Ok(control_response(outcome))
}

/// POST /api/live/stop
async fn stop_live(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.manager.stop_live().await?;
    Ok(control_response(outcome))
}

/// GET /api/live/status
async fn live_status(State(state): State<Arc<AppState>>) -> Json<ManagerStatus> {
    Json(state.manager.status().await)
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<usize>,
}

/// GET /api/trades - newest first
async fn list_trades(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TradesQuery>,
) -> Json<Vec<TradeRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_TRADES_LIMIT);
    Json(state.manager.ledger().recent(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::validation("x"), StatusCode::BAD_REQUEST),
            (EngineError::not_found("strategy", 9), StatusCode::NOT_FOUND),
            (EngineError::AuthExpired, StatusCode::UNAUTHORIZED),
            (
                EngineError::FeedUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (EngineError::Ledger("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let kind = err.kind();
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
            assert_eq!(api.kind, kind);
        }
    }

    #[test]
    fn strategy_refs_accept_numeric_strings() {
        assert_eq!(StrategyRef::Text(" 7 ".into()).resolve().unwrap(), 7);
        assert_eq!(StrategyRef::Id(3).resolve().unwrap(), 3);
        assert!(matches!(
            StrategyRef::Text("abc".into()).resolve(),
            Err(EngineError::NotFound { .. })
        ));
    }
}
