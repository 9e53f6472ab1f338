//! Error taxonomy shared by the backtest and live execution paths

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input parameters. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed strategy parameters or environment configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("daily loss limit breached: running pnl {running_pnl:.2} <= -{max_daily_loss:.2}")]
    RiskBreach {
        running_pnl: f64,
        max_daily_loss: f64,
    },

    #[error("broker token invalid or expired, re-authentication required")]
    AuthExpired,

    #[error("market data feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("order placement failed: {0}")]
    Order(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable tag, used as the status string on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Configuration(_) => "configuration_error",
            Self::RiskBreach { .. } => "risk_breach",
            Self::AuthExpired => "auth_expired",
            Self::FeedUnavailable(_) => "feed_unavailable",
            Self::Order(_) => "order_failed",
            Self::Ledger(_) => "ledger_error",
            Self::Io(_) | Self::Csv(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
