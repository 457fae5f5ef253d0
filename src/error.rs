use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Telemetry source error: {0}")]
    Source(#[from] SourceError),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Observer fatal: {0}")]
    ObserverFatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::ChannelSend(_) | AppError::ObserverFatal(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Failures reading the remote view.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The per-round view (frame, agent) can no longer be found.
    #[error("view handle lost: {0}")]
    ViewLost(String),

    #[error("source call timed out after {0}ms")]
    Timeout(u64),

    #[error("source transport error: {0}")]
    Transport(String),

    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error("source not connected")]
    NotConnected,
}

impl SourceError {
    /// Retryable failures skip the tick and schedule recovery instead of stopping the poller.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Malformed(_))
    }

    /// View loss goes straight to resync rather than a signature scan first.
    pub fn is_view_loss(&self) -> bool {
        matches!(self, SourceError::ViewLost(_) | SourceError::NotConnected)
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout(0)
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Failures of a bet / cash-out action on the platform.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("action rejected: {0}")]
    Rejected(String),

    /// The control is not present or disabled on the page.
    #[error("control unavailable: {0}")]
    Unavailable(String),

    #[error("action timed out after {0}ms")]
    Timeout(u64),

    #[error("action transport error: {0}")]
    Transport(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Timeout(_) | ActionError::Transport(_))
    }
}

impl From<SourceError> for ActionError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Timeout(ms) => ActionError::Timeout(ms),
            SourceError::ViewLost(m) => ActionError::Unavailable(m),
            other => ActionError::Transport(other.to_string()),
        }
    }
}

/// Why a bet placement request was not accepted.
#[derive(Debug, Clone, Error)]
pub enum PlacementError {
    #[error("system is disabled")]
    Disabled,

    #[error("betting phase is not active")]
    NotBettingPhase,

    #[error("placement cooldown: {remaining_ms}ms remaining")]
    Cooldown { remaining_ms: u64 },

    #[error("a bet set is already active")]
    AlreadyActive,

    #[error("invalid leg {index}: {reason}")]
    InvalidLeg { index: usize, reason: String },

    #[error("placement action failed: {0}")]
    Action(#[from] ActionError),

    #[error("placement cancelled")]
    Cancelled,

    #[error("engine is not running")]
    EngineGone,
}

impl IntoResponse for PlacementError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            PlacementError::Disabled | PlacementError::EngineGone => StatusCode::SERVICE_UNAVAILABLE,
            PlacementError::NotBettingPhase
            | PlacementError::Cooldown { .. }
            | PlacementError::AlreadyActive
            | PlacementError::Cancelled => StatusCode::CONFLICT,
            PlacementError::InvalidLeg { .. } => StatusCode::BAD_REQUEST,
            PlacementError::Action(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}
