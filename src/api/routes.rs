use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::api::health::{HealthReport, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::db::{models::RoundRow, recent_rounds};
use crate::engine::EngineCommand;
use crate::error::{AppError, PlacementError};
use crate::types::LegRequest;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub commands: mpsc::Sender<EngineCommand>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/rounds/recent", get(get_recent_rounds))
        .route("/stats/latency", get(get_stats_latency))
        .route("/bets", post(post_bets))
        .route("/control/enable", post(post_enable))
        .route("/control/disable", post(post_disable))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentRoundsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BetSetRequest {
    pub legs: Vec<LegRequest>,
}

#[derive(Debug, Serialize)]
pub struct BetSetAccepted {
    pub bet_set_id: u64,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Response {
    let report: HealthReport = state.health.report();
    let status = if report.halted { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (status, Json(report)).into_response()
}

async fn get_recent_rounds(
    State(state): State<ApiState>,
    Query(params): Query<RecentRoundsQuery>,
) -> Result<Json<Vec<RoundRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 1_000);
    Ok(Json(recent_rounds(&state.pool, limit).await?))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

async fn post_bets(
    State(state): State<ApiState>,
    Json(body): Json<BetSetRequest>,
) -> Result<Json<BetSetAccepted>, PlacementError> {
    let legs: [LegRequest; 2] = body.legs.try_into().map_err(|v: Vec<LegRequest>| {
        PlacementError::InvalidLeg { index: v.len(), reason: "exactly two legs are required".to_string() }
    })?;
    let (reply, rx) = oneshot::channel();
    state
        .commands
        .send(EngineCommand::PlaceBetSet { legs, reply })
        .await
        .map_err(|_| PlacementError::EngineGone)?;
    let bet_set_id = rx.await.map_err(|_| PlacementError::EngineGone)??;
    Ok(Json(BetSetAccepted { bet_set_id }))
}

async fn post_enable(State(state): State<ApiState>) -> Result<Json<ControlResponse>, AppError> {
    set_enabled(&state, true).await
}

async fn post_disable(State(state): State<ApiState>) -> Result<Json<ControlResponse>, AppError> {
    set_enabled(&state, false).await
}

async fn set_enabled(state: &ApiState, enabled: bool) -> Result<Json<ControlResponse>, AppError> {
    let (reply, rx) = oneshot::channel();
    state
        .commands
        .send(EngineCommand::SetEnabled { enabled, reply })
        .await
        .map_err(|e| AppError::ChannelSend(e.to_string()))?;
    let enabled = rx.await.map_err(|e| AppError::ChannelSend(e.to_string()))?;
    Ok(Json(ControlResponse { enabled }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state(commands: mpsc::Sender<EngineCommand>) -> ApiState {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ApiState {
            pool,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            commands,
        }
    }

    #[tokio::test]
    async fn bet_request_needs_two_legs() {
        let (tx, _rx) = mpsc::channel(1);
        let body = BetSetRequest { legs: vec![LegRequest { amount: 1.0, target: 2.0 }] };
        let err = post_bets(State(state(tx).await), Json(body)).await.unwrap_err();
        assert!(matches!(err, PlacementError::InvalidLeg { index: 1, .. }));
    }

    #[tokio::test]
    async fn bet_request_is_answered_by_the_engine() {
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(async move {
            if let Some(EngineCommand::PlaceBetSet { reply, .. }) = rx.recv().await {
                let _ = reply.send(Err(PlacementError::Cooldown { remaining_ms: 900 }));
            }
        });
        let body = BetSetRequest {
            legs: vec![LegRequest { amount: 1.0, target: 2.0 }, LegRequest { amount: 2.0, target: 1.5 }],
        };
        let err = post_bets(State(state(tx).await), Json(body)).await.unwrap_err();
        assert!(matches!(err, PlacementError::Cooldown { remaining_ms: 900 }));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn stopped_engine_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let body = BetSetRequest {
            legs: vec![LegRequest { amount: 1.0, target: 2.0 }, LegRequest { amount: 2.0, target: 1.5 }],
        };
        let err = post_bets(State(state(tx).await), Json(body)).await.unwrap_err();
        assert!(matches!(err, PlacementError::EngineGone));
    }
}
