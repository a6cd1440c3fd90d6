//! HTTP API for health checks, transaction history, and monitoring

use crate::config::ApiConfig;
use crate::error::OrchestratorResult;
use crate::model::StoredTransaction;
use crate::state::HistoryStore;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<HistoryStore>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, history: Arc<HistoryStore>) -> OrchestratorResult<()> {
    let state = AppState { history };

    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::OrchestratorError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::OrchestratorError::Internal(e.to_string()))?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/transactions", get(list_transactions))
        .route("/transactions/:id", get(get_transaction))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the store answers queries
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_ok = state.history.health_check().await.is_ok();

    let status = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready: storage_ok,
            storage: storage_ok,
            active_pollers: state.history.active_pollers(),
        }),
    )
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

/// Recent transaction records, newest first
async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match state.history.list(limit).await {
        Ok(transactions) => (
            StatusCode::OK,
            Json(TransactionsResponse { transactions }),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(TransactionsResponse {
                transactions: Vec::new(),
            }),
        ),
    }
}

/// One transaction record by execution id
async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.history.get(&id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(Some(record))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(None)),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(None)),
    }
}

/// Transaction counts by status
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.history.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StatsResponse {
                pending: stats.pending,
                executing: stats.executing,
                completed: stats.completed,
                failed: stats.failed,
            }),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatsResponse {
                pending: 0,
                executing: 0,
                completed: 0,
                failed: 0,
            }),
        ),
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    storage: bool,
    active_pollers: usize,
}

#[derive(Serialize)]
struct TransactionsResponse {
    transactions: Vec<StoredTransaction>,
}

#[derive(Serialize)]
struct StatsResponse {
    pending: u64,
    executing: u64,
    completed: u64,
    failed: u64,
}
