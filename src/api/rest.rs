// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires a valid Bearer token via the `AuthBearer` extractor. The surface is
// read-only: it reports positions, it never trades.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::AccountMode;

/// Default and maximum number of closed positions returned.
const DEFAULT_CLOSED_LIMIT: usize = 50;
const MAX_CLOSED_LIMIT: usize = 200;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/positions/closed", get(closed_positions))
        .route("/api/v1/positions/:mint", get(position))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    account_mode: AccountMode,
    accepting: bool,
    open_positions: usize,
    held_assets: usize,
    uptime_secs: i64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let resp = HealthResponse {
        status: "ok",
        account_mode: state.runtime_config.read().account_mode,
        accepting: state.engine.registry().is_accepting(),
        open_positions: state.engine.registry().open_count(),
        held_assets: state.sniper.held_count(),
        uptime_secs: now.signed_duration_since(state.started_at()).num_seconds(),
        server_time: now.timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// State & positions (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn positions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.registry().snapshots())
}

async fn position(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(mint): Path<String>,
) -> Response {
    match state.engine.get_snapshot(&mint) {
        Ok(record) => Json(record).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ClosedQuery {
    limit: Option<usize>,
}

async fn closed_positions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClosedQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CLOSED_LIMIT)
        .min(MAX_CLOSED_LIMIT);
    Json(state.engine.registry().closed(limit))
}

// =============================================================================
// Tests
// =============================================================================
