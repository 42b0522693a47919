// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Routes:
//   POST /webhook          — messaging-platform ingress (signature-checked)
//   GET  /api/v1/health    — liveness
//   GET  /ledger/records   — record collection (optional ?limit=, newest first)
//   GET  /ledger/stats     — derived statistics
//
// The ledger routes are read-only projections for the dashboard; they take
// the ledger lock only long enough to snapshot. CORS is configured
// permissively for development; tighten `allowed_origins` in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::webhook::handler::webhook;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Ingress ─────────────────────────────────────────────────
        .route("/webhook", post(webhook))
        // ── Dashboard (read-only) ───────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/ledger/records", get(ledger_records))
        .route("/ledger/stats", get(ledger_stats))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Ledger projections
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct RecordsQuery {
    limit: Option<usize>,
}

/// Record collection. With `?limit=N`, the N most recent records, newest
/// first; without, the full chronological collection.
async fn ledger_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> impl IntoResponse {
    let ledger = state.ledger.lock();
    let records = ledger.records();

    let body = match query.limit {
        Some(limit) => {
            let start = records.len().saturating_sub(limit);
            let mut tail = records[start..].to_vec();
            tail.reverse();
            tail
        }
        None => records.to_vec(),
    };
    Json(body)
}

async fn ledger_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.ledger.lock().compute_stats(Utc::now());
    Json(stats)
}
