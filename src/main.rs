// =============================================================================
// Meridian Advisor Relay — Main Entry Point
// =============================================================================
//
// Webhook in, AI advisory out, with a risk-gated trade-decision ledger in
// between. Secrets come from the environment; tunables from
// runtime_config.json.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod ai;
mod api;
mod app_state;
mod extractor;
mod ingest;
mod ledger;
mod outcome;
mod regime;
mod risk;
mod runtime_config;
mod types;
mod webhook;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, Secrets};
use crate::runtime_config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian Advisor Relay — starting up");

    let config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    let secrets = Secrets::from_env();
    if secrets.channel_secret.is_empty() {
        warn!("MERIDIAN_CHANNEL_SECRET is not set — all webhook deliveries will be rejected");
    }
    if secrets.ai_api_key.is_empty() {
        warn!("MERIDIAN_AI_API_KEY is not set — AI calls will fail");
    }

    info!(
        bind_addr = %config.bind_addr,
        ledger_path = %config.ledger_path,
        ai_model = %config.ai_model,
        max_consecutive_losses = config.max_consecutive_losses,
        daily_stop_r = config.daily_stop_r,
        "configuration resolved"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, secrets));

    // ── 3. Serve ─────────────────────────────────────────────────────────
    let bind_addr = state.runtime_config.read().bind_addr.clone();
    let app = api::rest::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {bind_addr}: {e}"))?;
    info!(addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await?;

    info!("Meridian Advisor Relay shut down complete.");
    Ok(())
}
