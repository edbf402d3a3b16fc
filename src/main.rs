// =============================================================================
// Pump Sniper — Main Entry Point
// =============================================================================
//
// The engine starts in Demo mode for safety. Live trading requires both
// PUMP_SNIPER_LIVE=1 and PUMPPORTAL_API_KEY.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pump_sniper::adapter::build_adapter;
use pump_sniper::api;
use pump_sniper::app_state::AppState;
use pump_sniper::engine::ExitEngine;
use pump_sniper::exit::run_liveness_monitor;
use pump_sniper::market_data::{run_pump_stream, FeedHandle};
use pump_sniper::runtime_config::RuntimeConfig;
use pump_sniper::smart_filters::HttpMetadataSource;
use pump_sniper::sniper::Sniper;
use pump_sniper::types::AccountMode;

const DEFAULT_CONFIG_PATH: &str = "pump_sniper.json";
const FEED_RECONNECT_SECS: u64 = 5;
const FEED_EVENT_BUFFER: usize = 1024;
/// Grace period for in-flight sells after the shutdown signal.
const SHUTDOWN_GRACE_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Pump Sniper — Starting Up                         ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("PUMP_SNIPER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = if std::path::Path::new(&config_path).exists() {
        RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            RuntimeConfig::default()
        })
    } else {
        let defaults = RuntimeConfig::default();
        match defaults.save(&config_path) {
            Ok(()) => info!(path = %config_path, "No config found, wrote defaults"),
            Err(e) => warn!(error = %e, "Could not persist default config"),
        }
        defaults
    };

    config.api_key = std::env::var("PUMPPORTAL_API_KEY")
        .ok()
        .filter(|k| !k.is_empty());
    if let Ok(addr) = std::env::var("PUMP_SNIPER_BIND_ADDR") {
        config.bind_addr = addr;
    }

    // SAFETY: Demo unless Live is explicitly requested for this run.
    let live_requested = std::env::var("PUMP_SNIPER_LIVE").map(|v| v == "1").unwrap_or(false);
    config.account_mode = if live_requested {
        AccountMode::Live
    } else {
        AccountMode::Demo
    };

    config.validate().context("invalid runtime configuration")?;

    info!(
        account_mode = %config.account_mode,
        max_held_assets = config.max_held_assets,
        buy_amount_sol = config.buy_amount_sol,
        stop_loss_pct = config.exit.stop_loss_pct,
        ladder_step = config.exit.ladder_step,
        "Configuration ready"
    );

    // ── 2. Collaborators ─────────────────────────────────────────────────
    let adapter = build_adapter(&config).context("failed to build trade adapter")?;
    let metadata = Arc::new(
        HttpMetadataSource::new(Duration::from_secs(config.metadata_timeout_secs))
            .context("failed to build metadata client")?,
    );
    let (feed, mut feed_commands) = FeedHandle::new();

    // ── 3. Engine & sniper ───────────────────────────────────────────────
    let (engine, released) = ExitEngine::new(&config, adapter, Arc::new(feed.clone()));
    let engine = Arc::new(engine);
    let sniper = Arc::new(Sniper::new(
        config.clone(),
        Arc::clone(&engine),
        Arc::new(feed.clone()),
        metadata,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 4. Market data feed (reconnects forever) ─────────────────────────
    let (events_tx, events_rx) = mpsc::channel(FEED_EVENT_BUFFER);
    let feed_url = config.feed_url.clone();
    let feed_handle = feed.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) =
                run_pump_stream(&feed_url, &feed_handle, &mut feed_commands, &events_tx).await
            {
                error!(error = %e, "PumpPortal stream error — reconnecting in 5s");
            }
            if events_tx.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(FEED_RECONNECT_SECS)).await;
        }
    });

    // ── 5. Ingestion loop ────────────────────────────────────────────────
    let ingestion = tokio::spawn(Arc::clone(&sniper).run(events_rx, released, shutdown_rx.clone()));

    // ── 6. Liveness monitor ──────────────────────────────────────────────
    tokio::spawn(run_liveness_monitor(
        Arc::clone(&engine),
        config.exit.clone(),
        shutdown_rx.clone(),
    ));

    // ── 7. Monitoring API ────────────────────────────────────────────────
    let admin_token = std::env::var("PUMP_SNIPER_ADMIN_TOKEN").ok();
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&engine),
        Arc::clone(&sniper),
        feed,
        admin_token,
    ));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api::router(state)).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);
    if let Err(e) = ingestion.await {
        error!(error = %e, "Ingestion loop panicked");
    }

    // In-flight sells run on their own tasks; give them a moment to settle.
    tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;

    let still_open = engine.registry().snapshots();
    if !still_open.is_empty() {
        warn!(
            count = still_open.len(),
            mints = ?still_open.iter().map(|r| r.mint().to_string()).collect::<Vec<_>>(),
            "Positions still open at shutdown"
        );
    }

    info!("Pump Sniper shut down complete.");
    Ok(())
}
