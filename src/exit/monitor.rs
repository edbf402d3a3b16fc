// =============================================================================
// Liveness Monitor Loop — periodic stale-asset sweep
// =============================================================================
//
// Runs as a background Tokio task, waking every `liveness_check_secs` to:
//   1. Find held assets whose last trade is older than the liveness window.
//   2. Force a full liquidation of each through the normal exit executor.
//
//   tokio::spawn(run_liveness_monitor(
//       Arc::clone(&engine),
//       config.exit.clone(),
//       shutdown_rx,
//   ));
//
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::ExitEngine;
use crate::runtime_config::ExitParams;
use crate::types::ExitReason;

/// Run the liveness monitor until `shutdown` flips to `true`.
pub async fn run_liveness_monitor(
    engine: Arc<ExitEngine>,
    params: ExitParams,
    mut shutdown: watch::Receiver<bool>,
) {
    let timeout = chrono::Duration::seconds(params.liveness_timeout_secs as i64);
    let check_every = Duration::from_secs(params.liveness_check_secs.max(1));

    info!(
        timeout_secs = params.liveness_timeout_secs,
        interval_secs = check_every.as_secs(),
        "Liveness monitor started"
    );

    let mut ticker = interval(check_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Liveness monitor stopped");
                    return;
                }
                continue;
            }
        }

        if !engine.registry().is_accepting() {
            continue;
        }

        let stale = engine.stale_assets(Utc::now(), timeout);
        if stale.is_empty() {
            debug!(
                open = engine.registry().open_count(),
                "Liveness monitor: all assets fresh"
            );
            continue;
        }

        for mint in stale {
            let Some(pending) = engine.force_exit(&mint, ExitReason::Stale) else {
                continue;
            };
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let outcome = engine.execute(pending).await;
                info!(mint = %mint, outcome = %outcome, "Stale asset liquidation finished");
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
