// =============================================================================
// Central Application State — Pump Sniper
// =============================================================================
//
// Ties the subsystems together for the monitoring API. Every subsystem owns
// its own interior mutability; AppState only holds Arc references and builds
// read-only snapshots.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::engine::ExitEngine;
use crate::market_data::FeedHandle;
use crate::position_engine::TrackingRecord;
use crate::runtime_config::RuntimeConfig;
use crate::sniper::Sniper;
use crate::types::AccountMode;

/// Full engine snapshot served to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub account_mode: AccountMode,
    pub accepting: bool,
    pub held_assets: usize,
    pub max_held_assets: usize,
    pub subscribed_mints: Vec<String>,
    pub open_positions: Vec<TrackingRecord>,
    pub started_at: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
}

pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub engine: Arc<ExitEngine>,
    pub sniper: Arc<Sniper>,
    pub feed: FeedHandle,
    /// Bearer token for authenticated endpoints; `None` rejects them all.
    admin_token: Option<String>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        engine: Arc<ExitEngine>,
        sniper: Arc<Sniper>,
        feed: FeedHandle,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            engine,
            sniper,
            feed,
            admin_token: admin_token.filter(|t| !t.is_empty()),
            started_at: Utc::now(),
        }
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn build_snapshot(&self) -> EngineSnapshot {
        let account_mode = self.runtime_config.read().account_mode;
        let mut subscribed_mints = self.feed.subscribed();
        subscribed_mints.sort();

        EngineSnapshot {
            account_mode,
            accepting: self.engine.registry().is_accepting(),
            held_assets: self.sniper.held_count(),
            max_held_assets: self.engine.registry().max_open(),
            subscribed_mints,
            open_positions: self.engine.registry().snapshots(),
            started_at: self.started_at,
            server_time: Utc::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("feed", &self.feed)
            .field("auth_configured", &self.admin_token.is_some())
            .finish()
    }
}
