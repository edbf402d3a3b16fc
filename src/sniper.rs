// =============================================================================
// Sniper — entry pipeline and ingestion loop
// =============================================================================
//
// New token flow (one spawned task per token, bounded by a semaphore):
//
//   admit (held-asset cap) -> fetch metadata -> filters -> buy -> open record
//     -> subscribe trades
//
// Any step that does not end in an open record gives the admission slot back.
// The slot of an open record is given back when the registry reports the
// asset fully exited.
//
// The ingestion loop applies trade ticks synchronously (per-asset arrival
// order) and spawns the resulting sells so a slow adapter never stalls it.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::adapter::{BuyOrder, SellAmount, SellOrder};
use crate::engine::ExitEngine;
use crate::market_data::{FeedEvent, NewTokenEvent, Subscriptions};
use crate::position_engine::TrackingRecord;
use crate::runtime_config::RuntimeConfig;
use crate::smart_filters::{FilterPipeline, MetadataSource};

/// Result of handling one newly created token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EntryOutcome {
    Opened(TrackingRecord),
    AlreadyHeld,
    AtCapacity,
    /// The creation event carried no usable price.
    NoQuote,
    Filtered(Vec<String>),
    Failed(String),
}

impl std::fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened(record) => write!(f, "Opened({})", record.mint()),
            Self::AlreadyHeld => write!(f, "AlreadyHeld"),
            Self::AtCapacity => write!(f, "AtCapacity"),
            Self::NoQuote => write!(f, "NoQuote"),
            Self::Filtered(by) => write!(f, "Filtered({})", by.join(",")),
            Self::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

pub struct Sniper {
    config: RuntimeConfig,
    engine: Arc<ExitEngine>,
    subscriptions: Arc<dyn Subscriptions>,
    metadata: Arc<dyn MetadataSource>,
    filters: FilterPipeline,
    /// Mints held or with a buy in flight.
    admitted: Mutex<HashSet<String>>,
    entry_permits: Semaphore,
}

impl Sniper {
    pub fn new(
        config: RuntimeConfig,
        engine: Arc<ExitEngine>,
        subscriptions: Arc<dyn Subscriptions>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Self {
        let filters = FilterPipeline::from_config(&config);
        let entry_permits = Semaphore::new(config.max_concurrent_entries.max(1));
        Self {
            config,
            engine,
            subscriptions,
            metadata,
            filters,
            admitted: Mutex::new(HashSet::new()),
            entry_permits,
        }
    }

    pub fn engine(&self) -> &Arc<ExitEngine> {
        &self.engine
    }

    pub fn held_count(&self) -> usize {
        self.admitted.lock().len()
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    fn try_admit(&self, mint: &str) -> Result<(), EntryOutcome> {
        let mut admitted = self.admitted.lock();
        if admitted.contains(mint) {
            return Err(EntryOutcome::AlreadyHeld);
        }
        if admitted.len() >= self.config.max_held_assets {
            return Err(EntryOutcome::AtCapacity);
        }
        admitted.insert(mint.to_string());
        Ok(())
    }

    /// Give back the admission slot of `mint`.
    pub fn release(&self, mint: &str) {
        if self.admitted.lock().remove(mint) {
            info!(mint, held = self.held_count(), "held-asset slot released");
        }
    }

    // -------------------------------------------------------------------------
    // Entry pipeline
    // -------------------------------------------------------------------------

    /// Run the whole entry pipeline for a freshly created token.
    pub async fn handle_new_token(&self, event: NewTokenEvent) -> EntryOutcome {
        if let Err(outcome) = self.try_admit(&event.mint) {
            debug!(mint = %event.mint, outcome = %outcome, "token not admitted");
            return outcome;
        }

        let outcome = match self.entry_permits.acquire().await {
            Ok(_permit) => self.enter(&event).await,
            Err(_) => EntryOutcome::Failed("entry workers closed".into()),
        };

        match &outcome {
            EntryOutcome::Opened(record) => {
                info!(
                    mint = %record.mint(),
                    symbol = %record.symbol(),
                    entry_price = record.entry_price(),
                    quantity = record.acquired_quantity(),
                    held = self.held_count(),
                    "ENTRY OPENED"
                );
            }
            other => {
                info!(mint = %event.mint, symbol = %event.symbol, outcome = %other, "entry skipped");
                self.release(&event.mint);
            }
        }
        outcome
    }

    async fn enter(&self, event: &NewTokenEvent) -> EntryOutcome {
        let Some(quote_price) = event.quote_price() else {
            return EntryOutcome::NoQuote;
        };

        let metadata = if event.uri.is_empty() {
            None
        } else {
            match self.metadata.fetch(&event.uri).await {
                Ok(mut metadata) => {
                    if metadata.name.is_empty() {
                        metadata.name = event.name.clone();
                    }
                    if metadata.symbol.is_empty() {
                        metadata.symbol = event.symbol.clone();
                    }
                    Some(metadata)
                }
                Err(e) => {
                    warn!(mint = %event.mint, uri = %event.uri, error = %e, "metadata fetch failed");
                    None
                }
            }
        };

        let verdict = self.filters.evaluate(metadata.as_ref());
        if !verdict.passed {
            return EntryOutcome::Filtered(verdict.rejected_by);
        }

        let order = BuyOrder {
            mint: event.mint.clone(),
            sol_amount: self.config.buy_amount_sol,
            slippage_pct: self.config.slippage_pct,
            priority_fee_sol: self.config.priority_fee_sol,
            pool: self.config.pool,
            quote_price,
        };
        let fill = match self.engine.adapter().buy(&order).await {
            Ok(fill) => fill,
            Err(e) => return EntryOutcome::Failed(format!("buy failed: {e}")),
        };

        let symbol = if event.symbol.is_empty() {
            metadata.map(|m| m.symbol).unwrap_or_default()
        } else {
            event.symbol.clone()
        };
        let record = match self
            .engine
            .open(&event.mint, &symbol, fill.token_quantity, fill.price)
        {
            Ok(record) => record,
            Err(e) => {
                warn!(mint = %event.mint, signature = %fill.signature, error = %e,
                    "bought but could not track position — selling back");
                self.sell_back(&event.mint, fill.price).await;
                return EntryOutcome::Failed(e.to_string());
            }
        };

        // Without trade data the liveness monitor liquidates the position.
        if let Err(e) = self.subscriptions.subscribe(&[event.mint.clone()]) {
            warn!(mint = %event.mint, error = %e, "trade subscription failed");
        }

        EntryOutcome::Opened(record)
    }

    /// Liquidate tokens that were bought but could not be tracked.
    async fn sell_back(&self, mint: &str, reference_price: f64) {
        let order = SellOrder {
            mint: mint.to_string(),
            amount: SellAmount::Percent(100.0),
            slippage_pct: self.config.slippage_pct,
            priority_fee_sol: self.config.priority_fee_sol,
            pool: self.config.pool,
            reference_price,
        };
        match self.engine.adapter().sell(&order).await {
            Ok(fill) => info!(mint, signature = %fill.signature, "untracked buy sold back"),
            Err(e) => error!(mint, error = %e, "sell-back failed — tokens left untracked"),
        }
    }

    // -------------------------------------------------------------------------
    // Ingestion loop
    // -------------------------------------------------------------------------

    /// Consume feed events and release notifications until shutdown or until
    /// the feed channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<FeedEvent>,
        mut released: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            max_held = self.config.max_held_assets,
            max_entries = self.config.max_concurrent_entries,
            filters = ?self.filters.names(),
            "Sniper ingestion loop started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(mint) = released.recv() => {
                    self.release(&mint);
                }
                event = events.recv() => match event {
                    Some(FeedEvent::Trade(tick)) => {
                        if let Some(pending) = self.engine.ingest(&tick) {
                            let engine = Arc::clone(&self.engine);
                            tokio::spawn(async move {
                                engine.execute(pending).await;
                            });
                        }
                    }
                    Some(FeedEvent::NewToken(token)) => {
                        if !self.engine.registry().is_accepting() {
                            continue;
                        }
                        let sniper = Arc::clone(&self);
                        tokio::spawn(async move {
                            sniper.handle_new_token(token).await;
                        });
                    }
                    Some(FeedEvent::Notice(notice)) => {
                        debug!(notice = %notice, "feed notice");
                    }
                    None => {
                        warn!("feed event channel closed");
                        break;
                    }
                },
            }
        }

        self.engine.shutdown();
        self.entry_permits.close();
        info!(held = self.held_count(), "Sniper ingestion loop stopped");
    }
}

impl std::fmt::Debug for Sniper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sniper")
            .field("held", &self.held_count())
            .field("filters", &self.filters)
            .field("engine", &self.engine)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
