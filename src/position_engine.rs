// =============================================================================
// Position Engine — registry of held assets and their tracking records
// =============================================================================
//
// Life-cycle of a record:
//   open  ->  Bought  ->  (Selling -> Bought)*  ->  Selling  ->  Sold  -> close
//
// Locking:
//   - `records` (RwLock) guards only the map structure and is held briefly.
//   - each record has its own Mutex guarding price and sell bookkeeping.
//   The map lock is always released before a record lock is taken; the two
//   are never held together.
//
// Closing a sold record unsubscribes its trade stream and emits exactly one
// release notification on the channel returned by `PositionRegistry::new`.
// =============================================================================

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, TickError};
use crate::market_data::{Subscriptions, TradeTick};
use crate::numeric::{round_price, round_quantity};
use crate::types::TradeStatus;

/// Sold fractions within this distance of each other are considered equal.
pub const FRACTION_EPSILON: f64 = 1e-9;

/// Closed records retained for monitoring.
const MAX_CLOSED_HISTORY: usize = 200;

// ---------------------------------------------------------------------------
// Tracking record
// ---------------------------------------------------------------------------

/// State of a single held asset.
///
/// `entry_price` and `acquired_quantity` are fixed at creation. `sold_fraction`
/// only ever grows and `remaining_quantity` is always derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingRecord {
    mint: String,
    symbol: String,
    entry_price: f64,
    current_price: f64,
    highest_price: f64,
    acquired_quantity: f64,
    remaining_quantity: f64,
    sold_fraction: f64,
    status: TradeStatus,
    /// Take-profit rungs whose sell has been filled.
    triggered_rungs: BTreeSet<u32>,
    /// Target sold fraction of the sell currently in flight.
    pending_target: Option<f64>,
    sell_count: u32,
    acquired_at: DateTime<Utc>,
    last_update_time: DateTime<Utc>,
}

impl TrackingRecord {
    fn new(
        mint: &str,
        symbol: &str,
        acquired_quantity: f64,
        entry_price: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            mint: mint.to_string(),
            symbol: symbol.to_string(),
            entry_price,
            current_price: entry_price,
            highest_price: entry_price,
            acquired_quantity,
            remaining_quantity: acquired_quantity,
            sold_fraction: 0.0,
            status: TradeStatus::Bought,
            triggered_rungs: BTreeSet::new(),
            pending_target: None,
            sell_count: 0,
            acquired_at: now,
            last_update_time: now,
        }
    }

    pub fn mint(&self) -> &str {
        &self.mint
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn highest_price(&self) -> f64 {
        self.highest_price
    }

    pub fn acquired_quantity(&self) -> f64 {
        self.acquired_quantity
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.remaining_quantity
    }

    pub fn sold_fraction(&self) -> f64 {
        self.sold_fraction
    }

    pub fn status(&self) -> TradeStatus {
        self.status
    }

    pub fn triggered_rungs(&self) -> &BTreeSet<u32> {
        &self.triggered_rungs
    }

    pub fn pending_target(&self) -> Option<f64> {
        self.pending_target
    }

    pub fn sell_count(&self) -> u32 {
        self.sell_count
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.last_update_time
    }

    /// Relative change of the current price against the entry price.
    pub fn price_change(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.current_price - self.entry_price) / self.entry_price
    }

    /// Record an already-rounded price. Returns `true` on a new high.
    pub fn apply_price(&mut self, price: f64, now: DateTime<Utc>) -> bool {
        self.current_price = price;
        self.last_update_time = now;
        if price > self.highest_price {
            self.highest_price = price;
            return true;
        }
        false
    }

    /// Mark a sell towards `target` as in flight. Fails if another sell is
    /// already pending or the record is terminal.
    pub fn begin_sell(&mut self, target: f64) -> bool {
        if self.status != TradeStatus::Bought {
            return false;
        }
        self.status = TradeStatus::Selling;
        self.pending_target = Some(target);
        true
    }

    /// Return to `Bought` after a sell that did not go through.
    pub fn abort_sell(&mut self) {
        if self.status == TradeStatus::Selling {
            self.status = TradeStatus::Bought;
        }
        self.pending_target = None;
    }

    /// Apply a filled sell. `rung` marks the ladder rung (and every rung
    /// below it) as consumed. Returns `true` when the record became `Sold`.
    pub fn commit_sell(&mut self, target: f64, rung: Option<u32>, quantity_dp: u32) -> bool {
        let target = target.clamp(0.0, 1.0);
        if target > self.sold_fraction {
            self.sold_fraction = target;
        }
        if let Some(rung) = rung {
            self.triggered_rungs.extend(1..=rung);
        }
        self.sell_count += 1;
        self.pending_target = None;

        if self.sold_fraction >= 1.0 - FRACTION_EPSILON {
            self.sold_fraction = 1.0;
            self.remaining_quantity = 0.0;
        } else {
            self.remaining_quantity =
                round_quantity(self.acquired_quantity * (1.0 - self.sold_fraction), quantity_dp);
        }

        if self.remaining_quantity <= 0.0 {
            self.remaining_quantity = 0.0;
            self.status = TradeStatus::Sold;
            true
        } else {
            self.status = TradeStatus::Bought;
            false
        }
    }
}

/// Shared handle to a record. Lock it only for short, synchronous sections.
pub type RecordHandle = Arc<Mutex<TrackingRecord>>;

// ---------------------------------------------------------------------------
// Position Registry
// ---------------------------------------------------------------------------

/// Owner of every tracking record.
pub struct PositionRegistry {
    records: RwLock<HashMap<String, RecordHandle>>,
    closed: RwLock<VecDeque<TrackingRecord>>,
    max_open: usize,
    accepting: AtomicBool,
    subscriptions: Arc<dyn Subscriptions>,
    released: mpsc::UnboundedSender<String>,
}

impl PositionRegistry {
    /// Create an empty registry. The receiver yields each mint exactly once,
    /// when its record is closed.
    pub fn new(
        max_open: usize,
        subscriptions: Arc<dyn Subscriptions>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (released, release_rx) = mpsc::unbounded_channel();
        let registry = Self {
            records: RwLock::new(HashMap::new()),
            closed: RwLock::new(VecDeque::new()),
            max_open,
            accepting: AtomicBool::new(true),
            subscriptions,
            released,
        };
        (registry, release_rx)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start tracking `mint` after a confirmed entry trade.
    pub fn open(
        &self,
        mint: &str,
        symbol: &str,
        acquired_quantity: f64,
        entry_price: f64,
        price_dp: u32,
    ) -> Result<TrackingRecord, RegistryError> {
        if !self.is_accepting() {
            return Err(RegistryError::ShuttingDown);
        }
        if !(acquired_quantity.is_finite() && acquired_quantity > 0.0) {
            return Err(RegistryError::InvalidEntry {
                mint: mint.to_string(),
                reason: format!("acquired quantity {acquired_quantity}"),
            });
        }
        let rounded = round_price(entry_price, price_dp);
        if !(entry_price.is_finite() && rounded > 0.0) {
            return Err(RegistryError::InvalidEntry {
                mint: mint.to_string(),
                reason: format!("entry price {entry_price} at {price_dp} digits"),
            });
        }

        let entry_price = rounded;
        let record = TrackingRecord::new(mint, symbol, acquired_quantity, entry_price, Utc::now());

        {
            let mut records = self.records.write();
            if records.contains_key(mint) {
                return Err(RegistryError::AlreadyTracked(mint.to_string()));
            }
            if records.len() >= self.max_open {
                return Err(RegistryError::CapacityReached {
                    limit: self.max_open,
                });
            }
            records.insert(mint.to_string(), Arc::new(Mutex::new(record.clone())));
        }

        info!(
            mint,
            symbol,
            entry_price,
            acquired_quantity,
            "position opened"
        );
        Ok(record)
    }

    /// Shared handle to the record for `mint`.
    pub fn lookup(&self, mint: &str) -> Result<RecordHandle, RegistryError> {
        self.records
            .read()
            .get(mint)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(mint.to_string()))
    }

    /// Remove a sold record, unsubscribe its trades and notify the release
    /// channel. A failed unsubscribe is logged and the record is dropped
    /// regardless so the held-asset slot is never leaked.
    pub fn close(&self, mint: &str) -> Result<TrackingRecord, RegistryError> {
        let handle = self.lookup(mint)?;
        if handle.lock().status() != TradeStatus::Sold {
            return Err(RegistryError::NotSold(mint.to_string()));
        }

        // Only the caller that actually removes the entry continues, so the
        // release notification fires once.
        let removed = self
            .records
            .write()
            .remove(mint)
            .ok_or_else(|| RegistryError::NotFound(mint.to_string()))?;
        let record = removed.lock().clone();

        if let Err(e) = self.subscriptions.unsubscribe(&[mint.to_string()]) {
            warn!(mint, error = %e, "unsubscribe failed — abandoning trade stream");
        }

        {
            let mut closed = self.closed.write();
            closed.push_front(record.clone());
            closed.truncate(MAX_CLOSED_HISTORY);
        }

        if self.released.send(mint.to_string()).is_err() {
            debug!(mint, "release receiver dropped");
        }

        info!(
            mint,
            symbol = %record.symbol(),
            sells = record.sell_count(),
            "position closed"
        );
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Price updates
    // -------------------------------------------------------------------------

    /// Apply `tick` to its record, then run `decide` on the updated record
    /// while its lock is still held.
    ///
    /// Untracked mints and ticks arriving after shutdown yield `Ok(None)`
    /// without inspecting the price. Invalid prices are rejected before any
    /// field is touched.
    pub fn apply_tick<R>(
        &self,
        tick: &TradeTick,
        price_dp: u32,
        decide: impl FnOnce(&mut TrackingRecord, f64) -> R,
    ) -> Result<Option<R>, TickError> {
        if !self.is_accepting() {
            return Ok(None);
        }
        let Some(handle) = self.records.read().get(&tick.mint).cloned() else {
            return Ok(None);
        };
        let price = tick
            .price()
            .and_then(|raw| validate_price(&tick.mint, raw, price_dp))?;

        let mut record = handle.lock();
        if record.apply_price(price, Utc::now()) {
            debug!(mint = %tick.mint, price, "new high");
        }
        Ok(Some(decide(&mut record, price)))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Copy of the record for `mint`.
    pub fn snapshot(&self, mint: &str) -> Result<TrackingRecord, RegistryError> {
        let handle = self.lookup(mint)?;
        let record = handle.lock().clone();
        Ok(record)
    }

    /// Copies of every open record.
    pub fn snapshots(&self) -> Vec<TrackingRecord> {
        let handles: Vec<RecordHandle> = self.records.read().values().cloned().collect();
        handles.iter().map(|h| h.lock().clone()).collect()
    }

    /// The most recent `count` closed records (newest first).
    pub fn closed(&self, count: usize) -> Vec<TrackingRecord> {
        self.closed.read().iter().take(count).cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }

    pub fn is_tracked(&self, mint: &str) -> bool {
        self.records.read().contains_key(mint)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting opens. Existing records stay readable.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for PositionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionRegistry")
            .field("open_positions", &self.open_count())
            .field("closed_positions", &self.closed.read().len())
            .field("max_open", &self.max_open)
            .finish()
    }
}

/// Round a raw price and reject it unless the result is finite and positive.
/// Prices below the configured precision round to zero and are rejected.
pub fn validate_price(mint: &str, raw_price: f64, price_dp: u32) -> Result<f64, TickError> {
    let price = if raw_price.is_finite() {
        round_price(raw_price, price_dp)
    } else {
        raw_price
    };
    if !price.is_finite() || price <= 0.0 {
        return Err(TickError::InvalidPrice {
            mint: mint.to_string(),
            price: raw_price,
        });
    }
    Ok(price)
}

// =============================================================================
// Tests
// =============================================================================
