// =============================================================================
// Exit Engine — tick processing for every held asset
// =============================================================================
//
// Per tick:
//   parse -> lookup (map lock, released) -> record lock {
//       validate + round price, update current/high,
//       evaluate ladder, mark Selling if a sell is due
//   } -> adapter call outside any lock -> re-lock, commit and re-evaluate
//
// `ingest` is the synchronous decide-under-lock half and keeps per-asset
// arrival order when called from a single ingestion loop. `execute` is the
// network-bound half and may be spawned.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adapter::TradeAdapter;
use crate::error::RegistryError;
use crate::execution::{ExitExecutor, PendingSell, SellOutcome, SellParams};
use crate::exit::ExitPolicy;
use crate::market_data::{parse_event, FeedEvent, Subscriptions, TradeTick};
use crate::position_engine::{PositionRegistry, TrackingRecord};
use crate::runtime_config::RuntimeConfig;
use crate::types::{ExitReason, TradeStatus};

pub struct ExitEngine {
    registry: Arc<PositionRegistry>,
    policy: ExitPolicy,
    executor: ExitExecutor,
    price_dp: u32,
}

impl ExitEngine {
    /// Build the engine. The receiver yields one mint per fully exited asset.
    pub fn new(
        config: &RuntimeConfig,
        adapter: Arc<dyn TradeAdapter>,
        subscriptions: Arc<dyn Subscriptions>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (registry, released) = PositionRegistry::new(config.max_held_assets, subscriptions);
        let registry = Arc::new(registry);
        let policy = ExitPolicy::from_params(&config.exit);
        let executor = ExitExecutor::new(
            adapter,
            Arc::clone(&registry),
            policy.clone(),
            SellParams::from_config(config),
        );
        let engine = Self {
            registry,
            policy,
            executor,
            price_dp: config.exit.price_precision,
        };
        (engine, released)
    }

    pub fn registry(&self) -> &Arc<PositionRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &ExitPolicy {
        &self.policy
    }

    pub fn adapter(&self) -> &Arc<dyn TradeAdapter> {
        self.executor.adapter()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start tracking an asset after a confirmed entry trade.
    pub fn open(
        &self,
        mint: &str,
        symbol: &str,
        acquired_quantity: f64,
        entry_price: f64,
    ) -> Result<TrackingRecord, RegistryError> {
        self.registry
            .open(mint, symbol, acquired_quantity, entry_price, self.price_dp)
    }

    pub fn get_snapshot(&self, mint: &str) -> Result<TrackingRecord, RegistryError> {
        self.registry.snapshot(mint)
    }

    /// Stop accepting ticks and opens. In-flight sells still complete.
    pub fn shutdown(&self) {
        info!(open = self.registry.open_count(), "exit engine shutting down");
        self.registry.shutdown();
    }

    // -------------------------------------------------------------------------
    // Tick path
    // -------------------------------------------------------------------------

    /// Apply a trade to its record and decide, under the record lock, whether
    /// a sell is due. A returned sell has already moved the record to
    /// `Selling` and must be passed to [`ExitEngine::execute`].
    pub fn ingest(&self, tick: &TradeTick) -> Option<PendingSell> {
        // Overlap with subscription timing is expected; untracked is silent.
        let decided = self
            .registry
            .apply_tick(tick, self.price_dp, |record, price| self.decide(record, price));

        match decided {
            Ok(pending) => pending.flatten(),
            Err(e) => {
                warn!(mint = %tick.mint, error = %e, "discarding invalid tick");
                None
            }
        }
    }

    fn decide(&self, record: &mut TrackingRecord, price: f64) -> Option<PendingSell> {
        let signal = self.policy.evaluate(record)?;
        if !record.begin_sell(signal.target_fraction) {
            return None;
        }

        info!(
            mint = %record.mint(),
            reason = %signal.reason,
            price,
            entry = record.entry_price(),
            change = format!("{:.4}", record.price_change()),
            target = signal.target_fraction,
            quantity = signal.quantity,
            "EXIT TRIGGERED"
        );

        Some(PendingSell {
            mint: record.mint().to_string(),
            signal,
            reference_price: price,
        })
    }

    /// Parse a raw feed message and run it through [`ExitEngine::ingest`].
    pub fn ingest_raw(&self, raw: &str) -> Option<PendingSell> {
        match parse_event(raw) {
            Ok(FeedEvent::Trade(tick)) => self.ingest(&tick),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "discarding malformed tick");
                None
            }
        }
    }

    /// Full tick path: apply, evaluate and, if due, sell. Never fails; all
    /// per-tick problems are logged.
    pub async fn process_tick(&self, raw: &str) -> Option<SellOutcome> {
        let pending = self.ingest_raw(raw)?;
        Some(self.execute(pending).await)
    }

    pub async fn execute(&self, pending: PendingSell) -> SellOutcome {
        self.executor.execute(pending).await
    }

    // -------------------------------------------------------------------------
    // Liveness
    // -------------------------------------------------------------------------

    /// Held assets with no trade since `now - timeout`.
    pub fn stale_assets(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<String> {
        self.registry
            .snapshots()
            .into_iter()
            .filter(|r| r.status() == TradeStatus::Bought)
            .filter(|r| now.signed_duration_since(r.last_update_time()) > timeout)
            .map(|r| r.mint().to_string())
            .collect()
    }

    /// Decide a full liquidation of `mint` outside the ladder.
    pub fn force_exit(&self, mint: &str, reason: ExitReason) -> Option<PendingSell> {
        let handle = self.registry.lookup(mint).ok()?;
        let mut record = handle.lock();
        let signal = self.policy.full_exit(&record, reason)?;
        if !record.begin_sell(signal.target_fraction) {
            return None;
        }
        warn!(
            mint,
            reason = %reason,
            remaining = record.remaining_quantity(),
            "forcing full liquidation"
        );
        Some(PendingSell {
            mint: mint.to_string(),
            signal,
            reference_price: record.current_price(),
        })
    }
}

impl std::fmt::Debug for ExitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitEngine")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("executor", &self.executor)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SellAmount;
    use crate::testing::{trade_message, MockAdapter, MockSubscriptions};

    struct Harness {
        engine: Arc<ExitEngine>,
        adapter: Arc<MockAdapter>,
        subs: Arc<MockSubscriptions>,
        released: mpsc::UnboundedReceiver<String>,
    }

    fn harness(max_held: usize) -> Harness {
        let mut config = RuntimeConfig::default();
        config.max_held_assets = max_held;
        let adapter = Arc::new(MockAdapter::default());
        let subs = Arc::new(MockSubscriptions::default());
        let (engine, released) = ExitEngine::new(&config, adapter.clone(), subs.clone());
        Harness {
            engine: Arc::new(engine),
            adapter,
            subs,
            released,
        }
    }

    /// Tick at `multiplier * entry` for an entry price of 1e-6 SOL.
    fn tick_at(mint: &str, multiplier: f64) -> String {
        trade_message(mint, 1_000_000.0, multiplier)
    }

    #[tokio::test]
    async fn full_ladder_sells_ten_times_and_closes() {
        let mut h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        for step in 1..=10 {
            let multiplier = 1.0 + step as f64 / 10.0;
            let outcome = h.engine.process_tick(&tick_at("M", multiplier)).await;
            assert!(matches!(outcome, Some(SellOutcome::Filled { .. })), "step {step}");
        }

        let sells = h.adapter.sells();
        assert_eq!(sells.len(), 10);
        for (i, sell) in sells.iter().take(9).enumerate() {
            assert_eq!(sell.amount, SellAmount::Tokens(100.0), "sell {i}");
        }
        assert_eq!(sells[9].amount, SellAmount::Percent(100.0));

        assert!(!h.engine.registry().is_tracked("M"));
        let closed = &h.engine.registry().closed(1)[0];
        assert_eq!(closed.sold_fraction(), 1.0);
        assert_eq!(closed.remaining_quantity(), 0.0);
        assert_eq!(closed.sell_count(), 10);

        assert_eq!(h.released.try_recv().unwrap(), "M");
        assert!(h.released.try_recv().is_err());
        assert_eq!(h.subs.unsubscribed(), vec!["M".to_string()]);
    }

    #[tokio::test]
    async fn oscillation_fires_first_rung_once() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        h.engine.process_tick(&tick_at("M", 1.10)).await;
        h.engine.process_tick(&tick_at("M", 1.05)).await;
        h.engine.process_tick(&tick_at("M", 1.10)).await;

        assert_eq!(h.adapter.sells().len(), 1);
        let rec = h.engine.get_snapshot("M").unwrap();
        assert_eq!(rec.sold_fraction(), 0.1);
        assert_eq!(rec.remaining_quantity(), 900.0);
    }

    #[tokio::test]
    async fn stop_loss_after_take_profit_sells_remaining() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        h.engine.process_tick(&tick_at("M", 1.3)).await;
        let outcome = h.engine.process_tick(&tick_at("M", 0.9)).await;

        assert!(matches!(outcome, Some(SellOutcome::Filled { closed: true, .. })));
        let sells = h.adapter.sells();
        assert_eq!(sells.len(), 2);
        assert_eq!(sells[1].amount, SellAmount::Percent(100.0));
        assert!(h.engine.get_snapshot("M").is_err());
    }

    #[tokio::test]
    async fn zero_quantity_tick_changes_nothing() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        let raw = trade_message("M", 0.0, 1.5);
        assert!(h.engine.process_tick(&raw).await.is_none());

        let rec = h.engine.get_snapshot("M").unwrap();
        assert_eq!(rec.current_price(), 1e-6);
        assert_eq!(rec.sold_fraction(), 0.0);
    }

    #[tokio::test]
    async fn malformed_and_untracked_ticks_are_ignored() {
        let h = harness(2);
        assert!(h.engine.process_tick("{not json").await.is_none());
        assert!(h.engine.process_tick(&tick_at("Nobody", 3.0)).await.is_none());
        assert!(h.adapter.sells().is_empty());
    }

    #[tokio::test]
    async fn failed_sell_is_retried_on_next_tick() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        h.adapter.fail_sells(true);
        let outcome = h.engine.process_tick(&tick_at("M", 1.2)).await;
        assert!(matches!(outcome, Some(SellOutcome::Failed(_))));
        assert_eq!(h.engine.get_snapshot("M").unwrap().sold_fraction(), 0.0);

        h.adapter.fail_sells(false);
        h.engine.process_tick(&tick_at("M", 1.2)).await;
        let rec = h.engine.get_snapshot("M").unwrap();
        assert_eq!(rec.sold_fraction(), 0.2);
        assert_eq!(rec.remaining_quantity(), 800.0);
    }

    #[tokio::test]
    async fn ticks_during_in_flight_sell_update_price_only() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        let pending = h.engine.ingest_raw(&tick_at("M", 1.1)).unwrap();
        assert!(h.engine.ingest_raw(&tick_at("M", 1.3)).is_none());

        let rec = h.engine.get_snapshot("M").unwrap();
        assert_eq!(rec.status(), TradeStatus::Selling);
        assert!((rec.highest_price() - 1.3e-6).abs() < 1e-15);

        // The commit re-evaluates and catches up to the rung actually reached.
        h.engine.execute(pending).await;
        assert_eq!(h.engine.get_snapshot("M").unwrap().sold_fraction(), 0.3);
        assert_eq!(h.adapter.sells().len(), 2);

        assert!(h.engine.process_tick(&tick_at("M", 1.3)).await.is_none());
    }

    #[tokio::test]
    async fn crash_during_take_profit_sell_is_stopped_out_on_commit() {
        let mut h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        let pending = h.engine.ingest_raw(&tick_at("M", 1.1)).unwrap();
        assert!(h.engine.ingest_raw(&tick_at("M", 0.5)).is_none());

        let outcome = h.engine.execute(pending).await;
        assert!(matches!(outcome, SellOutcome::Filled { closed: true, .. }));

        let sells = h.adapter.sells();
        assert_eq!(sells.len(), 2);
        assert_eq!(sells[0].amount, SellAmount::Tokens(100.0));
        assert_eq!(sells[1].amount, SellAmount::Percent(100.0));
        assert!(!h.engine.registry().is_tracked("M"));
        assert_eq!(h.engine.registry().closed(1)[0].sell_count(), 2);
        assert_eq!(h.released.try_recv().unwrap(), "M");
    }

    #[tokio::test]
    async fn failed_take_profit_escalates_to_stop_loss() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        h.adapter.fail_sells(true);
        let pending = h.engine.ingest_raw(&tick_at("M", 1.2)).unwrap();
        assert!(h.engine.ingest_raw(&tick_at("M", 0.6)).is_none());

        // Take-profit fails, stop-loss follow-up is tried once and also fails.
        let outcome = h.engine.execute(pending).await;
        assert!(matches!(outcome, SellOutcome::Failed(_)));
        assert_eq!(h.adapter.sell_attempts(), 2);
        assert_eq!(h.engine.get_snapshot("M").unwrap().status(), TradeStatus::Bought);

        h.adapter.fail_sells(false);
        let outcome = h.engine.process_tick(&tick_at("M", 0.6)).await;
        assert!(matches!(outcome, Some(SellOutcome::Filled { closed: true, .. })));
        assert_eq!(h.adapter.sells()[0].amount, SellAmount::Percent(100.0));
    }

    #[tokio::test]
    async fn invalid_prices_leave_record_untouched() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        for raw in [
            trade_message("M", 1_000_000.0, -1.0),
            trade_message("M", -5.0, 1.0),
            trade_message("M", 1e-300, 1e300),
            // 4e-18 SOL per token rounds to zero at 16 digits.
            trade_message("M", 1_000_000.0, 4e-12),
        ] {
            assert!(h.engine.process_tick(&raw).await.is_none(), "{raw}");
        }

        let rec = h.engine.get_snapshot("M").unwrap();
        assert_eq!(rec.current_price(), 1e-6);
        assert_eq!(rec.highest_price(), 1e-6);
        assert_eq!(h.adapter.sell_attempts(), 0);
    }

    #[test]
    fn entry_price_below_precision_is_rejected() {
        let h = harness(2);
        assert!(matches!(
            h.engine.open("M", "M", 1000.0, 4e-17),
            Err(RegistryError::InvalidEntry { .. })
        ));
        assert!(!h.engine.registry().is_tracked("M"));
    }

    #[tokio::test]
    async fn shutdown_stops_tick_processing() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();
        h.engine.shutdown();

        assert!(h.engine.process_tick(&tick_at("M", 2.0)).await.is_none());
        assert!(h.engine.open("N", "N", 10.0, 1.0).is_err());
        assert_eq!(h.engine.get_snapshot("M").unwrap().sold_fraction(), 0.0);
    }

    #[tokio::test]
    async fn stale_asset_is_force_liquidated() {
        let h = harness(2);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(31);
        let stale = h.engine.stale_assets(later, chrono::Duration::seconds(30));
        assert_eq!(stale, vec!["M".to_string()]);
        assert!(h.engine.stale_assets(Utc::now(), chrono::Duration::seconds(30)).is_empty());

        let pending = h.engine.force_exit("M", ExitReason::Stale).unwrap();
        assert!(h.engine.force_exit("M", ExitReason::Stale).is_none());
        let outcome = h.engine.execute(pending).await;
        assert!(matches!(outcome, SellOutcome::Filled { closed: true, .. }));
        assert_eq!(h.adapter.sells()[0].amount, SellAmount::Percent(100.0));
    }

    #[tokio::test]
    async fn reopen_after_close_starts_fresh() {
        let h = harness(1);
        h.engine.open("M", "M", 1000.0, 1e-6).unwrap();
        h.engine.process_tick(&tick_at("M", 0.5)).await;
        assert!(!h.engine.registry().is_tracked("M"));

        let rec = h.engine.open("M", "M", 500.0, 2e-6).unwrap();
        assert_eq!(rec.status(), TradeStatus::Bought);
        assert_eq!(rec.sold_fraction(), 0.0);
        assert!(rec.triggered_rungs().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_assets_do_not_interfere() {
        const ASSETS: usize = 8;
        let h = harness(ASSETS);
        for i in 0..ASSETS {
            h.engine.open(&format!("M{i}"), "S", 1000.0, 1e-6).unwrap();
        }

        let mut tasks = Vec::new();
        for i in 0..ASSETS {
            let engine = Arc::clone(&h.engine);
            tasks.push(tokio::spawn(async move {
                let mint = format!("M{i}");
                // Each asset climbs to its own peak rung, with noise.
                let peak = 1.0 + (i % 5 + 1) as f64 / 10.0;
                for round in 0..50 {
                    let m = if round % 3 == 0 { 1.0 } else { peak };
                    engine.process_tick(&tick_at(&mint, m)).await;
                    tokio::task::yield_now().await;
                }
                (mint, peak)
            }));
        }

        for task in tasks {
            let (mint, peak) = task.await.unwrap();
            let rec = h.engine.get_snapshot(&mint).unwrap();
            let expected = ((peak - 1.0) * 10.0).round() / 10.0;
            assert!((rec.sold_fraction() - expected).abs() < 1e-9, "{mint}");
            assert!((rec.remaining_quantity() - 1000.0 * (1.0 - expected)).abs() < 1e-6);
            assert_eq!(rec.status(), TradeStatus::Bought);
        }
    }
}
