// =============================================================================
// Exit Executor — sends decided sells to the adapter and commits the result
// =============================================================================
//
// Called with a `PendingSell` produced under the record lock. The record is
// already in `Selling`; this module:
//   1. calls the adapter with no lock held,
//   2. re-acquires the record lock to commit (fill) or roll back (failure),
//   3. closes the record through the registry once nothing remains,
//      otherwise re-evaluates the record under that same lock against the
//      price that arrived while the order was in flight.
//
// A re-evaluation that fires is sent straight away as a follow-up sell. After
// an adapter failure the follow-up is only sent when the decision changed
// (for example a take-profit that failed while the price crashed through the
// stop-loss); a repeat of the failed decision waits for the next tick.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::adapter::{Fill, SellAmount, SellOrder, TradeAdapter};
use crate::exit::{ExitPolicy, ExitSignal};
use crate::position_engine::{PositionRegistry, TrackingRecord};
use crate::runtime_config::RuntimeConfig;
use crate::types::{ExitReason, PoolType};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A sell that was decided under the record lock and still has to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSell {
    pub mint: String,
    pub signal: ExitSignal,
    /// Current price when the decision was taken.
    pub reference_price: f64,
}

/// Outcome of an execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SellOutcome {
    /// Nothing to sell after rounding; the record was left as it was.
    Skipped,
    /// Adapter filled the order and the record was updated.
    Filled {
        fill: Fill,
        sold_fraction: f64,
        closed: bool,
    },
    /// Adapter failed; the record is eligible again on the next tick.
    Failed(String),
    /// The record disappeared while the order was in flight.
    Vanished,
}

impl std::fmt::Display for SellOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "Skipped"),
            Self::Filled {
                sold_fraction,
                closed,
                ..
            } => write!(f, "Filled(sold={sold_fraction}, closed={closed})"),
            Self::Failed(err) => write!(f, "Failed({err})"),
            Self::Vanished => write!(f, "Vanished"),
        }
    }
}

/// Order constraints shared by every sell.
#[derive(Debug, Clone)]
pub struct SellParams {
    pub slippage_pct: u32,
    pub priority_fee_sol: f64,
    pub pool: PoolType,
    pub quantity_dp: u32,
}

impl SellParams {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            slippage_pct: config.slippage_pct,
            priority_fee_sol: config.priority_fee_sol,
            pool: config.pool,
            quantity_dp: config.exit.quantity_precision,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct ExitExecutor {
    adapter: Arc<dyn TradeAdapter>,
    registry: Arc<PositionRegistry>,
    policy: ExitPolicy,
    params: SellParams,
}

impl ExitExecutor {
    pub fn new(
        adapter: Arc<dyn TradeAdapter>,
        registry: Arc<PositionRegistry>,
        policy: ExitPolicy,
        params: SellParams,
    ) -> Self {
        Self {
            adapter,
            registry,
            policy,
            params,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn TradeAdapter> {
        &self.adapter
    }

    /// Send `pending` to the adapter and apply the result to its record,
    /// followed by any sell the updated record still calls for. Returns the
    /// outcome of the last sell sent.
    pub async fn execute(&self, pending: PendingSell) -> SellOutcome {
        let mut pending = pending;
        loop {
            let (outcome, follow_up) = self.execute_once(pending).await;
            let Some(next) = follow_up else {
                return outcome;
            };
            info!(
                mint = %next.mint,
                previous = %outcome,
                reason = %next.signal.reason,
                target = next.signal.target_fraction,
                price = next.reference_price,
                "follow-up exit triggered after in-flight sell"
            );
            pending = next;
        }
    }

    async fn execute_once(&self, pending: PendingSell) -> (SellOutcome, Option<PendingSell>) {
        let PendingSell {
            mint,
            signal,
            reference_price,
        } = pending;

        if signal.quantity <= 0.0 {
            debug!(
                mint = %mint,
                reason = %signal.reason,
                target = signal.target_fraction,
                "computed sell quantity is zero — skipping"
            );
            let follow_up = self.roll_back(&mint, &signal);
            return (SellOutcome::Skipped, follow_up);
        }

        let amount = if signal.is_full_exit() {
            SellAmount::Percent(100.0)
        } else {
            SellAmount::Tokens(signal.quantity)
        };
        let order = SellOrder {
            mint: mint.clone(),
            amount,
            slippage_pct: self.params.slippage_pct,
            priority_fee_sol: self.params.priority_fee_sol,
            pool: self.params.pool,
            reference_price,
        };

        info!(
            mint = %mint,
            reason = %signal.reason,
            amount = %amount,
            target = signal.target_fraction,
            price = reference_price,
            adapter = self.adapter.name(),
            "submitting exit sell"
        );

        // No lock is held across this call.
        let result = self.adapter.sell(&order).await;

        match result {
            Ok(fill) => self.commit(&mint, &signal, fill),
            Err(e) => {
                warn!(
                    mint = %mint,
                    reason = %signal.reason,
                    error = %e,
                    "exit sell failed — will re-evaluate on next tick"
                );
                let follow_up = self.roll_back(&mint, &signal);
                (SellOutcome::Failed(e.to_string()), follow_up)
            }
        }
    }

    fn commit(
        &self,
        mint: &str,
        signal: &ExitSignal,
        fill: Fill,
    ) -> (SellOutcome, Option<PendingSell>) {
        let Ok(handle) = self.registry.lookup(mint) else {
            error!(
                mint,
                signature = %fill.signature,
                "sell filled for an asset that is no longer tracked"
            );
            return (SellOutcome::Vanished, None);
        };

        let (sold_out, sold_fraction, remaining, follow_up) = {
            let mut record = handle.lock();
            let sold_out =
                record.commit_sell(signal.target_fraction, signal.rung(), self.params.quantity_dp);
            let follow_up = if sold_out {
                None
            } else {
                self.redecide(&mut record, None)
            };
            (
                sold_out,
                record.sold_fraction(),
                record.remaining_quantity(),
                follow_up,
            )
        };

        info!(
            mint,
            reason = %signal.reason,
            signature = %fill.signature,
            sold_fraction,
            remaining,
            "exit sell filled"
        );

        let mut closed = false;
        if sold_out {
            match self.registry.close(mint) {
                Ok(_) => closed = true,
                Err(e) => error!(mint, error = %e, "failed to close sold position"),
            }
            if signal.reason == ExitReason::StopLoss {
                info!(mint, "stop-loss exit complete");
            }
        }

        let outcome = SellOutcome::Filled {
            fill,
            sold_fraction,
            closed,
        };
        (outcome, follow_up)
    }

    fn roll_back(&self, mint: &str, failed: &ExitSignal) -> Option<PendingSell> {
        let Ok(handle) = self.registry.lookup(mint) else {
            debug!(mint, "record gone before roll-back");
            return None;
        };
        let mut record = handle.lock();
        record.abort_sell();
        self.redecide(&mut record, Some(failed))
    }

    /// Evaluate `record` again and, if a different sell is due, mark it
    /// `Selling`. Must be called with the record lock held.
    fn redecide(
        &self,
        record: &mut TrackingRecord,
        failed: Option<&ExitSignal>,
    ) -> Option<PendingSell> {
        let signal = self.policy.evaluate(record)?;
        if failed.is_some_and(|f| f.reason == signal.reason) {
            return None;
        }
        if !record.begin_sell(signal.target_fraction) {
            return None;
        }
        Some(PendingSell {
            mint: record.mint().to_string(),
            signal,
            reference_price: record.current_price(),
        })
    }
}

impl std::fmt::Debug for ExitExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitExecutor")
            .field("adapter", &self.adapter.name())
            .field("params", &self.params)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
