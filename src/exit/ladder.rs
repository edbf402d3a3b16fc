// =============================================================================
// Exit ladder — fixed stop-loss plus tiered take-profit
// =============================================================================
//
// Evaluated under the record lock on every tick, in this order:
//
//   1. Stop-loss   current < entry * (1 - stop_loss_pct)  -> sell everything
//   2. Take-profit highest rung r with increase >= r * step (within a
//                  relative epsilon) targets a cumulative sold fraction of
//                  r * step of the *acquired* quantity. Only the difference to
//                  what is already sold is sold now.
//
// A rung whose target is already covered by `sold_fraction` never fires
// again, which also covers price oscillating back through it.
// =============================================================================

use crate::numeric::round_quantity;
use crate::position_engine::{TrackingRecord, FRACTION_EPSILON};
use crate::runtime_config::ExitParams;
use crate::types::{ExitReason, TradeStatus};

/// A decided, not yet executed, exit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub reason: ExitReason,
    /// Cumulative sold fraction once this sell fills.
    pub target_fraction: f64,
    /// Tokens to sell now.
    pub quantity: f64,
}

impl ExitSignal {
    pub fn rung(&self) -> Option<u32> {
        match self.reason {
            ExitReason::TakeProfit(rung) => Some(rung),
            _ => None,
        }
    }

    pub fn is_full_exit(&self) -> bool {
        self.target_fraction >= 1.0 - FRACTION_EPSILON
    }
}

#[derive(Debug, Clone)]
pub struct ExitPolicy {
    stop_loss_pct: f64,
    rung_count: u32,
    epsilon: f64,
    quantity_dp: u32,
}

impl ExitPolicy {
    pub fn from_params(params: &ExitParams) -> Self {
        Self {
            stop_loss_pct: params.stop_loss_pct,
            rung_count: params.rung_count().max(1),
            epsilon: params.threshold_epsilon,
            quantity_dp: params.quantity_precision,
        }
    }

    pub fn rung_count(&self) -> u32 {
        self.rung_count
    }

    pub fn stop_loss_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 - self.stop_loss_pct)
    }

    /// Price increase (and cumulative sold fraction) of `rung`.
    pub fn rung_target(&self, rung: u32) -> f64 {
        rung.min(self.rung_count) as f64 / self.rung_count as f64
    }

    /// Highest rung reached by a relative price increase, if any.
    pub fn rung_for(&self, increase: f64) -> Option<u32> {
        if !increase.is_finite() {
            return None;
        }
        (1..=self.rung_count)
            .rev()
            .find(|&rung| increase >= self.rung_target(rung) * (1.0 - self.epsilon))
    }

    /// Decide whether `record` should sell now.
    pub fn evaluate(&self, record: &TrackingRecord) -> Option<ExitSignal> {
        if record.status() != TradeStatus::Bought || record.remaining_quantity() <= 0.0 {
            return None;
        }

        if record.current_price() < self.stop_loss_price(record.entry_price()) {
            return self.full_exit(record, ExitReason::StopLoss);
        }

        let rung = self.rung_for(record.price_change())?;
        if record.triggered_rungs().contains(&rung) {
            return None;
        }

        let target = self.rung_target(rung);
        let increment = target - record.sold_fraction();
        if increment <= FRACTION_EPSILON {
            return None;
        }

        if target >= 1.0 - FRACTION_EPSILON {
            return Some(ExitSignal {
                reason: ExitReason::TakeProfit(rung),
                target_fraction: 1.0,
                quantity: record.remaining_quantity(),
            });
        }

        let quantity = round_quantity(record.acquired_quantity() * increment, self.quantity_dp)
            .min(record.remaining_quantity());
        Some(ExitSignal {
            reason: ExitReason::TakeProfit(rung),
            target_fraction: target,
            quantity,
        })
    }

    /// Liquidate whatever remains, regardless of the ladder.
    pub fn full_exit(&self, record: &TrackingRecord, reason: ExitReason) -> Option<ExitSignal> {
        if record.remaining_quantity() <= 0.0 {
            return None;
        }
        Some(ExitSignal {
            reason,
            target_fraction: 1.0,
            quantity: record.remaining_quantity(),
        })
    }
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::from_params(&ExitParams::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
