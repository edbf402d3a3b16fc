// =============================================================================
// Paper adapter — simulated fills for Demo mode
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{BuyOrder, Fill, SellAmount, SellOrder, TradeAdapter};
use crate::error::AdapterError;

/// Fills every order instantly at the quoted price and keeps a simulated
/// token balance per mint so percentage sells resolve to a quantity.
#[derive(Debug, Default)]
pub struct PaperAdapter {
    balances: Mutex<HashMap<String, f64>>,
}

impl PaperAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeAdapter for PaperAdapter {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn buy(&self, order: &BuyOrder) -> Result<Fill, AdapterError> {
        if !(order.quote_price.is_finite() && order.quote_price > 0.0) {
            return Err(AdapterError::Rejected(format!(
                "no usable quote for {}",
                order.mint
            )));
        }
        let quantity = order.sol_amount / order.quote_price;
        *self.balances.lock().entry(order.mint.clone()).or_insert(0.0) += quantity;

        let signature = format!("paper-{}", Uuid::new_v4());
        info!(
            mint = %order.mint,
            sol = order.sol_amount,
            quantity,
            price = order.quote_price,
            signature = %signature,
            "Demo buy filled"
        );
        Ok(Fill {
            signature,
            token_quantity: quantity,
            price: order.quote_price,
        })
    }

    async fn sell(&self, order: &SellOrder) -> Result<Fill, AdapterError> {
        let quantity = {
            let mut balances = self.balances.lock();
            let balance = balances.entry(order.mint.clone()).or_insert(0.0);
            let wanted = match order.amount {
                SellAmount::Tokens(q) => q,
                SellAmount::Percent(p) => *balance * (p / 100.0),
            };
            let filled = wanted.min(*balance).max(0.0);
            *balance -= filled;
            if order.amount.is_full_exit() || *balance <= 0.0 {
                balances.remove(&order.mint);
            }
            filled
        };

        let signature = format!("paper-{}", Uuid::new_v4());
        info!(
            mint = %order.mint,
            amount = %order.amount,
            quantity,
            price = order.reference_price,
            signature = %signature,
            "Demo sell filled"
        );
        Ok(Fill {
            signature,
            token_quantity: quantity,
            price: order.reference_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PoolType;

    fn balance(paper: &PaperAdapter, mint: &str) -> f64 {
        paper.balances.lock().get(mint).copied().unwrap_or(0.0)
    }

    fn buy_order(mint: &str, sol: f64, price: f64) -> BuyOrder {
        BuyOrder {
            mint: mint.into(),
            sol_amount: sol,
            slippage_pct: 10,
            priority_fee_sol: 0.0005,
            pool: PoolType::Pump,
            quote_price: price,
        }
    }

    fn sell_order(mint: &str, amount: SellAmount) -> SellOrder {
        SellOrder {
            mint: mint.into(),
            amount,
            slippage_pct: 10,
            priority_fee_sol: 0.0005,
            pool: PoolType::Pump,
            reference_price: 0.001,
        }
    }

    #[tokio::test]
    async fn buy_converts_sol_to_tokens_at_quote() {
        let paper = PaperAdapter::new();
        let fill = paper.buy(&buy_order("M", 1.0, 0.001)).await.unwrap();
        assert!((fill.token_quantity - 1000.0).abs() < 1e-9);
        assert!(fill.signature.starts_with("paper-"));
        assert!((balance(&paper, "M") - 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn percentage_sell_drains_balance() {
        let paper = PaperAdapter::new();
        paper.buy(&buy_order("M", 1.0, 0.001)).await.unwrap();
        let partial = paper.sell(&sell_order("M", SellAmount::Tokens(100.0))).await.unwrap();
        assert!((partial.token_quantity - 100.0).abs() < 1e-9);

        let rest = paper.sell(&sell_order("M", SellAmount::Percent(100.0))).await.unwrap();
        assert!((rest.token_quantity - 900.0).abs() < 1e-9);
        assert_eq!(balance(&paper, "M"), 0.0);
    }

    #[tokio::test]
    async fn buy_without_quote_is_rejected() {
        let paper = PaperAdapter::new();
        assert!(paper.buy(&buy_order("M", 1.0, 0.0)).await.is_err());
    }
}
