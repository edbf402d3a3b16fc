// Test doubles shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::adapter::{BuyOrder, Fill, SellAmount, SellOrder, TradeAdapter};
use crate::error::{AdapterError, FeedError};
use crate::market_data::Subscriptions;

/// Records every order; sells and buys can be made to fail.
#[derive(Debug, Default)]
pub struct MockAdapter {
    buys: Mutex<Vec<BuyOrder>>,
    sells: Mutex<Vec<SellOrder>>,
    fail_buys: AtomicBool,
    fail_sells: AtomicBool,
    sell_attempts: AtomicUsize,
}

impl MockAdapter {
    pub fn buys(&self) -> Vec<BuyOrder> {
        self.buys.lock().clone()
    }

    pub fn sells(&self) -> Vec<SellOrder> {
        self.sells.lock().clone()
    }

    /// Every sell call, failed ones included.
    pub fn sell_attempts(&self) -> usize {
        self.sell_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_buys(&self, fail: bool) {
        self.fail_buys.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sells(&self, fail: bool) {
        self.fail_sells.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TradeAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn buy(&self, order: &BuyOrder) -> Result<Fill, AdapterError> {
        if self.fail_buys.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("mock buy failure".into()));
        }
        self.buys.lock().push(order.clone());
        Ok(Fill {
            signature: format!("buy-{}", order.mint),
            token_quantity: order.sol_amount / order.quote_price,
            price: order.quote_price,
        })
    }

    async fn sell(&self, order: &SellOrder) -> Result<Fill, AdapterError> {
        self.sell_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sells.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("mock sell failure".into()));
        }
        self.sells.lock().push(order.clone());
        let quantity = match order.amount {
            SellAmount::Tokens(q) => q,
            SellAmount::Percent(_) => 0.0,
        };
        Ok(Fill {
            signature: format!("sell-{}", order.mint),
            token_quantity: quantity,
            price: order.reference_price,
        })
    }
}

#[derive(Debug, Default)]
pub struct MockSubscriptions {
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    fail_unsubscribe: AtomicBool,
}

impl MockSubscriptions {
    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().clone()
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }
}

impl Subscriptions for MockSubscriptions {
    fn subscribe(&self, mints: &[String]) -> Result<(), FeedError> {
        self.subscribed.lock().extend(mints.iter().cloned());
        Ok(())
    }

    fn unsubscribe(&self, mints: &[String]) -> Result<(), FeedError> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(FeedError::Closed);
        }
        self.unsubscribed.lock().extend(mints.iter().cloned());
        Ok(())
    }
}

/// A PumpPortal trade frame for `mint`; its price is `sol_amount / token_amount`.
pub fn trade_message(mint: &str, token_amount: f64, sol_amount: f64) -> String {
    serde_json::json!({
        "signature": "sig",
        "mint": mint,
        "traderPublicKey": "trader",
        "txType": "buy",
        "tokenAmount": token_amount,
        "solAmount": sol_amount,
        "pool": "pump",
    })
    .to_string()
}
