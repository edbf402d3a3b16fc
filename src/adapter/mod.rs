// =============================================================================
// Execution adapters — where buy / sell requests actually go
// =============================================================================
//
//   PaperAdapter      Demo mode, simulated fills, nothing leaves the process.
//   PumpPortalAdapter Live mode, PumpPortal trade API.
//
// Adapters may be slow and may fail; every failure is treated as transient by
// the caller.
// =============================================================================

pub mod paper;
pub mod pumpportal;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AdapterError;
use crate::runtime_config::RuntimeConfig;
use crate::types::{AccountMode, PoolType};

pub use paper::PaperAdapter;
pub use pumpportal::PumpPortalAdapter;

/// How much of a holding to sell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SellAmount {
    Tokens(f64),
    /// Percentage of the wallet balance; `Percent(100.0)` liquidates without
    /// leaving dust from quantity rounding.
    Percent(f64),
}

impl SellAmount {
    pub fn is_full_exit(&self) -> bool {
        matches!(self, Self::Percent(p) if *p >= 100.0)
    }

    /// Amount as the trade API expects it.
    pub fn as_param(&self) -> serde_json::Value {
        match self {
            Self::Tokens(q) => serde_json::json!(q),
            Self::Percent(p) => serde_json::Value::String(format!("{p}%")),
        }
    }
}

impl std::fmt::Display for SellAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tokens(q) => write!(f, "{q} tokens"),
            Self::Percent(p) => write!(f, "{p}%"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuyOrder {
    pub mint: String,
    pub sol_amount: f64,
    pub slippage_pct: u32,
    pub priority_fee_sol: f64,
    pub pool: PoolType,
    /// Price used to estimate the filled quantity.
    pub quote_price: f64,
}

#[derive(Debug, Clone)]
pub struct SellOrder {
    pub mint: String,
    pub amount: SellAmount,
    pub slippage_pct: u32,
    pub priority_fee_sol: f64,
    pub pool: PoolType,
    /// Last tracked price when the sell was decided.
    pub reference_price: f64,
}

/// Result of a successful trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub signature: String,
    pub token_quantity: f64,
    pub price: f64,
}

#[async_trait]
pub trait TradeAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn buy(&self, order: &BuyOrder) -> Result<Fill, AdapterError>;

    async fn sell(&self, order: &SellOrder) -> Result<Fill, AdapterError>;
}

/// Pick the adapter for the configured account mode.
pub fn build_adapter(config: &RuntimeConfig) -> anyhow::Result<Arc<dyn TradeAdapter>> {
    match config.account_mode {
        AccountMode::Demo => Ok(Arc::new(PaperAdapter::new())),
        AccountMode::Live => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Live mode requires PUMPPORTAL_API_KEY"))?;
            Ok(Arc::new(PumpPortalAdapter::new(&config.trade_api_url, api_key)?))
        }
    }
}
