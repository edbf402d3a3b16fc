// =============================================================================
// PumpPortal trade API client — Live mode
// =============================================================================
//
// SECURITY: the API key is sent as a query parameter on every request and is
// never logged or serialised.
// =============================================================================

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{BuyOrder, Fill, SellAmount, SellOrder, TradeAdapter};
use crate::error::AdapterError;
use crate::types::{PoolType, TradeAction};

/// Request timeout for the trade endpoint.
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct TradeResponse {
    signature: Option<String>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct PumpPortalAdapter {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl PumpPortalAdapter {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build reqwest client")?;

        let endpoint = endpoint.into();
        debug!(endpoint = %endpoint, "PumpPortalAdapter initialised");

        Ok(Self {
            api_key: api_key.into(),
            endpoint,
            client,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn payload(
        action: TradeAction,
        mint: &str,
        amount: serde_json::Value,
        denominated_in_sol: bool,
        slippage_pct: u32,
        priority_fee_sol: f64,
        pool: PoolType,
    ) -> serde_json::Value {
        json!({
            "action": action.as_str(),
            "mint": mint,
            "amount": amount,
            "denominatedInSol": if denominated_in_sol { "true" } else { "false" },
            "slippage": slippage_pct,
            "priorityFee": priority_fee_sol,
            "pool": pool.as_str(),
        })
    }

    async fn submit(&self, body: serde_json::Value) -> Result<String, AdapterError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("api-key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let parsed: TradeResponse = resp.json().await?;

        if let Some(errors) = parsed.errors.filter(|e| !is_empty_errors(e)) {
            warn!(status = %status, errors = %errors, "trade API returned errors");
            return Err(AdapterError::Rejected(errors.to_string()));
        }
        if !status.is_success() {
            return Err(AdapterError::Unavailable(format!("trade API returned {status}")));
        }
        parsed
            .signature
            .ok_or_else(|| AdapterError::Rejected("response carried no signature".into()))
    }
}

fn is_empty_errors(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl TradeAdapter for PumpPortalAdapter {
    fn name(&self) -> &'static str {
        "pumpportal"
    }

    #[instrument(skip(self, order), fields(mint = %order.mint), name = "pumpportal::buy")]
    async fn buy(&self, order: &BuyOrder) -> Result<Fill, AdapterError> {
        let body = Self::payload(
            TradeAction::Buy,
            &order.mint,
            json!(order.sol_amount),
            true,
            order.slippage_pct,
            order.priority_fee_sol,
            order.pool,
        );
        let signature = self.submit(body).await?;

        // The API only returns a signature; size the position from the quote.
        let token_quantity = if order.quote_price > 0.0 {
            order.sol_amount / order.quote_price
        } else {
            0.0
        };
        Ok(Fill {
            signature,
            token_quantity,
            price: order.quote_price,
        })
    }

    #[instrument(skip(self, order), fields(mint = %order.mint), name = "pumpportal::sell")]
    async fn sell(&self, order: &SellOrder) -> Result<Fill, AdapterError> {
        let body = Self::payload(
            TradeAction::Sell,
            &order.mint,
            order.amount.as_param(),
            false,
            order.slippage_pct,
            order.priority_fee_sol,
            order.pool,
        );
        let signature = self.submit(body).await?;

        let token_quantity = match order.amount {
            SellAmount::Tokens(q) => q,
            SellAmount::Percent(_) => 0.0,
        };
        Ok(Fill {
            signature,
            token_quantity,
            price: order.reference_price,
        })
    }
}

impl std::fmt::Debug for PumpPortalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpPortalAdapter")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_payload_uses_token_denomination() {
        let body = PumpPortalAdapter::payload(
            TradeAction::Sell,
            "Mint",
            SellAmount::Percent(100.0).as_param(),
            false,
            10,
            0.0005,
            PoolType::Pump,
        );
        assert_eq!(body["action"], "sell");
        assert_eq!(body["amount"], "100%");
        assert_eq!(body["denominatedInSol"], "false");
        assert_eq!(body["pool"], "pump");
    }

    #[test]
    fn empty_error_lists_are_not_failures() {
        assert!(is_empty_errors(&json!([])));
        assert!(is_empty_errors(&serde_json::Value::Null));
        assert!(!is_empty_errors(&json!(["slippage exceeded"])));
    }

    #[test]
    fn debug_output_redacts_key() {
        let adapter = PumpPortalAdapter::new("https://example.invalid/api/trade", "k3y").unwrap();
        let printed = format!("{adapter:?}");
        assert!(!printed.contains("k3y"));
    }
}
