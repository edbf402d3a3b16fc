// =============================================================================
// PumpPortal feed events
// =============================================================================
//
// The data socket multiplexes three kinds of text frames:
//   - token creation   { "txType": "create", "mint", "name", "symbol", "uri", ... }
//   - trades           { "txType": "buy" | "sell", "mint", "tokenAmount", "solAmount", ... }
//   - notices          { "message": "Successfully subscribed ..." } and similar
// =============================================================================

use serde::Deserialize;

use crate::error::TickError;

/// One trade on a subscribed mint. Price is `sol_amount / token_amount`.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeTick {
    pub mint: String,
    #[serde(rename = "txType", default)]
    pub tx_type: String,
    #[serde(rename = "tokenAmount", default)]
    pub token_amount: f64,
    #[serde(rename = "solAmount", default)]
    pub sol_amount: f64,
    #[serde(default)]
    pub signature: String,
}

impl TradeTick {
    /// Price in SOL per token. Zero or non-finite token amounts are rejected.
    pub fn price(&self) -> Result<f64, TickError> {
        if !self.token_amount.is_finite() || self.token_amount <= 0.0 {
            return Err(TickError::ZeroQuantity {
                mint: self.mint.clone(),
            });
        }
        let price = self.sol_amount / self.token_amount;
        if !price.is_finite() || price <= 0.0 {
            return Err(TickError::InvalidPrice {
                mint: self.mint.clone(),
                price,
            });
        }
        Ok(price)
    }
}

/// A freshly created token.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTokenEvent {
    pub mint: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub uri: String,
    #[serde(rename = "traderPublicKey", default)]
    pub creator: String,
    #[serde(rename = "initialBuy", default)]
    pub initial_buy: f64,
    #[serde(rename = "solAmount", default)]
    pub sol_amount: f64,
    #[serde(rename = "vTokensInBondingCurve", default)]
    pub v_tokens_in_bonding_curve: f64,
    #[serde(rename = "vSolInBondingCurve", default)]
    pub v_sol_in_bonding_curve: f64,
    #[serde(rename = "marketCapSol", default)]
    pub market_cap_sol: f64,
    #[serde(default)]
    pub pool: String,
}

impl NewTokenEvent {
    /// Spot price implied by the bonding curve reserves, if usable.
    pub fn quote_price(&self) -> Option<f64> {
        if self.v_tokens_in_bonding_curve > 0.0 {
            let price = self.v_sol_in_bonding_curve / self.v_tokens_in_bonding_curve;
            if price.is_finite() && price > 0.0 {
                return Some(price);
            }
        }
        if self.initial_buy > 0.0 {
            let price = self.sol_amount / self.initial_buy;
            if price.is_finite() && price > 0.0 {
                return Some(price);
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    NewToken(NewTokenEvent),
    Trade(TradeTick),
    Notice(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "txType")]
    tx_type: Option<String>,
    message: Option<String>,
    errors: Option<serde_json::Value>,
}

/// Classify a raw text frame.
pub fn parse_event(text: &str) -> Result<FeedEvent, TickError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.tx_type.as_deref() {
        Some("create") => Ok(FeedEvent::NewToken(serde_json::from_str(text)?)),
        Some("buy") | Some("sell") => Ok(FeedEvent::Trade(serde_json::from_str(text)?)),
        _ => {
            let notice = envelope
                .message
                .or_else(|| envelope.errors.map(|e| e.to_string()))
                .unwrap_or_else(|| text.to_string());
            Ok(FeedEvent::Notice(notice))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_and_price() {
        let text = r#"{"signature":"sig","mint":"MintA","traderPublicKey":"t","txType":"buy",
            "tokenAmount":1000000.0,"solAmount":0.05,"newTokenBalance":1.0,"pool":"pump"}"#;
        let FeedEvent::Trade(tick) = parse_event(text).unwrap() else {
            panic!("expected trade");
        };
        assert_eq!(tick.mint, "MintA");
        assert!((tick.price().unwrap() - 5e-8).abs() < 1e-20);
    }

    #[test]
    fn parses_create_event() {
        let text = r#"{"signature":"s","mint":"MintB","traderPublicKey":"dev","txType":"create",
            "initialBuy":50000000.0,"solAmount":1.5,"vTokensInBondingCurve":1000000000.0,
            "vSolInBondingCurve":30.0,"marketCapSol":30.0,"name":"Bee","symbol":"BEE",
            "uri":"https://ipfs.io/ipfs/x","pool":"pump"}"#;
        let FeedEvent::NewToken(ev) = parse_event(text).unwrap() else {
            panic!("expected new token");
        };
        assert_eq!(ev.symbol, "BEE");
        assert!((ev.quote_price().unwrap() - 3e-8).abs() < 1e-20);
    }

    #[test]
    fn notice_frames_are_not_errors() {
        let event = parse_event(r#"{"message":"Successfully subscribed to token creation events."}"#)
            .unwrap();
        assert!(matches!(event, FeedEvent::Notice(m) if m.starts_with("Successfully")));
    }

    #[test]
    fn zero_token_amount_is_rejected() {
        let tick = TradeTick {
            mint: "M".into(),
            tx_type: "sell".into(),
            token_amount: 0.0,
            sol_amount: 1.0,
            signature: String::new(),
        };
        assert!(matches!(tick.price(), Err(TickError::ZeroQuantity { .. })));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(parse_event("not json"), Err(TickError::Malformed(_))));
    }
}
