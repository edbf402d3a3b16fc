// =============================================================================
// Shared types used across the sniper engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether we are trading real funds through PumpPortal or simulating fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Liquidity venue a PumpPortal trade is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolType {
    Auto,
    Pump,
    Raydium,
    PumpAmm,
    Launchlab,
    RaydiumCpmm,
    Bonk,
}

impl Default for PoolType {
    fn default() -> Self {
        Self::Pump
    }
}

impl PoolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pump => "pump",
            Self::Raydium => "raydium",
            Self::PumpAmm => "pump-amm",
            Self::Launchlab => "launchlab",
            Self::RaydiumCpmm => "raydium-cpmm",
            Self::Bonk => "bonk",
        }
    }
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a trade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a tracked asset.
///
/// `Bought -> Selling -> Bought` repeats once per partial exit;
/// `Selling -> Sold` happens exactly once, when nothing remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Bought,
    /// A sell is in flight with the execution adapter.
    Selling,
    Sold,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bought => write!(f, "Bought"),
            Self::Selling => write!(f, "Selling"),
            Self::Sold => write!(f, "Sold"),
        }
    }
}

/// Why an exit sell was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    /// Take-profit rung, in ladder steps (1 = first rung).
    TakeProfit(u32),
    /// No trade data for the asset within the liveness window.
    Stale,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "StopLoss"),
            Self::TakeProfit(rung) => write!(f, "TakeProfit_{rung}"),
            Self::Stale => write!(f, "Stale"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_type_serialises_kebab_case() {
        let json = serde_json::to_string(&PoolType::PumpAmm).unwrap();
        assert_eq!(json, "\"pump-amm\"");
        let pool: PoolType = serde_json::from_str("\"raydium-cpmm\"").unwrap();
        assert_eq!(pool, PoolType::RaydiumCpmm);
        assert_eq!(pool.as_str(), "raydium-cpmm");
    }

    #[test]
    fn exit_reason_display_includes_rung() {
        assert_eq!(ExitReason::TakeProfit(3).to_string(), "TakeProfit_3");
        assert_eq!(ExitReason::StopLoss.to_string(), "StopLoss");
    }
}
