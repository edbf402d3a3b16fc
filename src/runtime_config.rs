// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Every tunable lives here: entry sizing, admission caps, filter flags and the
// exit ladder. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file. Persistence uses an atomic
// tmp + rename pattern.
//
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AccountMode, PoolType};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_feed_url() -> String {
    "wss://pumpportal.fun/api/data".to_string()
}

fn default_trade_api_url() -> String {
    "https://pumpportal.fun/api/trade".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_buy_amount_sol() -> f64 {
    0.001
}

fn default_slippage_pct() -> u32 {
    10
}

fn default_priority_fee_sol() -> f64 {
    0.0005
}

fn default_max_held_assets() -> usize {
    2
}

fn default_max_concurrent_entries() -> usize {
    1
}

fn default_metadata_timeout_secs() -> u64 {
    10
}

fn default_stop_loss_pct() -> f64 {
    0.05
}

fn default_ladder_step() -> f64 {
    0.10
}

fn default_threshold_epsilon() -> f64 {
    1e-6
}

fn default_price_precision() -> u32 {
    16
}

fn default_quantity_precision() -> u32 {
    6
}

fn default_liveness_timeout_secs() -> u64 {
    30
}

fn default_liveness_check_secs() -> u64 {
    5
}

// =============================================================================
// ExitParams
// =============================================================================

/// Parameters of the stop-loss / take-profit ladder and the liveness policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitParams {
    /// Full liquidation when price falls below `entry * (1 - stop_loss_pct)`.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Price-increase step between rungs; each rung targets the same
    /// cumulative sold fraction. Must divide 1.0.
    #[serde(default = "default_ladder_step")]
    pub ladder_step: f64,

    /// Relative tolerance applied to each rung threshold.
    #[serde(default = "default_threshold_epsilon")]
    pub threshold_epsilon: f64,

    /// Fractional digits kept on prices.
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,

    /// Fractional digits kept on token quantities.
    #[serde(default = "default_quantity_precision")]
    pub quantity_precision: u32,

    /// Force a full exit when no trade is seen for this long.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,

    /// How often the liveness monitor scans held assets.
    #[serde(default = "default_liveness_check_secs")]
    pub liveness_check_secs: u64,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            ladder_step: default_ladder_step(),
            threshold_epsilon: default_threshold_epsilon(),
            price_precision: default_price_precision(),
            quantity_precision: default_quantity_precision(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            liveness_check_secs: default_liveness_check_secs(),
        }
    }
}

impl ExitParams {
    /// Number of rungs on the ladder (10 for the default 10 % step).
    pub fn rung_count(&self) -> u32 {
        (1.0 / self.ladder_step).round() as u32
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            bail!("stop_loss_pct must be in (0, 1), got {}", self.stop_loss_pct);
        }
        if !(self.ladder_step > 0.0 && self.ladder_step <= 1.0) {
            bail!("ladder_step must be in (0, 1], got {}", self.ladder_step);
        }
        let rungs = self.rung_count() as f64;
        if (rungs * self.ladder_step - 1.0).abs() > 1e-9 {
            bail!("ladder_step {} does not divide 1.0", self.ladder_step);
        }
        if !(self.threshold_epsilon >= 0.0 && self.threshold_epsilon < self.ladder_step) {
            bail!("threshold_epsilon {} out of range", self.threshold_epsilon);
        }
        if self.price_precision > 28 || self.quantity_precision > 28 {
            bail!("precision cannot exceed 28 fractional digits");
        }
        if self.liveness_timeout_secs == 0 || self.liveness_check_secs == 0 {
            bail!("liveness intervals must be non-zero");
        }
        Ok(())
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational ---------------------------------------------------------

    /// Demo (paper fills) or Live (PumpPortal trade API).
    #[serde(default)]
    pub account_mode: AccountMode,

    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    #[serde(default = "default_trade_api_url")]
    pub trade_api_url: String,

    /// PumpPortal API key. Read from the environment, never written to disk.
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Address of the read-only monitoring API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // --- Entry --------------------------------------------------------------

    /// SOL spent per entry.
    #[serde(default = "default_buy_amount_sol")]
    pub buy_amount_sol: f64,

    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: u32,

    #[serde(default = "default_priority_fee_sol")]
    pub priority_fee_sol: f64,

    #[serde(default)]
    pub pool: PoolType,

    /// Maximum number of assets held (or being bought) at once.
    #[serde(default = "default_max_held_assets")]
    pub max_held_assets: usize,

    /// Maximum number of new-token evaluations running at once.
    #[serde(default = "default_max_concurrent_entries")]
    pub max_concurrent_entries: usize,

    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,

    // --- Acceptance filters -------------------------------------------------

    #[serde(default = "default_true")]
    pub enable_twitter_filter: bool,

    #[serde(default = "default_true")]
    pub enable_website_filter: bool,

    // --- Exit ---------------------------------------------------------------

    #[serde(default)]
    pub exit: ExitParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Demo,
            feed_url: default_feed_url(),
            trade_api_url: default_trade_api_url(),
            api_key: None,
            bind_addr: default_bind_addr(),
            buy_amount_sol: default_buy_amount_sol(),
            slippage_pct: default_slippage_pct(),
            priority_fee_sol: default_priority_fee_sol(),
            pool: PoolType::default(),
            max_held_assets: default_max_held_assets(),
            max_concurrent_entries: default_max_concurrent_entries(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            enable_twitter_filter: true,
            enable_website_filter: true,
            exit: ExitParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            account_mode = %config.account_mode,
            max_held_assets = config.max_held_assets,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Reject configurations the engine cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if self.max_held_assets == 0 {
            bail!("max_held_assets must be at least 1");
        }
        if self.max_concurrent_entries == 0 {
            bail!("max_concurrent_entries must be at least 1");
        }
        if !(self.buy_amount_sol > 0.0 && self.buy_amount_sol.is_finite()) {
            bail!("buy_amount_sol must be positive, got {}", self.buy_amount_sol);
        }
        if self.account_mode == AccountMode::Live && self.api_key.is_none() {
            bail!("Live mode requires PUMPPORTAL_API_KEY");
        }
        self.exit.validate().context("invalid exit parameters")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.max_held_assets, 2);
        assert_eq!(cfg.pool, PoolType::Pump);
        assert!(cfg.enable_twitter_filter);
        assert!((cfg.exit.stop_loss_pct - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.exit.rung_count(), 10);
        assert_eq!(cfg.exit.liveness_timeout_secs, 30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.slippage_pct, 10);
        assert_eq!(cfg.exit.price_precision, 16);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "max_held_assets": 5, "exit": { "stop_loss_pct": 0.1 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_held_assets, 5);
        assert!((cfg.exit.stop_loss_pct - 0.1).abs() < f64::EPSILON);
        assert!((cfg.exit.ladder_step - 0.1).abs() < f64::EPSILON);
        assert!(cfg.enable_website_filter);
    }

    #[test]
    fn api_key_is_never_serialised() {
        let mut cfg = RuntimeConfig::default();
        cfg.api_key = Some("secret".into());
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn ladder_step_must_divide_one() {
        let mut params = ExitParams::default();
        params.ladder_step = 0.3;
        assert!(params.validate().is_err());
        params.ladder_step = 0.25;
        assert!(params.validate().is_ok());
        assert_eq!(params.rung_count(), 4);
    }

    #[test]
    fn live_mode_without_key_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.account_mode = AccountMode::Live;
        assert!(cfg.validate().is_err());
        cfg.api_key = Some("k".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = std::env::temp_dir().join(format!("pump-sniper-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.max_held_assets = 4;
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.max_held_assets, 4);

        std::fs::remove_dir_all(&dir).ok();
    }
}
