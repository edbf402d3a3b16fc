// =============================================================================
// Error types
// =============================================================================
//
// Steady-state errors are typed so callers can tell "expected overlap" (e.g.
// a tick for an unknown mint) from real failures. Startup code wraps these in
// `anyhow` with context.
// =============================================================================

use thiserror::Error;

/// Failures of the position registry lifecycle operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("asset {0} is already tracked")]
    AlreadyTracked(String),

    #[error("asset {0} is not tracked")]
    NotFound(String),

    #[error("asset {0} still holds tokens and cannot be closed")]
    NotSold(String),

    #[error("held-asset limit reached ({limit})")]
    CapacityReached { limit: usize },

    #[error("registry is shutting down")]
    ShuttingDown,

    #[error("invalid entry for {mint}: {reason}")]
    InvalidEntry { mint: String, reason: String },
}

/// Reasons an inbound tick is discarded without touching any record.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("malformed trade message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("trade for {mint} has zero token quantity")]
    ZeroQuantity { mint: String },

    #[error("trade for {mint} produced invalid price {price}")]
    InvalidPrice { mint: String, price: f64 },
}

/// Failures reported by an execution adapter. All are treated as transient.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("trade API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("trade rejected: {0}")]
    Rejected(String),

    #[error("adapter unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the subscription side of the market-data feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed connection task is gone")]
    Closed,

    #[error("failed to encode feed request: {0}")]
    Encode(#[from] serde_json::Error),
}
