// =============================================================================
// Pump Sniper — position tracking and tiered exits for pump.fun tokens
// =============================================================================

pub mod adapter;
pub mod api;
pub mod app_state;
pub mod engine;
pub mod error;
pub mod execution;
pub mod exit;
pub mod market_data;
pub mod numeric;
pub mod position_engine;
pub mod runtime_config;
pub mod smart_filters;
pub mod sniper;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::ExitEngine;
pub use position_engine::{PositionRegistry, TrackingRecord};
