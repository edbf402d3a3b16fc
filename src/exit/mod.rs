// =============================================================================
// Exit Management Module
// =============================================================================
//
// Implements the stop-loss / take-profit ladder evaluator and the background
// liveness monitor that force-liquidates assets whose trade stream went quiet.

pub mod ladder;
pub mod monitor;

pub use ladder::{ExitPolicy, ExitSignal};
pub use monitor::run_liveness_monitor;
