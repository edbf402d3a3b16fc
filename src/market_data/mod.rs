pub mod events;
pub mod pump_stream;

pub use events::{parse_event, FeedEvent, NewTokenEvent, TradeTick};
pub use pump_stream::{run_pump_stream, FeedCommand, FeedHandle};

use crate::error::FeedError;

/// Per-mint trade subscriptions on the market-data feed.
pub trait Subscriptions: Send + Sync {
    fn subscribe(&self, mints: &[String]) -> Result<(), FeedError>;
    fn unsubscribe(&self, mints: &[String]) -> Result<(), FeedError>;
}
