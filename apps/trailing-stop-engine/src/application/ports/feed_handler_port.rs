//! Feed Handler Port (Driver Port)
//!
//! How a broker feed drives the engine: one call per successful connect and
//! one call per decoded tick, in arrival order.

use async_trait::async_trait;

use crate::domain::order::Broker;
use crate::domain::tick::Tick;

/// Receiver of feed lifecycle events and ticks.
///
/// Implementations must not fail: errors are handled and logged inside.
#[async_trait]
pub trait FeedHandler: Send + Sync {
    /// Called after a (re)connect once subscriptions have been sent, before
    /// any tick of the new session is delivered.
    async fn on_connected(&self, broker: Broker);

    /// Called for every decoded tick.
    async fn on_tick(&self, broker: Broker, tick: Tick);
}
