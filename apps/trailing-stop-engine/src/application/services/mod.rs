//! Application Services
//!
//! - `TickProcessor`: trailing-stop evaluation with store and queue effects
//! - `ExitOrderQueue` / `SubmissionWorker`: serialized exit submission
//! - `ReconciliationJob`: broker status alignment on connect
//! - `FeedPipeline`: the `FeedHandler` wiring both to a broker feed
//! - `OrderIntake`: order registration and subscription restore
//! - `FeedSubscriptions`: per-broker instrument subscriptions
//! - `PriceRefresher`: REST price polling while a feed is down

mod exit_queue;
mod feed_subscriptions;
mod intake;
mod pipeline;
mod price_refresher;
mod reconciliation;
mod tick_processor;

pub use exit_queue::{
    ExitOrderQueue, ExitQueueItem, ExitQueueReceiver, QueueClosed, SubmissionConfig,
    SubmissionStats, SubmissionWorker,
};
pub use feed_subscriptions::FeedSubscriptions;
pub use intake::OrderIntake;
pub use pipeline::FeedPipeline;
pub use price_refresher::{PriceRefresher, RefreshReport};
pub use reconciliation::{ReconciliationJob, ReconciliationReport};
pub use tick_processor::{TickError, TickOutcome, TickProcessor};
