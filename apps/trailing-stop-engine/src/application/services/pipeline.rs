//! Feed Pipeline
//!
//! Connects a broker feed to the engine: reconcile on every connect, then
//! evaluate each tick in arrival order. Errors stop at this boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{FeedHandler, OrderStore};
use crate::application::session::BrokerSessions;
use crate::domain::order::Broker;
use crate::domain::tick::Tick;
use crate::infrastructure::metrics;

use super::exit_queue::ExitOrderQueue;
use super::feed_subscriptions::FeedSubscriptions;
use super::reconciliation::ReconciliationJob;
use super::tick_processor::TickProcessor;

/// Feed handler backed by the tick processor and reconciliation job.
pub struct FeedPipeline<S>
where
    S: OrderStore,
{
    processor: TickProcessor<S>,
    reconciliation: ReconciliationJob<S>,
}

impl<S> FeedPipeline<S>
where
    S: OrderStore,
{
    /// Build a pipeline over shared collaborators.
    pub fn new(store: Arc<S>, sessions: Arc<BrokerSessions>, exits: ExitOrderQueue) -> Self {
        Self {
            processor: TickProcessor::new(Arc::clone(&store), exits),
            reconciliation: ReconciliationJob::new(store, sessions),
        }
    }

    /// Unsubscribe instruments whose orders reconciliation finalizes.
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: FeedSubscriptions) -> Self {
        self.reconciliation = self.reconciliation.with_subscriptions(subscriptions);
        self
    }
}

#[async_trait]
impl<S> FeedHandler for FeedPipeline<S>
where
    S: OrderStore,
{
    async fn on_connected(&self, broker: Broker) {
        let _ = self.reconciliation.run(broker).await;
    }

    async fn on_tick(&self, broker: Broker, tick: Tick) {
        metrics::record_tick(broker);
        if let Err(e) = self.processor.process(broker, &tick).await {
            tracing::error!(
                %broker,
                instrument = %tick.instrument_key,
                error = %e,
                "Tick processing failed"
            );
        }
    }
}
