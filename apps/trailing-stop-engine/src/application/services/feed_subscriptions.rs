//! Feed Subscriptions
//!
//! Per-broker subscription managers shared by the services that open and
//! finalize orders. An instrument is subscribed when its order is
//! registered and released once that order reaches a terminal status and
//! no other active order at the same broker still needs the stream.

use std::collections::HashMap;
use std::sync::Arc;

use crate::application::ports::OrderStore;
use crate::domain::order::Broker;
use crate::domain::subscription::SubscriptionManager;
use crate::infrastructure::metrics;

/// Subscription managers keyed by broker. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct FeedSubscriptions {
    managers: HashMap<Broker, Arc<SubscriptionManager>>,
}

impl FeedSubscriptions {
    /// Registry with no feeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a broker's instruments to its subscription manager.
    #[must_use]
    pub fn with_feed(mut self, broker: Broker, manager: Arc<SubscriptionManager>) -> Self {
        self.managers.insert(broker, manager);
        self
    }

    /// The manager for a broker, if it has a feed.
    #[must_use]
    pub fn manager(&self, broker: Broker) -> Option<&Arc<SubscriptionManager>> {
        self.managers.get(&broker)
    }

    /// Every broker with a feed and its manager.
    pub fn iter(&self) -> impl Iterator<Item = (Broker, &Arc<SubscriptionManager>)> {
        self.managers.iter().map(|(broker, manager)| (*broker, manager))
    }

    /// Subscribe instruments on a broker's feed.
    ///
    /// Returns false if the broker has no feed.
    pub fn subscribe<I, K>(&self, broker: Broker, keys: I) -> bool
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let Some(manager) = self.managers.get(&broker) else {
            return false;
        };
        manager.subscribe(keys);
        metrics::set_subscriptions(broker, manager.len());
        true
    }

    /// Stop streaming an instrument whose order was finalized.
    ///
    /// The store is checked before and after unsubscribing, so an order
    /// registered for the same instrument in between keeps its stream. A
    /// failed lookup keeps the subscription.
    pub async fn release<S>(&self, store: &S, broker: Broker, instrument_key: &str)
    where
        S: OrderStore + ?Sized,
    {
        let Some(manager) = self.managers.get(&broker) else {
            return;
        };

        match store.find_open_by_instrument(broker, instrument_key).await {
            Ok(None) => {}
            Ok(Some(_)) => return,
            Err(e) => {
                tracing::warn!(
                    %broker,
                    instrument = %instrument_key,
                    error = %e,
                    "Could not check instrument usage; keeping subscription"
                );
                return;
            }
        }

        if !manager.unsubscribe([instrument_key]) {
            return;
        }

        if matches!(
            store.find_open_by_instrument(broker, instrument_key).await,
            Ok(Some(_)) | Err(_)
        ) {
            manager.subscribe([instrument_key.to_string()]);
        } else {
            tracing::info!(%broker, instrument = %instrument_key, "Instrument unsubscribed");
        }
        metrics::set_subscriptions(broker, manager.len());
    }
}
