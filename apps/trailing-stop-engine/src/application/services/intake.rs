//! Order Intake
//!
//! Entry point for the order-placement flow: store the new order and start
//! streaming its instrument.

use std::sync::Arc;

use crate::application::ports::{OrderStore, StoreError};
use crate::domain::order::{Broker, NewOrder, Order};
use crate::domain::subscription::SubscriptionManager;
use crate::infrastructure::metrics;

use super::feed_subscriptions::FeedSubscriptions;

/// Registers orders and keeps each broker's subscription set in step.
pub struct OrderIntake<S>
where
    S: OrderStore,
{
    store: Arc<S>,
    subscriptions: FeedSubscriptions,
}

impl<S> OrderIntake<S>
where
    S: OrderStore,
{
    /// Create an intake with no feeds attached.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            subscriptions: FeedSubscriptions::new(),
        }
    }

    /// Route a broker's instruments to its subscription manager.
    #[must_use]
    pub fn with_feed(mut self, broker: Broker, subscriptions: Arc<SubscriptionManager>) -> Self {
        self.subscriptions = self.subscriptions.with_feed(broker, subscriptions);
        self
    }

    /// Use a shared subscription registry.
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: FeedSubscriptions) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Store a new `OPEN` order and subscribe its instrument.
    ///
    /// Fails with [`StoreError::ActiveOrderExists`] while the instrument
    /// already has an active order at the broker; nothing is subscribed then.
    pub async fn register(&self, order: NewOrder) -> Result<Order, StoreError> {
        let order = self.store.insert(order).await?;
        tracing::info!(
            broker = %order.broker,
            order_id = %order.id,
            symbol = %order.symbol,
            instrument = %order.instrument_key,
            entry_price = %order.entry_price,
            stop_price = %order.stop_price(),
            "Order registered"
        );

        if !self
            .subscriptions
            .subscribe(order.broker, [order.instrument_key.clone()])
        {
            tracing::warn!(
                broker = %order.broker,
                order_id = %order.id,
                "No feed for broker; order will not be trailed"
            );
        }
        Ok(order)
    }

    /// Subscribe every instrument that has an `OPEN` order.
    ///
    /// Run at startup, before feeds connect, so the first connect sends the
    /// full working set.
    pub async fn restore_subscriptions(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for (broker, manager) in self.subscriptions.iter() {
            let orders = self.store.find_open(broker).await?;
            manager.subscribe(orders.into_iter().map(|o| o.instrument_key));
            metrics::set_subscriptions(broker, manager.len());
            tracing::info!(%broker, instruments = manager.len(), "Subscriptions restored");
            total += manager.len();
        }
        Ok(total)
    }
}
