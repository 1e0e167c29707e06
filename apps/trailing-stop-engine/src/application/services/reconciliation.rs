//! Reconciliation Job
//!
//! Aligns local `OPEN` orders with the broker's authoritative status after
//! every successful feed connect. Each order is looked up independently; a
//! failed lookup is recorded and the batch moves on.

use std::sync::Arc;

use crate::application::ports::{BrokerTradingPort, OrderStore};
use crate::application::session::BrokerSessions;
use crate::domain::order::{Broker, Order, OrderStatus};
use crate::infrastructure::metrics;

use super::feed_subscriptions::FeedSubscriptions;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Open orders examined.
    pub checked: usize,
    /// Orders moved to a terminal status.
    pub updated: usize,
    /// Orders whose broker status did not warrant a change.
    pub unchanged: usize,
    /// Orders without a broker order id.
    pub skipped: usize,
    /// Per-order failures.
    pub errors: Vec<String>,
}

impl ReconciliationReport {
    /// True if every lookup succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

enum OrderOutcome {
    Updated,
    Unchanged,
    Skipped,
}

/// Reconciles local order state against one broker.
pub struct ReconciliationJob<S>
where
    S: OrderStore,
{
    store: Arc<S>,
    sessions: Arc<BrokerSessions>,
    subscriptions: FeedSubscriptions,
}

impl<S> ReconciliationJob<S>
where
    S: OrderStore,
{
    /// Create a job.
    pub fn new(store: Arc<S>, sessions: Arc<BrokerSessions>) -> Self {
        Self {
            store,
            sessions,
            subscriptions: FeedSubscriptions::new(),
        }
    }

    /// Release the instruments of orders found finished at the broker.
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: FeedSubscriptions) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Reconcile every `OPEN` order at `broker`.
    pub async fn run(&self, broker: Broker) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();

        let Some(client) = self.sessions.client(broker) else {
            tracing::warn!(%broker, "No broker session; reconciliation skipped");
            return report;
        };

        let orders = match self.store.find_open(broker).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(%broker, error = %e, "Failed to load open orders");
                report.errors.push(format!("failed to load open orders: {e}"));
                return report;
            }
        };

        for order in orders {
            report.checked += 1;
            match self.reconcile_order(client.as_ref(), &order).await {
                Ok(OrderOutcome::Updated) => report.updated += 1,
                Ok(OrderOutcome::Unchanged) => report.unchanged += 1,
                Ok(OrderOutcome::Skipped) => report.skipped += 1,
                Err(message) => {
                    tracing::warn!(
                        %broker,
                        order_id = %order.id,
                        error = %message,
                        "Reconciliation failed for order"
                    );
                    report.errors.push(format!("order {}: {message}", order.id));
                }
            }
        }

        metrics::record_reconciliation(broker, report.updated, report.errors.len());
        tracing::info!(
            %broker,
            checked = report.checked,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Reconciliation complete"
        );
        report
    }

    async fn reconcile_order(
        &self,
        client: &dyn BrokerTradingPort,
        order: &Order,
    ) -> Result<OrderOutcome, String> {
        let Some(broker_order_id) = order.broker_order_id.as_deref() else {
            return Ok(OrderOutcome::Skipped);
        };

        let broker_status = client
            .order_status(broker_order_id)
            .await
            .map_err(|e| e.to_string())?;

        let Some(status) = OrderStatus::from_broker_status(&broker_status) else {
            tracing::debug!(order_id = %order.id, %broker_status, "Broker status leaves order open");
            return Ok(OrderOutcome::Unchanged);
        };

        let moved = self
            .store
            .transition_status(order.id, OrderStatus::Open, status)
            .await
            .map_err(|e| e.to_string())?;

        if moved {
            tracing::info!(
                order_id = %order.id,
                %broker_order_id,
                %broker_status,
                %status,
                "Order status reconciled"
            );
            self.subscriptions
                .release(self.store.as_ref(), order.broker, &order.instrument_key)
                .await;
            Ok(OrderOutcome::Updated)
        } else {
            Ok(OrderOutcome::Unchanged)
        }
    }
}
