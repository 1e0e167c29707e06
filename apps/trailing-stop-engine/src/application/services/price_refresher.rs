//! Price Refresher
//!
//! Keeps stops moving while a broker feed is down. On a fixed interval the
//! last traded price of every `OPEN` order is fetched over REST and run
//! through the tick processor as an LTP-only tick, so trailing and
//! triggering follow exactly the same path as streamed ticks.
//!
//! Brokers whose feed is connected are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BrokerTradingPort, OrderStore};
use crate::application::session::BrokerSessions;
use crate::domain::order::{Broker, Order};
use crate::domain::tick::Tick;
use crate::infrastructure::feed::{FeedHandle, FeedState};
use crate::infrastructure::metrics;

use super::exit_queue::ExitOrderQueue;
use super::tick_processor::{TickOutcome, TickProcessor};

/// Result of one refresh pass over a broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Open orders examined.
    pub checked: usize,
    /// Orders that received a usable price.
    pub priced: usize,
    /// Orders whose stop was breached by the polled price.
    pub triggered: usize,
    /// Per-order failures.
    pub errors: Vec<String>,
}

/// Periodic REST price poller.
pub struct PriceRefresher<S>
where
    S: OrderStore,
{
    store: Arc<S>,
    sessions: Arc<BrokerSessions>,
    processor: TickProcessor<S>,
    feeds: HashMap<Broker, FeedHandle>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<S> PriceRefresher<S>
where
    S: OrderStore,
{
    /// Create a refresher polling every `interval`.
    pub fn new(
        store: Arc<S>,
        sessions: Arc<BrokerSessions>,
        exits: ExitOrderQueue,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor: TickProcessor::new(Arc::clone(&store), exits),
            store,
            sessions,
            feeds: HashMap::new(),
            interval,
            cancel,
        }
    }

    /// Skip polling for the handle's broker while its feed is connected.
    #[must_use]
    pub fn with_feed(mut self, handle: FeedHandle) -> Self {
        self.feeds.insert(handle.broker(), handle);
        self
    }

    /// Poll until cancelled. The first pass runs one interval after start.
    ///
    /// Cancellation is observed between passes; a pass in progress
    /// finishes.
    pub async fn run(self) {
        if self.interval.is_zero() {
            tracing::info!("Price refresh disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            "Starting price refresher"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!("Price refresher shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.refresh_all().await;
                }
            }
        }
    }

    /// One pass over every broker with a session and no live feed.
    pub async fn refresh_all(&self) -> Vec<(Broker, RefreshReport)> {
        let mut reports = Vec::new();
        for broker in self.sessions.brokers() {
            if self.feed_is_live(broker) {
                tracing::trace!(%broker, "Feed connected; price refresh skipped");
                continue;
            }
            reports.push((broker, self.refresh(broker).await));
        }
        reports
    }

    /// Poll and evaluate every `OPEN` order at `broker`.
    pub async fn refresh(&self, broker: Broker) -> RefreshReport {
        let mut report = RefreshReport::default();

        let Some(client) = self.sessions.client(broker) else {
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
        if orders.is_empty() {
            return report;
        }

        for order in orders {
            report.checked += 1;
            match self.refresh_order(client.as_ref(), &order).await {
                Ok(None) => {}
                Ok(Some(outcome)) => {
                    report.priced += 1;
                    if outcome == TickOutcome::Triggered {
                        report.triggered += 1;
                    }
                }
                Err(message) => {
                    tracing::warn!(
                        %broker,
                        order_id = %order.id,
                        symbol = %order.symbol,
                        error = %message,
                        "Price refresh failed for order"
                    );
                    report.errors.push(format!("order {}: {message}", order.id));
                }
            }
        }

        metrics::record_price_poll(broker, report.priced, report.errors.len());
        tracing::debug!(
            %broker,
            checked = report.checked,
            priced = report.priced,
            triggered = report.triggered,
            errors = report.errors.len(),
            "Price refresh complete"
        );
        report
    }

    fn feed_is_live(&self, broker: Broker) -> bool {
        self.feeds
            .get(&broker)
            .is_some_and(|feed| feed.state() == FeedState::Connected)
    }

    /// `Ok(None)` when the broker has no usable price yet.
    async fn refresh_order(
        &self,
        client: &dyn BrokerTradingPort,
        order: &Order,
    ) -> Result<Option<TickOutcome>, String> {
        let price = client
            .last_price(&order.exchange, &order.symbol, &order.instrument_key)
            .await
            .map_err(|e| e.to_string())?;

        if price <= Decimal::ZERO {
            return Ok(None);
        }

        let tick = Tick::ltp(order.instrument_key.clone(), price);
        self.processor
            .process(order.broker, &tick)
            .await
            .map(Some)
            .map_err(|e| e.to_string())
    }
}
