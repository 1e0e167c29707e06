//! Exit Order Queue and Submission Worker
//!
//! Producers (one per feed task) push exit requests onto an unbounded FIFO
//! and never block. A single worker drains it sequentially, so exits reach
//! each broker in trigger order and never concurrently.
//!
//! Submissions that never reached the broker are retried a bounded number
//! of times with a fixed delay. An exit whose outcome is unknown (timeout
//! after send, 5xx) is never resent, since a second market order could
//! reverse the position. In both failure cases the order stays `TRIGGERED`
//! for manual follow-up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::application::ports::{BrokerError, MarketOrderRequest, OrderStore};
use crate::application::session::BrokerSessions;
use crate::domain::order::{ExitOrderRequest, OrderStatus};
use crate::infrastructure::metrics::{self, ExitOutcome};

use super::feed_subscriptions::FeedSubscriptions;

// =============================================================================
// Queue
// =============================================================================

/// Item on the exit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitQueueItem {
    /// Flatten a position.
    Exit(ExitOrderRequest),
    /// Stop the worker after everything queued before it.
    Shutdown,
}

/// The worker is gone; nothing can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("exit order queue is closed")]
pub struct QueueClosed;

/// Receiving half of the exit queue, owned by the worker.
pub type ExitQueueReceiver = mpsc::UnboundedReceiver<ExitQueueItem>;

/// Sending half of the exit queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExitOrderQueue {
    tx: mpsc::UnboundedSender<ExitQueueItem>,
}

impl ExitOrderQueue {
    /// Create a queue and its receiver.
    #[must_use]
    pub fn new() -> (Self, ExitQueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an exit order.
    pub fn enqueue(&self, request: ExitOrderRequest) -> Result<(), QueueClosed> {
        self.tx
            .send(ExitQueueItem::Exit(request))
            .map_err(|_| QueueClosed)
    }

    /// Queue the shutdown sentinel.
    pub fn shutdown(&self) -> Result<(), QueueClosed> {
        self.tx.send(ExitQueueItem::Shutdown).map_err(|_| QueueClosed)
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Retry settings for exit submission.
#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Attempts per exit order, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Totals reported when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionStats {
    /// Exits accepted by the broker.
    pub submitted: usize,
    /// Exits that failed every attempt.
    pub failed: usize,
    /// Exits discarded for lack of a broker session.
    pub dropped: usize,
}

/// Single consumer of the exit queue.
pub struct SubmissionWorker<S>
where
    S: OrderStore,
{
    store: Arc<S>,
    sessions: Arc<BrokerSessions>,
    config: SubmissionConfig,
    rx: ExitQueueReceiver,
    subscriptions: FeedSubscriptions,
}

impl<S> SubmissionWorker<S>
where
    S: OrderStore,
{
    /// Create a worker over the queue's receiver.
    pub fn new(
        store: Arc<S>,
        sessions: Arc<BrokerSessions>,
        config: SubmissionConfig,
        rx: ExitQueueReceiver,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
            rx,
            subscriptions: FeedSubscriptions::new(),
        }
    }

    /// Release each closed position's instrument from its feed.
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: FeedSubscriptions) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Drain the queue until the shutdown sentinel or until every sender is dropped.
    pub async fn run(mut self) -> SubmissionStats {
        let mut stats = SubmissionStats::default();

        while let Some(item) = self.rx.recv().await {
            let ExitQueueItem::Exit(request) = item else {
                tracing::info!("Submission worker received shutdown");
                break;
            };

            let started = Instant::now();
            let outcome = self.submit(&request).await;
            metrics::record_exit(request.broker, outcome, started.elapsed());
            match outcome {
                ExitOutcome::Submitted => stats.submitted += 1,
                ExitOutcome::Failed => stats.failed += 1,
                ExitOutcome::Dropped => stats.dropped += 1,
            }
        }

        tracing::info!(
            submitted = stats.submitted,
            failed = stats.failed,
            dropped = stats.dropped,
            "Submission worker stopped"
        );
        stats
    }

    async fn submit(&self, exit: &ExitOrderRequest) -> ExitOutcome {
        let Some(client) = self.sessions.client(exit.broker) else {
            tracing::error!(
                broker = %exit.broker,
                order_id = %exit.order_id,
                "No broker session; exit order dropped, order left TRIGGERED"
            );
            return ExitOutcome::Dropped;
        };

        let request = MarketOrderRequest::from(exit);
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match client.place_market_order(&request).await {
                Ok(broker_order_id) => {
                    tracing::info!(
                        broker = %exit.broker,
                        order_id = %exit.order_id,
                        %broker_order_id,
                        symbol = %exit.symbol,
                        side = %exit.side,
                        quantity = exit.quantity,
                        "Exit order placed"
                    );
                    match self.store.update_status(exit.order_id, OrderStatus::Closed).await {
                        Ok(()) => {
                            self.subscriptions
                                .release(self.store.as_ref(), exit.broker, &exit.instrument_key)
                                .await;
                        }
                        Err(e) => tracing::error!(
                            order_id = %exit.order_id,
                            error = %e,
                            "Exit order placed but order could not be marked CLOSED"
                        ),
                    }
                    return ExitOutcome::Submitted;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        broker = %exit.broker,
                        order_id = %exit.order_id,
                        attempt,
                        error = %e,
                        "Exit order failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e @ BrokerError::Indeterminate { .. }) => {
                    tracing::error!(
                        broker = %exit.broker,
                        order_id = %exit.order_id,
                        attempt,
                        error = %e,
                        "Exit order outcome unknown; not resent, check broker order book"
                    );
                    return ExitOutcome::Failed;
                }
                Err(e) => {
                    tracing::error!(
                        broker = %exit.broker,
                        order_id = %exit.order_id,
                        attempt,
                        error = %e,
                        "Exit order failed; order left TRIGGERED"
                    );
                    return ExitOutcome::Failed;
                }
            }
        }

        ExitOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::BrokerTradingPort;
    use crate::domain::order::{Broker, OrderId, fixtures};
    use crate::infrastructure::persistence::InMemoryOrderStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;

    struct ScriptedBroker {
        broker: Broker,
        replies: Mutex<VecDeque<Result<String, BrokerError>>>,
        calls: Mutex<Vec<MarketOrderRequest>>,
    }

    impl ScriptedBroker {
        fn new(broker: Broker, replies: Vec<Result<String, BrokerError>>) -> Self {
            Self {
                broker,
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrokerTradingPort for ScriptedBroker {
        fn broker(&self) -> Broker {
            self.broker
        }

        async fn place_market_order(&self, request: &MarketOrderRequest) -> Result<String, BrokerError> {
            self.calls.lock().push(request.clone());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("default".into()))
        }

        async fn order_status(&self, _: &str) -> Result<String, BrokerError> {
            Ok("OPEN".into())
        }

        async fn last_price(&self, _: &str, _: &str, _: &str) -> Result<Decimal, BrokerError> {
            unreachable!("the worker never reads quotes")
        }
    }

    fn fast_config() -> SubmissionConfig {
        SubmissionConfig {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn triggered(store: &InMemoryOrderStore, id: i64) -> ExitOrderRequest {
        let mut order = fixtures::open_order(id, Broker::Zerodha, &id.to_string());
        order.status = OrderStatus::Triggered;
        let exit = order.exit_request();
        store.seed(order);
        exit
    }

    #[tokio::test]
    async fn success_marks_closed() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(Broker::Zerodha, vec![Ok("X1".into())]));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();

        let stats = SubmissionWorker::new(store.clone(), sessions, fast_config(), rx)
            .run()
            .await;

        assert_eq!(stats.submitted, 1);
        assert_eq!(store.get(OrderId(1)).unwrap().status, OrderStatus::Closed);
    }

    #[tokio::test]
    async fn closed_position_is_unsubscribed() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(Broker::Zerodha, vec![Ok("X1".into())]));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker);

        let manager = Arc::new(crate::domain::subscription::SubscriptionManager::with_keys([
            "1", "256265",
        ]));
        let subscriptions = FeedSubscriptions::new().with_feed(Broker::Zerodha, manager.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();

        SubmissionWorker::new(store.clone(), sessions, fast_config(), rx)
            .with_subscriptions(subscriptions)
            .run()
            .await;

        assert_eq!(manager.keys(), vec!["256265"]);
    }

    #[tokio::test]
    async fn retryable_failure_is_retried() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(
            Broker::Zerodha,
            vec![Err(BrokerError::RateLimited), Ok("X1".into())],
        ));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();

        let stats = SubmissionWorker::new(store.clone(), sessions, fast_config(), rx)
            .run()
            .await;

        assert_eq!(stats.submitted, 1);
        assert_eq!(broker.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_triggered() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(
            Broker::Zerodha,
            vec![
                Err(BrokerError::RateLimited),
                Err(BrokerError::RateLimited),
                Err(BrokerError::RateLimited),
            ],
        ));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();

        let stats = SubmissionWorker::new(store.clone(), sessions, fast_config(), rx)
            .run()
            .await;

        assert_eq!(stats.failed, 1);
        assert_eq!(broker.calls.lock().len(), 3);
        assert_eq!(store.get(OrderId(1)).unwrap().status, OrderStatus::Triggered);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(
            Broker::Zerodha,
            vec![Err(BrokerError::OrderRejected {
                reason: "insufficient margin".into(),
            })],
        ));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();

        let stats = SubmissionWorker::new(store.clone(), sessions, fast_config(), rx)
            .run()
            .await;

        assert_eq!(stats.failed, 1);
        assert_eq!(broker.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_outcome_is_not_resent() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(
            Broker::Zerodha,
            vec![Err(BrokerError::Indeterminate {
                message: "operation timed out".into(),
            })],
        ));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();

        let stats = SubmissionWorker::new(store.clone(), sessions, fast_config(), rx)
            .run()
            .await;

        assert_eq!(stats.failed, 1);
        assert_eq!(broker.calls.lock().len(), 1);
        assert_eq!(store.get(OrderId(1)).unwrap().status, OrderStatus::Triggered);
    }

    #[tokio::test]
    async fn refused_connection_is_retried() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(
            Broker::Zerodha,
            vec![
                Err(BrokerError::Connection {
                    message: "connection refused".into(),
                }),
                Ok("X2".into()),
            ],
        ));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();

        let stats = SubmissionWorker::new(store.clone(), sessions, fast_config(), rx)
            .run()
            .await;

        assert_eq!(stats.submitted, 1);
        assert_eq!(broker.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn missing_session_drops() {
        let store = Arc::new(InMemoryOrderStore::new());
        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        drop(queue);

        let stats = SubmissionWorker::new(
            store.clone(),
            Arc::new(BrokerSessions::new()),
            fast_config(),
            rx,
        )
        .run()
        .await;

        assert_eq!(stats.dropped, 1);
        assert_eq!(store.get(OrderId(1)).unwrap().status, OrderStatus::Triggered);
    }

    #[tokio::test]
    async fn items_after_shutdown_are_not_processed() {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = Arc::new(ScriptedBroker::new(Broker::Zerodha, vec![]));
        let sessions = Arc::new(BrokerSessions::new());
        sessions.open(broker.clone());

        let (queue, rx) = ExitOrderQueue::new();
        queue.enqueue(triggered(&store, 1)).unwrap();
        queue.shutdown().unwrap();
        queue.enqueue(triggered(&store, 2)).unwrap();

        let stats = SubmissionWorker::new(store, sessions, fast_config(), rx)
            .run()
            .await;

        assert_eq!(stats.submitted, 1);
        assert_eq!(broker.calls.lock().len(), 1);
    }

    #[test]
    fn enqueue_after_worker_gone_fails() {
        let (queue, rx) = ExitOrderQueue::new();
        drop(rx);
        let exit = fixtures::open_order(1, Broker::Upstox, "K").exit_request();
        assert_eq!(queue.enqueue(exit), Err(QueueClosed));
    }
}
