//! Trailing Stop Flow Integration Tests
//!
//! Drives ticks through the feed pipeline into an in-memory store and a
//! scripted broker: trail, trigger, exit submission, reconciliation and
//! REST price polling.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use trailing_stop_engine::{
    Broker, BrokerError, BrokerSessions, BrokerTradingPort, ExitOrderQueue, FeedHandler,
    FeedPipeline, InMemoryOrderStore, MarketOrderRequest, NewOrder, OrderIntake, OrderSide,
    OrderStatus, OrderStore, PriceRefresher, ProductType, SubmissionConfig, SubmissionWorker,
    SubscriptionManager, Tick,
};

/// Broker double: records placed orders and serves canned statuses and quotes.
#[derive(Default)]
struct RecordingBroker {
    broker: Option<Broker>,
    placed: Mutex<Vec<MarketOrderRequest>>,
    statuses: Mutex<HashMap<String, String>>,
    prices: Mutex<HashMap<String, Decimal>>,
    reject_all: bool,
}

impl RecordingBroker {
    fn new(broker: Broker) -> Self {
        Self {
            broker: Some(broker),
            ..Self::default()
        }
    }

    fn with_status(self, broker_order_id: &str, status: &str) -> Self {
        self.statuses
            .lock()
            .insert(broker_order_id.to_string(), status.to_string());
        self
    }

    fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.prices.lock().insert(symbol.to_string(), price);
        self
    }

    fn placed(&self) -> Vec<MarketOrderRequest> {
        self.placed.lock().clone()
    }
}

#[async_trait]
impl BrokerTradingPort for RecordingBroker {
    fn broker(&self) -> Broker {
        self.broker.unwrap_or(Broker::Zerodha)
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> Result<String, BrokerError> {
        if self.reject_all {
            return Err(BrokerError::OrderRejected {
                reason: "insufficient margin".into(),
            });
        }
        let mut placed = self.placed.lock();
        placed.push(request.clone());
        Ok(format!("EXIT-{}", placed.len()))
    }

    async fn order_status(&self, broker_order_id: &str) -> Result<String, BrokerError> {
        self.statuses
            .lock()
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound {
                order_id: broker_order_id.to_string(),
            })
    }

    async fn last_price(
        &self,
        exchange: &str,
        symbol: &str,
        _instrument_key: &str,
    ) -> Result<Decimal, BrokerError> {
        self.prices
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::OrderNotFound {
                order_id: format!("{exchange}:{symbol}"),
            })
    }
}

fn position(broker: Broker, instrument_key: &str, entry_order: &str) -> NewOrder {
    NewOrder {
        broker_order_id: Some(entry_order.to_string()),
        broker,
        instrument_key: instrument_key.to_string(),
        symbol: "INFY".to_string(),
        exchange: "NSE".to_string(),
        quantity: 10,
        side: OrderSide::Buy,
        product: ProductType::CarryForward,
        entry_price: dec!(100),
        stoploss_percent: dec!(5),
    }
}

struct Engine {
    store: Arc<InMemoryOrderStore>,
    broker: Arc<RecordingBroker>,
    sessions: Arc<BrokerSessions>,
    pipeline: FeedPipeline<InMemoryOrderStore>,
    exits: ExitOrderQueue,
    worker: tokio::task::JoinHandle<trailing_stop_engine::SubmissionStats>,
}

fn engine(broker: RecordingBroker) -> Engine {
    let store = Arc::new(InMemoryOrderStore::new());
    let broker = Arc::new(broker);
    let sessions = Arc::new(BrokerSessions::new());
    sessions.open(broker.clone());

    let (exits, rx) = ExitOrderQueue::new();
    let config = SubmissionConfig {
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
    };
    let worker = tokio::spawn(
        SubmissionWorker::new(Arc::clone(&store), Arc::clone(&sessions), config, rx).run(),
    );
    let pipeline = FeedPipeline::new(Arc::clone(&store), Arc::clone(&sessions), exits.clone());

    Engine {
        store,
        broker,
        sessions,
        pipeline,
        exits,
        worker,
    }
}

async fn wait_for_status(store: &InMemoryOrderStore, id: trailing_stop_engine::OrderId, status: OrderStatus) {
    timeout(Duration::from_secs(2), async {
        loop {
            if store.get(id).map(|o| o.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("order never reached expected status");
}

#[tokio::test]
async fn trails_then_triggers_and_closes() {
    let Engine {
        store,
        broker,
        pipeline,
        exits,
        worker,
        ..
    } = engine(RecordingBroker::new(Broker::Zerodha));

    let subscriptions = Arc::new(SubscriptionManager::new());
    let order = OrderIntake::new(Arc::clone(&store))
        .with_feed(Broker::Zerodha, Arc::clone(&subscriptions))
        .register(position(Broker::Zerodha, "408065", "ENTRY-1"))
        .await
        .unwrap();
    assert_eq!(subscriptions.keys(), vec!["408065".to_string()]);
    assert_eq!(order.current_stop_price, Some(dec!(95)));

    pipeline
        .on_tick(Broker::Zerodha, Tick::ltp("408065", dec!(102)))
        .await;
    assert_eq!(
        store.get(order.id).unwrap().current_stop_price,
        Some(dec!(96.90))
    );

    pipeline
        .on_tick(Broker::Zerodha, Tick::ltp("408065", dec!(105)))
        .await;
    let trailed = store.get(order.id).unwrap();
    assert_eq!(trailed.current_stop_price, Some(dec!(99.75)));
    assert_eq!(trailed.potential_profit, Some(dec!(5)));

    // Pullback above the stop holds it.
    pipeline
        .on_tick(Broker::Zerodha, Tick::ltp("408065", dec!(101)))
        .await;
    assert_eq!(
        store.get(order.id).unwrap().current_stop_price,
        Some(dec!(99.75))
    );

    pipeline
        .on_tick(Broker::Zerodha, Tick::ltp("408065", dec!(98)))
        .await;
    wait_for_status(&store, order.id, OrderStatus::Closed).await;

    // Further ticks on a closed order do nothing.
    pipeline
        .on_tick(Broker::Zerodha, Tick::ltp("408065", dec!(90)))
        .await;

    exits.shutdown().unwrap();
    let stats = worker.await.unwrap();
    assert_eq!(stats.submitted, 1);

    let placed = broker.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].side, OrderSide::Sell);
    assert_eq!(placed[0].quantity, 10);
    assert_eq!(placed[0].symbol, "INFY");
    assert_eq!(placed[0].product, ProductType::CarryForward);
}

#[tokio::test]
async fn ticks_for_other_broker_are_ignored() {
    let Engine {
        store,
        broker,
        pipeline,
        exits,
        worker,
        ..
    } = engine(RecordingBroker::new(Broker::Zerodha));

    let order = store
        .insert(position(Broker::Zerodha, "K", "ENTRY-1"))
        .await
        .unwrap();
    pipeline.on_tick(Broker::Upstox, Tick::ltp("K", dec!(50))).await;

    exits.shutdown().unwrap();
    worker.await.unwrap();
    assert_eq!(store.get(order.id).unwrap().status, OrderStatus::Open);
    assert!(broker.placed().is_empty());
}

#[tokio::test]
async fn exits_are_submitted_in_trigger_order() {
    let Engine {
        store,
        broker,
        pipeline,
        exits,
        worker,
        ..
    } = engine(RecordingBroker::new(Broker::Zerodha));

    let keys = ["A", "B", "C"];
    for key in keys {
        store
            .insert(position(Broker::Zerodha, key, &format!("ENTRY-{key}")))
            .await
            .unwrap();
    }
    for key in ["C", "A", "B"] {
        pipeline.on_tick(Broker::Zerodha, Tick::ltp(key, dec!(90))).await;
    }

    exits.shutdown().unwrap();
    let stats = worker.await.unwrap();
    assert_eq!(stats.submitted, 3);

    let order: Vec<String> = broker
        .placed()
        .into_iter()
        .map(|r| r.instrument_key)
        .collect();
    assert_eq!(order, vec!["C", "A", "B"]);
}

#[tokio::test]
async fn rejected_exit_leaves_order_triggered() {
    let Engine {
        store,
        pipeline,
        exits,
        worker,
        ..
    } = engine(RecordingBroker {
        reject_all: true,
        ..RecordingBroker::new(Broker::Zerodha)
    });

    let order = store
        .insert(position(Broker::Zerodha, "K", "ENTRY-1"))
        .await
        .unwrap();
    pipeline.on_tick(Broker::Zerodha, Tick::ltp("K", dec!(94))).await;

    exits.shutdown().unwrap();
    let stats = worker.await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(store.get(order.id).unwrap().status, OrderStatus::Triggered);
}

#[tokio::test]
async fn reconciliation_runs_on_connect() {
    let Engine {
        store,
        pipeline,
        exits,
        worker,
        ..
    } = engine(
        RecordingBroker::new(Broker::Upstox)
            .with_status("ENTRY-1", "complete")
            .with_status("ENTRY-2", "open")
            .with_status("ENTRY-3", "REJECTED"),
    );

    let filled = store
        .insert(position(Broker::Upstox, "NSE_EQ|A", "ENTRY-1"))
        .await
        .unwrap();
    let working = store
        .insert(position(Broker::Upstox, "NSE_EQ|B", "ENTRY-2"))
        .await
        .unwrap();
    let rejected = store
        .insert(position(Broker::Upstox, "NSE_EQ|C", "ENTRY-3"))
        .await
        .unwrap();

    pipeline.on_connected(Broker::Upstox).await;

    assert_eq!(store.get(filled.id).unwrap().status, OrderStatus::Closed);
    assert_eq!(store.get(working.id).unwrap().status, OrderStatus::Open);
    assert_eq!(store.get(rejected.id).unwrap().status, OrderStatus::Rejected);

    exits.shutdown().unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn polled_price_exits_while_feed_is_down() {
    let Engine {
        store,
        broker,
        sessions,
        exits,
        worker,
        ..
    } = engine(RecordingBroker::new(Broker::Zerodha).with_price("INFY", dec!(93.5)));

    let order = store
        .insert(position(Broker::Zerodha, "408065", "ENTRY-1"))
        .await
        .unwrap();

    let refresher = PriceRefresher::new(
        Arc::clone(&store),
        sessions,
        exits.clone(),
        Duration::from_millis(20),
        CancellationToken::new(),
    );
    let reports = refresher.refresh_all().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.triggered, 1);

    wait_for_status(&store, order.id, OrderStatus::Closed).await;
    exits.shutdown().unwrap();
    let stats = worker.await.unwrap();
    assert_eq!(stats.submitted, 1);
    assert_eq!(broker.placed()[0].side, OrderSide::Sell);
}
