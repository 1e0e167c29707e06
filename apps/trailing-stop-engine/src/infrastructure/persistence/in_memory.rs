//! In-memory order store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{OrderStore, StoreError};
use crate::domain::order::{Broker, NewOrder, Order, OrderId, OrderStatus};

/// In-memory implementation of `OrderStore`.
///
/// Counts every mutating call so tests can assert that a tick was a no-op.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<BTreeMap<OrderId, Order>>,
    next_id: AtomicI64,
    writes: AtomicUsize,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    /// Number of mutating calls served so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Put an order in place as-is (test setup). Not counted as a write.
    pub fn seed(&self, order: Order) {
        self.next_id.fetch_max(order.id.value(), Ordering::SeqCst);
        self.orders.write().insert(order.id, order);
    }

    /// Snapshot of an order.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.orders.read().get(&id).cloned()
    }

    fn mutate<F>(&self, id: OrderId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Order),
    {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut orders = self.orders.write();
        let order = orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        f(order);
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut orders = self.orders.write();
        let taken = orders.values().any(|o| {
            o.broker == order.broker
                && o.instrument_key == order.instrument_key
                && o.status.is_active()
        });
        if taken {
            return Err(StoreError::ActiveOrderExists {
                broker: order.broker,
                instrument_key: order.instrument_key,
            });
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        let id = OrderId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let order = Order::from_new(id, order, Utc::now());
        orders.insert(id, order.clone());
        Ok(order)
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        self.mutate(id, |o| o.status = status)
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut orders = self.orders.write();
        let order = orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if order.status != from {
            return Ok(false);
        }
        order.status = to;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_trailing_state(
        &self,
        id: OrderId,
        stop_price: Decimal,
        profit_pct: Decimal,
    ) -> Result<(), StoreError> {
        self.mutate(id, |o| {
            o.current_stop_price = Some(stop_price);
            o.potential_profit = Some(profit_pct);
        })
    }

    async fn find_open_by_instrument(
        &self,
        broker: Broker,
        instrument_key: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .values()
            .find(|o| {
                o.broker == broker
                    && o.instrument_key == instrument_key
                    && o.status == OrderStatus::Open
            })
            .cloned())
    }

    async fn find_open(&self, broker: Broker) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .values()
            .filter(|o| o.broker == broker && o.status == OrderStatus::Open)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.get(id))
    }
}
