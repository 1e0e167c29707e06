//! Order Store Port (Driven Port)
//!
//! Durable order table. Implementations open short-lived connections per
//! operation; no transaction spans a whole tick evaluation.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::order::{Broker, NewOrder, Order, OrderId, OrderStatus};

/// Order store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend failure (I/O, SQL, lock poisoning).
    #[error("order store error: {0}")]
    Backend(String),

    /// No order with this id.
    #[error("order not found: {0}")]
    NotFound(OrderId),

    /// The instrument already has an `OPEN` or `TRIGGERED` order at this broker.
    #[error("{broker} already has an active order for {instrument_key}")]
    ActiveOrderExists {
        /// Broker.
        broker: Broker,
        /// Instrument key.
        instrument_key: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt order row {id}: {message}")]
    Corrupt {
        /// Row id.
        id: i64,
        /// Decode failure.
        message: String,
    },
}

/// Port for order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new `OPEN` order with its initial stop.
    ///
    /// Fails with [`StoreError::ActiveOrderExists`] if the instrument already
    /// has an `OPEN` or `TRIGGERED` order at the same broker.
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError>;

    /// Unconditionally set an order's status.
    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError>;

    /// Set status to `to` only if it is currently `from`.
    ///
    /// Returns false if the order was not in `from`; the caller lost the race.
    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// Persist a ratcheted stop and the profit observed with it.
    async fn update_trailing_state(
        &self,
        id: OrderId,
        stop_price: Decimal,
        profit_pct: Decimal,
    ) -> Result<(), StoreError>;

    /// The single `OPEN` order for an instrument at a broker, if any.
    async fn find_open_by_instrument(
        &self,
        broker: Broker,
        instrument_key: &str,
    ) -> Result<Option<Order>, StoreError>;

    /// All `OPEN` orders at a broker.
    async fn find_open(&self, broker: Broker) -> Result<Vec<Order>, StoreError>;

    /// Look up an order by id.
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError>;
}
