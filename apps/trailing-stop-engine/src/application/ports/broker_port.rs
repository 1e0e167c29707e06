//! Broker Trading Port (Driven Port)
//!
//! Interface for submitting exit orders and reading authoritative order
//! status from a broker.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{Broker, ExitOrderRequest, OrderSide, ProductType};

/// Market order to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOrderRequest {
    /// Exchange (e.g. `NSE`).
    pub exchange: String,
    /// Trading symbol (Kite orders are keyed by it).
    pub symbol: String,
    /// Instrument key (Upstox orders are keyed by it).
    pub instrument_key: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: u32,
    /// Product type.
    pub product: ProductType,
}

impl From<&ExitOrderRequest> for MarketOrderRequest {
    fn from(exit: &ExitOrderRequest) -> Self {
        Self {
            exchange: exit.exchange.clone(),
            symbol: exit.symbol.clone(),
            instrument_key: exit.instrument_key.clone(),
            side: exit.side,
            quantity: exit.quantity,
            product: exit.product,
        }
    }
}

/// Broker port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The request never reached the broker (DNS, TLS, connect refused).
    #[error("broker connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// The request was sent but no usable answer came back (read timeout,
    /// 5xx, dropped response). The broker may have acted on it.
    #[error("broker outcome unknown: {message}")]
    Indeterminate {
        /// Error details.
        message: String,
    },

    /// Credentials were refused.
    #[error("broker rejected credentials: {message}")]
    Unauthorized {
        /// Error details.
        message: String,
    },

    /// Order rejected by the broker.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason.
        reason: String,
    },

    /// Order id unknown to the broker.
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The missing order id.
        order_id: String,
    },

    /// Rate limited.
    #[error("rate limited by broker")]
    RateLimited,

    /// Response did not have the expected shape.
    #[error("unexpected broker response: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },
}

impl BrokerError {
    /// Whether the request can be sent again without risking a duplicate.
    ///
    /// [`BrokerError::Indeterminate`] is excluded: market orders are not
    /// idempotent and the first one may already be working.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::RateLimited)
    }
}

/// Port for broker trading calls.
#[async_trait]
pub trait BrokerTradingPort: Send + Sync {
    /// Broker this client talks to.
    fn broker(&self) -> Broker;

    /// Submit a market order. Returns the broker order id.
    async fn place_market_order(&self, request: &MarketOrderRequest) -> Result<String, BrokerError>;

    /// Latest broker-reported status string for an order.
    async fn order_status(&self, broker_order_id: &str) -> Result<String, BrokerError>;

    /// Last traded price from the broker's quote API.
    ///
    /// Kite quotes by `exchange:symbol`, Upstox by instrument key; each
    /// client uses what it needs.
    async fn last_price(
        &self,
        exchange: &str,
        symbol: &str,
        instrument_key: &str,
    ) -> Result<Decimal, BrokerError>;
}
