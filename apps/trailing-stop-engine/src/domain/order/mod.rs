//! Order Model
//!
//! The tracked position and the messages derived from it. An `Order` is
//! created `OPEN` by the intake path, its stop is ratcheted by the tick
//! processor and its status is finalized by the submission worker or the
//! reconciliation job. Orders are never deleted.

mod broker;
mod product;
mod side;
mod status;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use broker::Broker;
pub use product::ProductType;
pub use side::OrderSide;
pub use status::OrderStatus;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

// =============================================================================
// Errors
// =============================================================================

/// A stored or configured value could not be parsed into a domain enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

impl ParseValueError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Store-assigned internal order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub i64);

impl OrderId {
    /// Raw id value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Stop Math
// =============================================================================

/// Stop price `percent` below `price`.
#[must_use]
pub fn stop_below(price: Decimal, stoploss_percent: Decimal) -> Decimal {
    price * (Decimal::ONE - stoploss_percent / HUNDRED)
}

/// Percentage move from `entry` to `price`; zero when there is no entry price.
#[must_use]
pub fn profit_percent(entry: Decimal, price: Decimal) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    (price - entry) / entry * HUNDRED
}

// =============================================================================
// Orders
// =============================================================================

/// An order as submitted by the order-placement flow, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Broker-assigned id of the entry order, used for reconciliation.
    pub broker_order_id: Option<String>,
    /// Broker the position lives at.
    pub broker: Broker,
    /// Feed instrument key (Kite instrument token or Upstox instrument key).
    pub instrument_key: String,
    /// Trading symbol.
    pub symbol: String,
    /// Exchange (e.g. `NSE`).
    pub exchange: String,
    /// Position size.
    pub quantity: u32,
    /// Entry side.
    pub side: OrderSide,
    /// Product type.
    pub product: ProductType,
    /// Entry price.
    pub entry_price: Decimal,
    /// Stop-loss distance in percent, fixed at creation.
    pub stoploss_percent: Decimal,
}

impl NewOrder {
    /// Stop price the order starts with.
    #[must_use]
    pub fn initial_stop(&self) -> Decimal {
        stop_below(self.entry_price, self.stoploss_percent)
    }
}

/// A tracked order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Internal id.
    pub id: OrderId,
    /// Broker-assigned id of the entry order.
    pub broker_order_id: Option<String>,
    /// Broker the position lives at.
    pub broker: Broker,
    /// Feed instrument key.
    pub instrument_key: String,
    /// Trading symbol.
    pub symbol: String,
    /// Exchange.
    pub exchange: String,
    /// Position size.
    pub quantity: u32,
    /// Entry side.
    pub side: OrderSide,
    /// Product type.
    pub product: ProductType,
    /// Entry price.
    pub entry_price: Decimal,
    /// Stop-loss distance in percent.
    pub stoploss_percent: Decimal,
    /// Current trailing stop. Non-decreasing while the order is open.
    pub current_stop_price: Option<Decimal>,
    /// Unrealized profit in percent at the last trail.
    pub potential_profit: Option<Decimal>,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a freshly stored order from its intake form.
    #[must_use]
    pub fn from_new(id: OrderId, new: NewOrder, now: DateTime<Utc>) -> Self {
        let stop = new.initial_stop();
        Self {
            id,
            broker_order_id: new.broker_order_id,
            broker: new.broker,
            instrument_key: new.instrument_key,
            symbol: new.symbol,
            exchange: new.exchange,
            quantity: new.quantity,
            side: new.side,
            product: new.product,
            entry_price: new.entry_price,
            stoploss_percent: new.stoploss_percent,
            current_stop_price: Some(stop),
            potential_profit: Some(Decimal::ZERO),
            status: OrderStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective stop price, falling back to the initial stop when none is stored.
    #[must_use]
    pub fn stop_price(&self) -> Decimal {
        self.current_stop_price
            .unwrap_or_else(|| stop_below(self.entry_price, self.stoploss_percent))
    }

    /// Build the market order that flattens this position.
    #[must_use]
    pub fn exit_request(&self) -> ExitOrderRequest {
        ExitOrderRequest {
            order_id: self.id,
            broker: self.broker,
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            side: self.side.opposite(),
            quantity: self.quantity,
            product: self.product,
            instrument_key: self.instrument_key.clone(),
        }
    }
}

/// Exit order queued for the submission worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOrderRequest {
    /// Order being flattened.
    pub order_id: OrderId,
    /// Broker to submit to.
    pub broker: Broker,
    /// Exchange.
    pub exchange: String,
    /// Trading symbol.
    pub symbol: String,
    /// Exit side (opposite of the entry side).
    pub side: OrderSide,
    /// Quantity to close.
    pub quantity: u32,
    /// Product type of the position.
    pub product: ProductType,
    /// Feed instrument key (Upstox orders are keyed by it).
    pub instrument_key: String,
}
