//! Port Interfaces
//!
//! ## Driven Ports (Outbound)
//!
//! - `OrderStore`: durable order table
//! - `BrokerTradingPort`: per-broker order submission and status lookup
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedHandler`: how a broker feed hands ticks and connects to the engine

mod broker_port;
mod feed_handler_port;
mod order_store_port;

pub use broker_port::{BrokerError, BrokerTradingPort, MarketOrderRequest};
pub use feed_handler_port::FeedHandler;
pub use order_store_port::{OrderStore, StoreError};
