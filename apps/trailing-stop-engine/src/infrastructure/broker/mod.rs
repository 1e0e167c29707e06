//! Broker REST Adapters
//!
//! Implementations of [`BrokerTradingPort`](crate::application::ports::BrokerTradingPort)
//! for Kite Connect and Upstox. Each call is a single attempt; retry policy
//! lives with the exit submission worker.

mod http;
pub mod kite;
pub mod upstox;

pub use http::build_http_client;
pub use kite::KiteTradingClient;
pub(crate) use upstox::UpstoxEnvelope;
pub use upstox::UpstoxTradingClient;
