//! Broker Market Data Feeds
//!
//! - `FeedConnection`: generic reconnecting driver
//! - `FeedProtocol`: per-broker capability (authorize, decode, subscribe)
//! - `KiteFeed`: Zerodha binary ticker
//! - `UpstoxFeed`: Upstox authorize-then-connect JSON feed

pub mod connection;
pub mod error;
pub mod kite;
pub mod reconnect;
pub mod upstox;

pub use connection::{FeedConnection, FeedHandle, FeedProtocol, FeedState};
pub use error::{CodecError, FeedError};
pub use kite::KiteFeed;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use upstox::UpstoxFeed;
