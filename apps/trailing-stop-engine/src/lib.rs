#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Trailing Stop Engine - Tick Processing and Order Lifecycle
//!
//! Watches open positions at Zerodha (Kite) and Upstox, ratchets a
//! trailing stop-loss on every live tick and flattens a position with a
//! market order once its stop is breached.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `order`: tracked positions, statuses, exit requests
//!   - `tick`: normalized price updates
//!   - `stop_loss`: the trailing-stop decision function
//!   - `subscription`: per-broker instrument set
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: order store, broker trading, feed handler
//!   - `services`: tick processing, exit queue, reconciliation, intake
//!   - `session`: per-broker trading sessions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: reconnecting WebSocket feeds (Kite, Upstox)
//!   - `broker`: REST order clients
//!   - `persistence`: SQLite and in-memory order stores
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Kite ticker ──┐                ┌───────────────┐    ┌─────────────┐
//!               ├─► FeedPipeline ─► TickProcessor ├───►│ Order store │
//! Upstox feed ──┘        │       └───────┬───────┘    └─────────────┘
//!                        │               │ trigger          ▲
//!                reconciliation          ▼                  │
//!                (on connect)     Exit order queue ─► SubmissionWorker ─► Broker REST
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::order::{
    Broker, ExitOrderRequest, NewOrder, Order, OrderId, OrderSide, OrderStatus, ProductType,
};
pub use domain::stop_loss::{StopDecision, evaluate};
pub use domain::subscription::{SubscriptionManager, SubscriptionPush};
pub use domain::tick::Tick;

// Ports and services
pub use application::ports::{
    BrokerError, BrokerTradingPort, FeedHandler, MarketOrderRequest, OrderStore, StoreError,
};
pub use application::services::{
    ExitOrderQueue, FeedPipeline, FeedSubscriptions, OrderIntake, PriceRefresher,
    ReconciliationJob, ReconciliationReport, RefreshReport, SubmissionConfig, SubmissionStats,
    SubmissionWorker, TickOutcome, TickProcessor,
};
pub use application::session::BrokerSessions;

// Infrastructure config
pub use infrastructure::config::{ConfigError, EngineConfig};

// Adapters
pub use infrastructure::broker::{KiteTradingClient, UpstoxTradingClient};
pub use infrastructure::feed::{
    FeedConnection, FeedHandle, FeedProtocol, FeedState, KiteFeed, ReconnectConfig, UpstoxFeed,
};
pub use infrastructure::persistence::{InMemoryOrderStore, SqliteOrderStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
