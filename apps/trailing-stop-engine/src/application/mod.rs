//! Application Layer - Tick processing and order lifecycle services.
//!
//! Orchestrates the domain rules against the order store and broker
//! trading ports. Nothing here knows about WebSockets, HTTP or SQL.

/// Port interfaces for the order store and broker trading APIs.
pub mod ports;

/// Application services: tick evaluation, exit submission, reconciliation.
pub mod services;

/// Per-broker trading session registry.
pub mod session;
