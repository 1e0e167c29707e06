//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broker REST clients (Kite Connect, Upstox).
pub mod broker;

/// Configuration loaded from the environment.
pub mod config;

/// Market data feed connections (Kite ticker, Upstox feed).
pub mod feed;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Order store adapters (SQLite, in-memory).
pub mod persistence;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
