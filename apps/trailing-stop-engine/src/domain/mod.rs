//! Domain Layer - Orders, ticks and the trailing-stop rules.
//!
//! Pure types and decision logic with no I/O. Everything here can be
//! exercised without a runtime, a broker or a database.

/// Order model, status lifecycle and exit requests.
pub mod order;

/// Trailing stop-loss decision function.
pub mod stop_loss;

/// Subscription set shared between intake and the feed transport.
pub mod subscription;

/// Normalized price ticks.
pub mod tick;
