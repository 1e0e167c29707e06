//! Order status lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseValueError;

/// Locally tracked order status.
///
/// ```text
/// OPEN ──tick breach──► TRIGGERED ──exit submitted──► CLOSED
///   │                       │
///   └──── reconciliation ───┴──► CLOSED / CANCELLED / REJECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Position is live and its stop is being trailed.
    Open,
    /// Stop breached; an exit order has been queued.
    Triggered,
    /// Position flattened.
    Closed,
    /// Cancelled at the broker.
    Cancelled,
    /// Rejected by the broker.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the engine still owns this order's lifecycle.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Triggered)
    }

    /// Returns true if no further transitions are expected.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Map a broker-reported order status onto a local terminal status.
    ///
    /// Unknown or non-terminal broker states return `None` and leave the
    /// local order untouched.
    #[must_use]
    pub fn from_broker_status(status: &str) -> Option<Self> {
        match status.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" | "FILLED" => Some(Self::Closed),
            "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Store value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Triggered => "TRIGGERED",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "TRIGGERED" => Ok(Self::Triggered),
            "CLOSED" => Ok(Self::Closed),
            "CANCELLED" => Ok(Self::Cancelled),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(ParseValueError::new("order status", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("COMPLETE", Some(OrderStatus::Closed); "zerodha fill")]
    #[test_case("filled", Some(OrderStatus::Closed); "lowercase fill")]
    #[test_case("CANCELLED", Some(OrderStatus::Cancelled); "cancelled")]
    #[test_case("canceled", Some(OrderStatus::Cancelled); "american spelling")]
    #[test_case("REJECTED", Some(OrderStatus::Rejected); "rejected")]
    #[test_case("OPEN", None; "still open")]
    #[test_case("trigger pending", None; "unknown")]
    fn broker_status_mapping(input: &str, expected: Option<OrderStatus>) {
        assert_eq!(OrderStatus::from_broker_status(input), expected);
    }

    #[test]
    fn active_statuses() {
        assert!(OrderStatus::Open.is_active());
        assert!(OrderStatus::Triggered.is_active());
        assert!(OrderStatus::Closed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn status_round_trips_through_store_value() {
        for status in [
            OrderStatus::Open,
            OrderStatus::Triggered,
            OrderStatus::Closed,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn status_serde_uses_screaming_case() {
        let json = serde_json::to_string(&OrderStatus::Triggered).unwrap();
        assert_eq!(json, "\"TRIGGERED\"");
    }
}
