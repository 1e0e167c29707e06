//! Broker product classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseValueError;

/// Product type of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    /// Intraday margin (`MIS`).
    #[serde(rename = "MIS")]
    Intraday,
    /// Cash-and-carry delivery (`CNC`).
    #[serde(rename = "CNC")]
    Delivery,
    /// Normal / carry-forward (`NRML`).
    #[serde(rename = "NRML")]
    CarryForward,
}

impl ProductType {
    /// Whether trailing should follow the best bid rather than the LTP.
    ///
    /// Carry-forward positions always trail on the last traded price.
    #[must_use]
    pub const fn prefers_bid_for_trailing(&self) -> bool {
        matches!(self, Self::Intraday | Self::Delivery)
    }

    /// Kite product code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Intraday => "MIS",
            Self::Delivery => "CNC",
            Self::CarryForward => "NRML",
        }
    }

    /// Upstox product code (`I` intraday, `D` delivery).
    ///
    /// Anything that is not delivery is sent as intraday.
    #[must_use]
    pub const fn upstox_code(&self) -> &'static str {
        match self {
            Self::Delivery => "D",
            Self::Intraday | Self::CarryForward => "I",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MIS" | "I" | "INTRADAY" => Ok(Self::Intraday),
            "CNC" | "D" | "DELIVERY" => Ok(Self::Delivery),
            "NRML" | "NORMAL" => Ok(Self::CarryForward),
            _ => Err(ParseValueError::new("product type", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bid_preference() {
        assert!(ProductType::Intraday.prefers_bid_for_trailing());
        assert!(ProductType::Delivery.prefers_bid_for_trailing());
        assert!(!ProductType::CarryForward.prefers_bid_for_trailing());
    }

    #[test]
    fn upstox_codes() {
        assert_eq!(ProductType::Intraday.upstox_code(), "I");
        assert_eq!(ProductType::Delivery.upstox_code(), "D");
        assert_eq!(ProductType::CarryForward.upstox_code(), "I");
    }

    #[test]
    fn parses_broker_codes() {
        assert_eq!("mis".parse::<ProductType>().unwrap(), ProductType::Intraday);
        assert_eq!("D".parse::<ProductType>().unwrap(), ProductType::Delivery);
        assert_eq!("NRML".parse::<ProductType>().unwrap(), ProductType::CarryForward);
        assert!("BO".parse::<ProductType>().is_err());
    }
}
