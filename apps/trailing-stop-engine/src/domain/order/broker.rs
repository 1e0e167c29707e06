//! Supported brokers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseValueError;

/// Broker an order was placed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Broker {
    /// Zerodha (Kite Connect).
    Zerodha,
    /// Upstox.
    Upstox,
}

impl Broker {
    /// All supported brokers.
    pub const ALL: [Self; 2] = [Self::Zerodha, Self::Upstox];

    /// Lowercase identifier used in the store, logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zerodha => "zerodha",
            Self::Upstox => "upstox",
        }
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Broker {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zerodha" | "kite" => Ok(Self::Zerodha),
            "upstox" => Ok(Self::Upstox),
            _ => Err(ParseValueError::new("broker", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_parse_and_display() {
        assert_eq!("Zerodha".parse::<Broker>().unwrap(), Broker::Zerodha);
        assert_eq!("upstox".parse::<Broker>().unwrap(), Broker::Upstox);
        assert_eq!(Broker::Upstox.to_string(), "upstox");
        assert!("fyers".parse::<Broker>().is_err());
    }
}
