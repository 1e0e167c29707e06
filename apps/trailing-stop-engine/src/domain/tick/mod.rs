//! Normalized price observation.
//!
//! Both broker feeds decode into this shape before evaluation. Ticks are
//! never persisted; arrival order is the only ordering they carry.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price update for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Feed instrument key.
    pub instrument_key: String,
    /// Last traded price, if the packet carried one.
    pub last_price: Option<Decimal>,
    /// Best resting bid.
    pub best_bid: Option<Decimal>,
    /// Best resting ask. Decoded but not used for trailing.
    pub best_ask: Option<Decimal>,
}

impl Tick {
    /// Tick carrying only a last traded price.
    #[must_use]
    pub fn ltp(instrument_key: impl Into<String>, last_price: Decimal) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            last_price: Some(last_price),
            best_bid: None,
            best_ask: None,
        }
    }

    /// Attach a best bid.
    #[must_use]
    pub const fn with_bid(mut self, bid: Decimal) -> Self {
        self.best_bid = Some(bid);
        self
    }

    /// Attach a best ask.
    #[must_use]
    pub const fn with_ask(mut self, ask: Decimal) -> Self {
        self.best_ask = Some(ask);
        self
    }
}
