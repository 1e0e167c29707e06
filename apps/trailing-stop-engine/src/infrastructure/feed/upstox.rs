//! Upstox Market Data Feed
//!
//! # Session
//!
//! Each session starts with `GET /v2/feed/market-data-feed/authorize`
//! (bearer token), which returns a single-use `authorizedRedirectUri` to
//! connect to. A failure here is a connect failure and goes to backoff.
//!
//! # Protocol
//!
//! Feed messages are JSON keyed by instrument key:
//!
//! ```json
//! {"feeds": {"NSE_EQ|INE002A01018": {"ff": {"marketFF": {
//!     "ltpc": {"ltp": 2500.5},
//!     "marketLevel": {"bidAskQuote": [{"bp": 2500.4, "ap": 2500.6}]}}}}}}
//! ```
//!
//! LTPC-mode entries carry `{"ltpc": {...}}` directly. Subscription
//! requests are sent as binary JSON frames.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use crate::domain::order::Broker;
use crate::domain::subscription::SubscriptionPush;
use crate::domain::tick::Tick;
use crate::infrastructure::broker::UpstoxEnvelope;
use crate::infrastructure::config::UpstoxCredentials;

use super::connection::FeedProtocol;
use super::error::{CodecError, FeedError};

const AUTHORIZE_PATH: &str = "/v2/feed/market-data-feed/authorize";

/// Upstox market data feed protocol.
#[derive(Clone)]
pub struct UpstoxFeed {
    client: Client,
    api_url: String,
    credentials: UpstoxCredentials,
}

impl std::fmt::Debug for UpstoxFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstoxFeed")
            .field("api_url", &self.api_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl UpstoxFeed {
    /// Create a feed authorizing against `api_url` (e.g. `https://api.upstox.com`).
    #[must_use]
    pub fn new(client: Client, api_url: &str, credentials: UpstoxCredentials) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeData {
    authorized_redirect_uri: String,
}

#[async_trait]
impl FeedProtocol for UpstoxFeed {
    fn broker(&self) -> Broker {
        Broker::Upstox
    }

    async fn authorize(&self) -> Result<String, FeedError> {
        let response = self
            .client
            .get(format!("{}{AUTHORIZE_PATH}", self.api_url))
            .bearer_auth(self.credentials.access_token())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FeedError::Authorization(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Authorization(e.to_string()))?;
        if !status.is_success() {
            return Err(FeedError::Authorization(format!("HTTP {status}: {body}")));
        }

        let envelope: UpstoxEnvelope<AuthorizeData> = serde_json::from_str(&body)
            .map_err(|e| FeedError::Authorization(format!("unexpected response: {e}")))?;
        envelope
            .into_data()
            .map(|d| d.authorized_redirect_uri)
            .map_err(|e| FeedError::Authorization(e.to_string()))
    }

    fn decode(&self, message: &Message) -> Result<Vec<Tick>, CodecError> {
        match message {
            Message::Text(text) => decode_feed(text.as_bytes()),
            Message::Binary(data) => decode_feed(data),
            _ => Ok(Vec::new()),
        }
    }

    fn subscription_frames(&self, push: &SubscriptionPush) -> Vec<Message> {
        let mut frames = Vec::with_capacity(2);
        if !push.removed.is_empty() {
            frames.push(request_frame("unsub", &push.removed));
        }
        if !push.full.is_empty() {
            frames.push(request_frame("sub", &push.full));
        }
        frames
    }
}

fn request_frame(method: &str, keys: &[String]) -> Message {
    let request = json!({
        "guid": uuid::Uuid::new_v4().simple().to_string(),
        "method": method,
        "data": {
            "mode": "full",
            "instrumentKeys": keys,
        },
    });
    Message::Binary(request.to_string().into_bytes().into())
}

// =============================================================================
// Feed Decoding
// =============================================================================

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    feeds: BTreeMap<String, FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    ltpc: Option<Ltpc>,
    ff: Option<FullFeed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullFeed {
    #[serde(rename = "marketFF")]
    market_ff: Option<MarketFullFeed>,
    #[serde(rename = "indexFF")]
    index_ff: Option<IndexFullFeed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketFullFeed {
    ltpc: Option<Ltpc>,
    market_level: Option<MarketLevel>,
}

#[derive(Debug, Deserialize)]
struct IndexFullFeed {
    ltpc: Option<Ltpc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketLevel {
    #[serde(default)]
    bid_ask_quote: Vec<BidAskQuote>,
}

#[derive(Debug, Deserialize)]
struct BidAskQuote {
    bp: Option<Decimal>,
    ap: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct Ltpc {
    ltp: Option<Decimal>,
}

/// Upstox sends 0 for an empty book side or an untraded instrument.
fn price(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| *v > Decimal::ZERO)
}

fn decode_feed(payload: &[u8]) -> Result<Vec<Tick>, CodecError> {
    let response: FeedResponse = serde_json::from_slice(payload)?;

    Ok(response
        .feeds
        .into_iter()
        .map(|(instrument_key, entry)| {
            let (ltpc, top) = match entry.ff {
                Some(FullFeed {
                    market_ff: Some(market),
                    ..
                }) => (
                    market.ltpc,
                    market
                        .market_level
                        .and_then(|l| l.bid_ask_quote.into_iter().next()),
                ),
                Some(FullFeed {
                    index_ff: Some(index),
                    ..
                }) => (index.ltpc, None),
                _ => (entry.ltpc, None),
            };

            Tick {
                instrument_key,
                last_price: price(ltpc.and_then(|l| l.ltp)),
                best_bid: price(top.as_ref().and_then(|q| q.bp)),
                best_ask: price(top.as_ref().and_then(|q| q.ap)),
            }
        })
        .collect())
}
