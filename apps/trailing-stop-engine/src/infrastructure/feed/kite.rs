//! Kite Ticker Feed (Zerodha)
//!
//! # Stream URL
//!
//! `wss://ws.kite.trade?api_key=<key>&access_token=<token>`
//!
//! # Protocol
//!
//! Market data arrives as binary frames:
//!
//! ```text
//! [u16 packet count] ([u16 packet length] [packet])*
//! ```
//!
//! All integers are big-endian. Every packet starts with the instrument
//! token (`u32`) and the last traded price (`i32`, in paise). Full-mode
//! packets (184 bytes) carry five bid and five ask depth entries from
//! offset 64, each `[u32 qty][i32 price][u16 orders][2 bytes padding]`.
//!
//! A one-byte frame is a heartbeat. Text frames carry order postbacks and
//! errors and never contain ticks.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use crate::domain::order::Broker;
use crate::domain::subscription::SubscriptionPush;
use crate::domain::tick::Tick;
use crate::infrastructure::config::KiteCredentials;

use super::connection::FeedProtocol;
use super::error::{CodecError, FeedError};

const FULL_PACKET_LEN: usize = 184;
const DEPTH_OFFSET: usize = 64;
const DEPTH_ENTRY_LEN: usize = 12;
const DEPTH_LEVELS: usize = 5;

const SEGMENT_CDS: u32 = 3;
const SEGMENT_BCD: u32 = 6;

/// Zerodha Kite ticker protocol.
#[derive(Clone)]
pub struct KiteFeed {
    url: String,
}

impl std::fmt::Debug for KiteFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteFeed").field("url", &"[REDACTED]").finish()
    }
}

impl KiteFeed {
    /// Create a feed against `ws_url` (e.g. `wss://ws.kite.trade`).
    #[must_use]
    pub fn new(ws_url: &str, credentials: &KiteCredentials) -> Self {
        Self {
            url: format!(
                "{}?api_key={}&access_token={}",
                ws_url.trim_end_matches('/'),
                credentials.api_key(),
                credentials.access_token()
            ),
        }
    }

    /// Create a feed with a fully formed session URL.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, Deserialize)]
struct TextMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[async_trait]
impl FeedProtocol for KiteFeed {
    fn broker(&self) -> Broker {
        Broker::Zerodha
    }

    async fn authorize(&self) -> Result<String, FeedError> {
        Ok(self.url.clone())
    }

    fn decode(&self, message: &Message) -> Result<Vec<Tick>, CodecError> {
        match message {
            Message::Binary(data) => decode_frame(data),
            Message::Text(text) => {
                let msg: TextMessage = serde_json::from_str(text.as_str())?;
                if msg.kind == "error" {
                    tracing::warn!(error = %msg.data, "Kite ticker error");
                } else {
                    tracing::debug!(kind = %msg.kind, "Ignoring Kite text message");
                }
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn subscription_frames(&self, push: &SubscriptionPush) -> Vec<Message> {
        let mut frames = Vec::with_capacity(3);

        let removed = tokens(&push.removed);
        if !removed.is_empty() {
            frames.push(text_frame(&json!({"a": "unsubscribe", "v": removed})));
        }

        let full = tokens(&push.full);
        if !full.is_empty() {
            frames.push(text_frame(&json!({"a": "subscribe", "v": full})));
            frames.push(text_frame(&json!({"a": "mode", "v": ["full", full]})));
        }

        frames
    }
}

fn text_frame(value: &serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}

fn tokens(keys: &[String]) -> Vec<u32> {
    keys.iter()
        .filter_map(|key| match key.trim().parse::<u32>() {
            Ok(token) => Some(token),
            Err(_) => {
                tracing::warn!(%key, "Skipping non-numeric Kite instrument token");
                None
            }
        })
        .collect()
}

// =============================================================================
// Binary Decoding
// =============================================================================

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, CodecError> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(CodecError::Truncated {
            offset,
            needed: 2,
            len: buf.len(),
        })
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, CodecError> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(CodecError::Truncated {
            offset,
            needed: 4,
            len: buf.len(),
        })
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32, CodecError> {
    read_u32(buf, offset).map(|v| i32::from_be_bytes(v.to_be_bytes()))
}

/// Decode one binary frame into ticks.
fn decode_frame(frame: &[u8]) -> Result<Vec<Tick>, CodecError> {
    if frame.len() < 2 {
        // Heartbeat.
        return Ok(Vec::new());
    }

    let count = usize::from(read_u16(frame, 0)?);
    let mut ticks = Vec::with_capacity(count);
    let mut offset = 2;

    for _ in 0..count {
        let len = usize::from(read_u16(frame, offset)?);
        offset += 2;
        let packet = frame
            .get(offset..offset + len)
            .ok_or(CodecError::Truncated {
                offset,
                needed: len,
                len: frame.len(),
            })?;
        offset += len;
        ticks.push(decode_packet(packet)?);
    }

    Ok(ticks)
}

fn decode_packet(packet: &[u8]) -> Result<Tick, CodecError> {
    if packet.len() < 8 {
        return Err(CodecError::InvalidFormat(format!(
            "packet of {} bytes is too short",
            packet.len()
        )));
    }

    let token = read_u32(packet, 0)?;
    let divisor = Decimal::from(match token & 0xff {
        SEGMENT_CDS => 10_000_000_u32,
        SEGMENT_BCD => 10_000,
        _ => 100,
    });
    let price = |offset: usize| -> Result<Option<Decimal>, CodecError> {
        let raw = read_i32(packet, offset)?;
        Ok((raw > 0).then(|| Decimal::from(raw) / divisor))
    };

    let (best_bid, best_ask) = if packet.len() >= FULL_PACKET_LEN {
        let bid = price(DEPTH_OFFSET + 4)?;
        let ask = price(DEPTH_OFFSET + DEPTH_LEVELS * DEPTH_ENTRY_LEN + 4)?;
        (bid, ask)
    } else {
        (None, None)
    };

    Ok(Tick {
        instrument_key: token.to_string(),
        last_price: price(4)?,
        best_bid,
        best_ask,
    })
}
