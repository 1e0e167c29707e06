//! Feed errors.

/// Errors that end a feed session.
///
/// Every variant except `MaxReconnectAttemptsExceeded` sends the driver into
/// backoff; none of them stop the process.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Obtaining the session URL failed.
    #[error("feed authorization failed: {0}")]
    Authorization(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server closed the connection or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

/// Errors decoding a single feed message. The message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame shorter than its headers claim.
    #[error("truncated frame: needed {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        /// Offset of the read.
        offset: usize,
        /// Bytes required from the offset.
        needed: usize,
        /// Frame length.
        len: usize,
    },

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}
