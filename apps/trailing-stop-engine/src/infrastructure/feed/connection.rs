//! Feed Connection
//!
//! Generic driver shared by every broker feed. It owns the session loop
//! (authorize, connect, resubscribe, reconcile, stream ticks) and the
//! backoff between sessions. Broker differences live behind `FeedProtocol`.
//!
//! # State machine
//!
//! ```text
//! IDLE → CONNECTING → CONNECTED → (DISCONNECTED → BACKOFF → CONNECTING)* → STOPPED
//! ```
//!
//! Stop is a `CancellationToken`; it interrupts authorization, the connect
//! handshake, the read loop and the backoff sleep.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedHandler;
use crate::domain::order::Broker;
use crate::domain::subscription::{SubscriptionManager, SubscriptionPush};
use crate::domain::tick::Tick;
use crate::infrastructure::metrics;

use super::error::{CodecError, FeedError};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};

// =============================================================================
// Protocol Capability
// =============================================================================

/// Broker-specific part of a feed: where to connect, how to decode, how to
/// (re)subscribe.
#[async_trait]
pub trait FeedProtocol: Send + Sync {
    /// Broker served by this feed.
    fn broker(&self) -> Broker;

    /// Resolve the WebSocket URL for a new session.
    ///
    /// May be a remote call; failures are treated as connect failures.
    async fn authorize(&self) -> Result<String, FeedError>;

    /// Decode a data frame into zero or more ticks.
    fn decode(&self, message: &Message) -> Result<Vec<Tick>, CodecError>;

    /// Frames that bring the server's subscription state in line with `push`.
    fn subscription_frames(&self, push: &SubscriptionPush) -> Vec<Message>;
}

// =============================================================================
// State
// =============================================================================

/// Connection state of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedState {
    /// Created, not yet running.
    #[default]
    Idle,
    /// Authorizing or performing the WebSocket handshake.
    Connecting,
    /// Session live.
    Connected,
    /// Session ended.
    Disconnected,
    /// Waiting before the next attempt.
    Backoff,
    /// Stopped; the driver has returned.
    Stopped,
}

/// Control handle for a running feed.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    broker: Broker,
    state: Arc<RwLock<FeedState>>,
    cancel: CancellationToken,
    subscriptions: Arc<SubscriptionManager>,
}

impl FeedHandle {
    /// Broker served by the feed.
    #[must_use]
    pub const fn broker(&self) -> Broker {
        self.broker
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    /// Add instruments to the feed.
    pub fn subscribe<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let changed = self.subscriptions.subscribe(keys);
        metrics::set_subscriptions(self.broker, self.subscriptions.len());
        changed
    }

    /// Remove instruments from the feed.
    pub fn unsubscribe<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let changed = self.subscriptions.unsubscribe(keys);
        metrics::set_subscriptions(self.broker, self.subscriptions.len());
        changed
    }

    /// Stop the feed. Safe to call repeatedly and from any task.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(broker = %self.broker, "Feed stop requested");
        }
        self.cancel.cancel();
    }
}

#[cfg(test)]
impl FeedHandle {
    /// A handle with no driver behind it, pinned to `state`.
    pub(crate) fn detached(broker: Broker, state: FeedState) -> Self {
        Self {
            broker,
            state: Arc::new(RwLock::new(state)),
            cancel: CancellationToken::new(),
            subscriptions: Arc::new(SubscriptionManager::new()),
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Reconnecting feed driver.
pub struct FeedConnection<P, H>
where
    P: FeedProtocol,
    H: FeedHandler,
{
    protocol: P,
    handler: Arc<H>,
    subscriptions: Arc<SubscriptionManager>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    state: Arc<RwLock<FeedState>>,
}

impl<P, H> FeedConnection<P, H>
where
    P: FeedProtocol,
    H: FeedHandler,
{
    /// Create a driver.
    pub fn new(
        protocol: P,
        handler: Arc<H>,
        subscriptions: Arc<SubscriptionManager>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            protocol,
            handler,
            subscriptions,
            reconnect,
            cancel,
            state: Arc::new(RwLock::new(FeedState::Idle)),
        }
    }

    /// Control handle sharing this driver's state and stop signal.
    #[must_use]
    pub fn handle(&self) -> FeedHandle {
        FeedHandle {
            broker: self.protocol.broker(),
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }

    fn set_state(&self, state: FeedState) {
        *self.state.write() = state;
    }

    /// Run sessions until stopped.
    ///
    /// Returns `Ok(())` on stop, or an error once the reconnect policy gives up.
    pub async fn run(self) -> Result<(), FeedError> {
        let broker = self.protocol.broker();
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            self.set_state(FeedState::Connecting);
            let session = self.connect_and_run(&mut policy).await;
            self.subscriptions.detach();
            metrics::set_feed_connected(broker, false);

            let Err(e) = session else {
                break Ok(());
            };

            tracing::warn!(%broker, error = %e, "Feed session ended");
            self.set_state(FeedState::Disconnected);

            let Some(delay) = policy.next_delay() else {
                break Err(FeedError::MaxReconnectAttemptsExceeded);
            };

            self.set_state(FeedState::Backoff);
            metrics::record_reconnect(broker);
            tracing::info!(
                %broker,
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.set_state(FeedState::Stopped);
        tracing::info!(%broker, "Feed stopped");
        result
    }

    /// One session. `Ok(())` means the feed was stopped.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedError> {
        let broker = self.protocol.broker();

        let url = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            url = self.protocol.authorize() => url?,
        };

        tracing::info!(%broker, "Connecting to market data feed");
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(url.as_str()) => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        policy.reset();
        self.set_state(FeedState::Connected);
        metrics::set_feed_connected(broker, true);

        let (snapshot, mut pushes) = self.subscriptions.attach();
        tracing::info!(%broker, instruments = snapshot.len(), "Feed connected");
        if !snapshot.is_empty() {
            for frame in self
                .protocol
                .subscription_frames(&SubscriptionPush::snapshot(snapshot))
            {
                write.send(frame).await?;
            }
        }

        tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            () = self.handler.on_connected(broker) => {}
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(push) = pushes.recv() => {
                    tracing::debug!(
                        %broker,
                        instruments = push.full.len(),
                        removed = push.removed.len(),
                        "Pushing subscription update"
                    );
                    for frame in self.protocol.subscription_frames(&push) {
                        write.send(frame).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!(%broker, "Server sent close frame");
                            return Err(FeedError::ConnectionClosed);
                        }
                        Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                            self.dispatch(broker, &message).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!(%broker, "WebSocket stream ended");
                            return Err(FeedError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, broker: Broker, message: &Message) {
        match self.protocol.decode(message) {
            Ok(ticks) => {
                for tick in ticks {
                    self.handler.on_tick(broker, tick).await;
                }
            }
            Err(e) => {
                metrics::record_decode_error(broker);
                tracing::warn!(%broker, error = %e, "Dropping undecodable feed message");
            }
        }
    }
}
