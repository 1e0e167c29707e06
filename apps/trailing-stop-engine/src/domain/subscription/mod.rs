//! Subscription Management
//!
//! Tracks the working set of instrument keys a broker feed should stream.
//!
//! # Design
//!
//! Feed subscriptions do not survive a reconnect, so the manager is the
//! source of truth and every push to the transport carries the *full* set.
//!
//! - While no transport is attached, `subscribe`/`unsubscribe` only mutate
//!   the set. The next `attach` hands the whole set to the new connection.
//! - While attached, every call that changes the set pushes the full set
//!   over the attached channel. Calls that change nothing push nothing.
//!
//! `attach` snapshots the set and installs the channel under one lock, so a
//! subscribe racing a reconnect is seen exactly once: either in the snapshot
//! or as a push, never both.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use tokio::sync::mpsc;

// =============================================================================
// Types
// =============================================================================

/// Full-set update sent to an attached transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionPush {
    /// Every key that should be streamed after this update.
    pub full: Vec<String>,
    /// Keys dropped by this update.
    pub removed: Vec<String>,
}

impl SubscriptionPush {
    /// Initial push for a fresh connection.
    #[must_use]
    pub const fn snapshot(full: Vec<String>) -> Self {
        Self {
            full,
            removed: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    keys: BTreeSet<String>,
    push_tx: Option<mpsc::UnboundedSender<SubscriptionPush>>,
}

impl Inner {
    fn push(&mut self, removed: Vec<String>) {
        let Some(tx) = &self.push_tx else {
            return;
        };
        let push = SubscriptionPush {
            full: self.keys.iter().cloned().collect(),
            removed,
        };
        if tx.send(push).is_err() {
            // Transport went away without detaching.
            self.push_tx = None;
        }
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Mutex-guarded set of subscribed instrument keys for one broker feed.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    inner: Mutex<Inner>,
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager pre-seeded with keys.
    #[must_use]
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let manager = Self::new();
        manager.inner.lock().keys = keys.into_iter().map(Into::into).collect();
        manager
    }

    /// Add keys to the set. Returns true if the set changed.
    pub fn subscribe<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        let mut changed = false;
        for key in keys {
            changed |= inner.keys.insert(key.into());
        }
        if changed {
            inner.push(Vec::new());
        }
        changed
    }

    /// Remove keys from the set. Returns true if the set changed.
    pub fn unsubscribe<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        for key in keys {
            if let Some(k) = inner.keys.take(key.as_ref()) {
                removed.push(k);
            }
        }
        if removed.is_empty() {
            return false;
        }
        inner.push(removed);
        true
    }

    /// Attach a live transport.
    ///
    /// Returns the current full set and the receiver for subsequent pushes.
    /// A previously attached transport stops receiving pushes.
    pub fn attach(&self) -> (Vec<String>, mpsc::UnboundedReceiver<SubscriptionPush>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.push_tx = Some(tx);
        (inner.keys.iter().cloned().collect(), rx)
    }

    /// Detach the transport; later changes wait for the next `attach`.
    pub fn detach(&self) {
        self.inner.lock().push_tx = None;
    }

    /// Whether a transport is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.lock().push_tx.is_some()
    }

    /// Snapshot of the subscribed keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().keys.iter().cloned().collect()
    }

    /// Number of subscribed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().keys.is_empty()
    }
}
