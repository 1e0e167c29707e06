//! Broker Sessions
//!
//! Explicit registry of authenticated broker clients. A session is opened
//! once credentials are available and closed on logout or shutdown; the
//! worker and reconciliation job resolve clients through it instead of
//! reading process-wide token state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::BrokerTradingPort;
use crate::domain::order::Broker;

/// Per-broker trading client registry.
#[derive(Default)]
pub struct BrokerSessions {
    clients: RwLock<HashMap<Broker, Arc<dyn BrokerTradingPort>>>,
}

impl std::fmt::Debug for BrokerSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSessions")
            .field("brokers", &self.brokers())
            .finish()
    }
}

impl BrokerSessions {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) the session for the client's broker.
    pub fn open(&self, client: Arc<dyn BrokerTradingPort>) {
        let broker = client.broker();
        if self.clients.write().insert(broker, client).is_some() {
            tracing::info!(%broker, "Broker session replaced");
        } else {
            tracing::info!(%broker, "Broker session opened");
        }
    }

    /// Close a broker's session. Returns true if one was open.
    pub fn close(&self, broker: Broker) -> bool {
        let closed = self.clients.write().remove(&broker).is_some();
        if closed {
            tracing::info!(%broker, "Broker session closed");
        }
        closed
    }

    /// Close every session.
    pub fn close_all(&self) {
        let mut clients = self.clients.write();
        for broker in clients.keys() {
            tracing::info!(%broker, "Broker session closed");
        }
        clients.clear();
    }

    /// Client for a broker, if a session is open.
    #[must_use]
    pub fn client(&self, broker: Broker) -> Option<Arc<dyn BrokerTradingPort>> {
        self.clients.read().get(&broker).cloned()
    }

    /// Brokers with an open session.
    #[must_use]
    pub fn brokers(&self) -> Vec<Broker> {
        let mut brokers: Vec<_> = self.clients.read().keys().copied().collect();
        brokers.sort();
        brokers
    }
}
