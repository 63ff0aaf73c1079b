//! Event routing for many sessions sharing one physical connection.
//!
//! ```text
//!                      ┌──────────── RouteTable ─────────────┐
//! transport ─ "op" ──► │ "op" ─► session A ─► subscriber 1   │ ──► copy
//!   (one listener      │                   └► subscriber 2   │ ──► copy
//!    per event)        │       └► session B ─► subscriber 3  │ ──► copy
//!                      └─────────────────────────────────────┘
//! ```
//!
//! Each subscriber gets its own deep copy of the payload, in registration
//! order. Events for a session nobody subscribed to are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{InboundEvent, RoutedEvent};
use crate::transport::Transport;

/// Receiving end of a route.
pub type Subscriber = mpsc::UnboundedSender<RoutedEvent>;

/// session id → subscriber id → subscriber, in registration order.
type SessionRoutes = HashMap<String, IndexMap<String, Subscriber>>;

#[derive(Default)]
struct RouteTable {
    /// Events with an installed physical listener. Never shrinks.
    listening: HashSet<String>,
    /// event → session routes
    routes: HashMap<String, SessionRoutes>,
}

/// Snapshot of registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Events with a physical listener.
    pub events: usize,
    /// Registered (event, session, subscriber) triples.
    pub subscribers: usize,
    /// Copies handed to subscribers.
    pub delivered: u64,
    /// Copies whose subscriber had gone away.
    pub dropped: u64,
}

#[derive(Default)]
struct AtomicRegistryStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Three-level routing table over a shared [`Transport`].
pub struct ConnectionRegistry {
    transport: Arc<dyn Transport>,
    table: Arc<RwLock<RouteTable>>,
    stats: Arc<AtomicRegistryStats>,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            table: Arc::new(RwLock::new(RouteTable::default())),
            stats: Arc::new(AtomicRegistryStats::default()),
        }
    }

    /// Route `event` for `session_id` to `subscriber`.
    ///
    /// The first registration of an event installs its physical listener.
    /// Registering the same triple again replaces the previous subscriber
    /// and keeps its delivery position.
    pub async fn register(
        &self,
        event: &str,
        session_id: &str,
        subscriber_id: &str,
        subscriber: Subscriber,
    ) {
        let mut table = self.table.write().await;

        if table.listening.insert(event.to_owned()) {
            let rx = self.transport.listen(event);
            self.spawn_listener(event.to_owned(), rx);
            log::debug!("Installed transport listener for '{event}'");
        }

        let replaced = table
            .routes
            .entry(event.to_owned())
            .or_default()
            .entry(session_id.to_owned())
            .or_default()
            .insert(subscriber_id.to_owned(), subscriber);

        if replaced.is_some() {
            log::debug!("Replaced subscriber {subscriber_id} for '{event}' on {session_id}");
        }
    }

    /// Remove one route. Returns whether it existed.
    ///
    /// The physical listener stays installed.
    pub async fn unregister(&self, event: &str, session_id: &str, subscriber_id: &str) -> bool {
        let mut table = self.table.write().await;
        let Some(sessions) = table.routes.get_mut(event) else {
            return false;
        };
        let Some(subscribers) = sessions.get_mut(session_id) else {
            return false;
        };

        let removed = subscribers.shift_remove(subscriber_id).is_some();
        if subscribers.is_empty() {
            sessions.remove(session_id);
        }
        if sessions.is_empty() {
            table.routes.remove(event);
        }
        removed
    }

    /// Subscriber ids for `(event, session_id)` in delivery order.
    pub async fn subscribers(&self, event: &str, session_id: &str) -> Vec<String> {
        let table = self.table.read().await;
        table
            .routes
            .get(event)
            .and_then(|sessions| sessions.get(session_id))
            .map(|subscribers| subscribers.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> RegistryStats {
        let table = self.table.read().await;
        RegistryStats {
            events: table.listening.len(),
            subscribers: table
                .routes
                .values()
                .flat_map(|sessions| sessions.values())
                .map(IndexMap::len)
                .sum(),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    fn spawn_listener(&self, event: String, mut rx: mpsc::UnboundedReceiver<InboundEvent>) {
        let table = self.table.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                deliver(&table, &stats, &event, inbound).await;
            }
            log::debug!("Transport listener for '{event}' closed");
        });
    }
}

async fn deliver(
    table: &RwLock<RouteTable>,
    stats: &AtomicRegistryStats,
    event: &str,
    inbound: InboundEvent,
) {
    // Clone the senders so no lock is held while delivering
    let subscribers: Vec<(String, Subscriber)> = {
        let table = table.read().await;
        match table
            .routes
            .get(event)
            .and_then(|sessions| sessions.get(&inbound.session_id))
        {
            Some(subscribers) => subscribers
                .iter()
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect(),
            None => return,
        }
    };

    for (subscriber_id, subscriber) in subscribers {
        let copy = RoutedEvent {
            event: event.to_owned(),
            session_id: inbound.session_id.clone(),
            payload: inbound.payload.clone(),
        };
        if subscriber.send(copy).is_ok() {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "Subscriber {subscriber_id} for '{event}' on {} is gone",
                inbound.session_id
            );
        }
    }
}
