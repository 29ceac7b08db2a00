//! Node-local subscription state.
//!
//! The subscriber bag maps a topic filter to the clients subscribed to it on
//! this node. It is local content: each cluster member keeps only its own
//! subscribers, and the replicated topic table (see `store`) records which
//! nodes hold any at all. Upserts keep at most one entry per
//! `(filter, client)`; a re-subscribe only refreshes the QoS.

mod clients;

pub use clients::{ClientRegistry, Delivery, SessionEvent, SessionHandle};

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::protocol::QoS;

/// A subscriber entry for one filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub client_id: Arc<str>,
    pub qos: QoS,
}

/// The node-local subscriber bag, keyed by filter.
#[derive(Debug, Default)]
pub struct SubscriberTable {
    inner: RwLock<AHashMap<Arc<str>, Vec<Subscriber>>>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a subscription. Returns true when the client was not
    /// already subscribed to this filter.
    pub fn upsert(&self, filter: &Arc<str>, client_id: &Arc<str>, qos: QoS) -> bool {
        let mut table = self.inner.write();
        let subscribers = table.entry(filter.clone()).or_default();
        for existing in subscribers.iter_mut() {
            if existing.client_id == *client_id {
                existing.qos = qos;
                return false;
            }
        }
        subscribers.push(Subscriber {
            client_id: client_id.clone(),
            qos,
        });
        true
    }

    /// Remove the `(filter, client)` entry. Returns true when it existed.
    pub fn remove(&self, filter: &str, client_id: &str) -> bool {
        let mut table = self.inner.write();
        let Some(subscribers) = table.get_mut(filter) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.client_id.as_ref() != client_id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            table.remove(filter);
        }
        removed
    }

    /// Snapshot of the subscribers for `filter`.
    pub fn get(&self, filter: &str) -> Vec<Subscriber> {
        self.inner.read().get(filter).cloned().unwrap_or_default()
    }

    pub fn has_subscribers(&self, filter: &str) -> bool {
        self.inner.read().get(filter).is_some_and(|s| !s.is_empty())
    }

    /// All `(filter, qos)` pairs held by `client_id` on this node.
    pub fn subscriptions_for(&self, client_id: &str) -> Vec<(Arc<str>, QoS)> {
        let table = self.inner.read();
        let mut out = Vec::new();
        for (filter, subscribers) in table.iter() {
            for sub in subscribers {
                if sub.client_id.as_ref() == client_id {
                    out.push((filter.clone(), sub.qos));
                }
            }
        }
        out
    }

    /// Filters the client is subscribed to; used by session cleanup.
    pub fn filters_for(&self, client_id: &str) -> Vec<Arc<str>> {
        self.subscriptions_for(client_id)
            .into_iter()
            .map(|(filter, _)| filter)
            .collect()
    }

    /// Drop every entry. Pairs with the replicated-store reset.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
