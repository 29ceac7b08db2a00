//! In-memory message store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::protocol::QoS;
use crate::registry::{Delivery, SessionHandle};
use crate::topic;

use super::{MessageStore, MsgRef};

#[derive(Debug)]
struct StoredMessage {
    routing_key: Arc<str>,
    payload: Bytes,
    msg_id: Option<(Arc<str>, u64)>,
    ref_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct DeferredMessage {
    qos: QoS,
    msg_ref: MsgRef,
}

/// Reference-counted in-memory message store.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    next_ref: AtomicU64,
    retained: DashMap<Arc<str>, Bytes>,
    messages: DashMap<MsgRef, StoredMessage>,
    by_msg_id: DashMap<(Arc<str>, u64), MsgRef>,
    deferred: DashMap<Arc<str>, Vec<DeferredMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained messages currently held.
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// Number of live (referenced) stored messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Number of messages deferred for `client_id`.
    pub fn deferred_count(&self, client_id: &str) -> usize {
        self.deferred.get(client_id).map_or(0, |q| q.len())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn retain(&self, sender_client: &str, routing_key: &str, payload: &Bytes) {
        if payload.is_empty() {
            debug!(client = sender_client, key = routing_key, "clearing retained message");
            self.retained.remove(routing_key);
        } else {
            self.retained
                .insert(Arc::from(routing_key), payload.clone());
        }
    }

    async fn store(
        &self,
        sender_client: &str,
        msg_id: Option<u64>,
        routing_key: &str,
        payload: &Bytes,
    ) -> MsgRef {
        if let Some(id) = msg_id {
            let key = (Arc::<str>::from(sender_client), id);
            if let Some(existing) = self.by_msg_id.get(&key) {
                let msg_ref = *existing;
                if let Some(mut message) = self.messages.get_mut(&msg_ref) {
                    message.ref_count += 1;
                    return msg_ref;
                }
            }
        }

        let msg_ref = self.next_ref.fetch_add(1, Ordering::Relaxed) + 1;
        let id_key = msg_id.map(|id| (Arc::<str>::from(sender_client), id));
        if let Some(key) = &id_key {
            self.by_msg_id.insert(key.clone(), msg_ref);
        }
        self.messages.insert(
            msg_ref,
            StoredMessage {
                routing_key: Arc::from(routing_key),
                payload: payload.clone(),
                msg_id: id_key,
                ref_count: 1,
            },
        );
        msg_ref
    }

    async fn defer_deliver(&self, client_id: &str, qos: QoS, msg_ref: MsgRef) {
        self.deferred
            .entry(Arc::from(client_id))
            .or_default()
            .push(DeferredMessage { qos, msg_ref });
    }

    async fn deref(&self, msg_ref: MsgRef) {
        let mut released = None;
        if let Some(mut message) = self.messages.get_mut(&msg_ref) {
            message.ref_count -= 1;
            if message.ref_count == 0 {
                released = message.msg_id.clone();
            }
        }
        if let Some(message) = self.messages.remove_if(&msg_ref, |_, m| m.ref_count == 0) {
            debug!(msg_ref = message.0, "released stored message");
        }
        if let Some(id_key) = released {
            self.by_msg_id.remove(&id_key);
        }
    }

    async fn deliver_retained(&self, session: &SessionHandle, filter: &str, qos: QoS) {
        for entry in self.retained.iter() {
            if topic::filter_matches_key(filter, entry.key()) {
                session.deliver(Delivery {
                    routing_key: entry.key().clone(),
                    payload: entry.value().clone(),
                    qos,
                    dup: false,
                    retain: true,
                    msg_ref: None,
                });
            }
        }
    }

    async fn deliver_from_store(&self, client_id: &str, session: &SessionHandle) {
        let Some((_, queue)) = self.deferred.remove(client_id) else {
            return;
        };
        debug!(client = client_id, count = queue.len(), "replaying deferred messages");
        for deferred in queue {
            let Some(message) = self.messages.get(&deferred.msg_ref) else {
                continue;
            };
            let delivered = session.deliver(Delivery {
                routing_key: message.routing_key.clone(),
                payload: message.payload.clone(),
                qos: deferred.qos,
                dup: false,
                retain: false,
                msg_ref: Some(deferred.msg_ref),
            });
            drop(message);
            if !delivered {
                // session died mid-replay; keep the reference queued
                self.deferred
                    .entry(Arc::from(client_id))
                    .or_default()
                    .push(deferred);
            }
        }
    }

    async fn clean_session(&self, client_id: &str) {
        if let Some((_, queue)) = self.deferred.remove(client_id) {
            for deferred in queue {
                self.deref(deferred.msg_ref).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionEvent;

    #[tokio::test]
    async fn test_retain_set_and_clear() {
        let store = MemoryMessageStore::new();
        store
            .retain("c1", "status", &Bytes::from_static(b"on"))
            .await;
        assert_eq!(store.retained_count(), 1);

        store.retain("c1", "status", &Bytes::new()).await;
        assert_eq!(store.retained_count(), 0);
    }

    #[tokio::test]
    async fn test_store_dedupes_by_msg_id() {
        let store = MemoryMessageStore::new();
        let payload = Bytes::from_static(b"x");

        let first = store.store("c1", Some(7), "a/b", &payload).await;
        let second = store.store("c1", Some(7), "a/b", &payload).await;
        assert_eq!(first, second);
        assert_eq!(store.message_count(), 1);

        // different sender, same msg_id: distinct message
        let third = store.store("c2", Some(7), "a/b", &payload).await;
        assert_ne!(first, third);

        store.deref(first).await;
        assert_eq!(store.message_count(), 2);
        store.deref(first).await;
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_defer_and_replay() {
        let store = MemoryMessageStore::new();
        let msg_ref = store
            .store("c1", None, "a/b", &Bytes::from_static(b"x"))
            .await;
        store.defer_deliver("c2", QoS::AtLeastOnce, msg_ref).await;
        assert_eq!(store.deferred_count("c2"), 1);

        let (session, mut rx) = SessionHandle::channel(4);
        store.deliver_from_store("c2", &session).await;
        assert_eq!(store.deferred_count("c2"), 0);

        match rx.recv().await {
            Some(SessionEvent::Deliver(delivery)) => {
                assert_eq!(delivery.routing_key.as_ref(), "a/b");
                assert_eq!(delivery.qos, QoS::AtLeastOnce);
                assert_eq!(delivery.msg_ref, Some(msg_ref));
            }
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clean_session_releases_references() {
        let store = MemoryMessageStore::new();
        let msg_ref = store
            .store("c1", None, "a/b", &Bytes::from_static(b"x"))
            .await;
        store.defer_deliver("c2", QoS::AtLeastOnce, msg_ref).await;

        store.clean_session("c2").await;
        assert_eq!(store.deferred_count("c2"), 0);
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_deliver_retained_matches_filter() {
        let store = MemoryMessageStore::new();
        store
            .retain("c1", "sensors/1/temp", &Bytes::from_static(b"21"))
            .await;
        store
            .retain("c1", "sensors/2/hum", &Bytes::from_static(b"40"))
            .await;

        let (session, mut rx) = SessionHandle::channel(4);
        store
            .deliver_retained(&session, "sensors/+/temp", QoS::AtMostOnce)
            .await;
        drop(session);

        let mut keys = Vec::new();
        while let Some(SessionEvent::Deliver(delivery)) = rx.recv().await {
            assert!(delivery.retain);
            keys.push(delivery.routing_key.to_string());
        }
        assert_eq!(keys, vec!["sensors/1/temp"]);
    }
}
