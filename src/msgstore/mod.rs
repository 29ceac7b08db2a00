//! Durable message store contract.
//!
//! The router leans on an external store for everything QoS > 0 and for
//! retained messages: reference-counted message persistence, deferred
//! delivery queues for offline clients, and session purges. The trait is the
//! seam; [`MemoryMessageStore`] is the in-process engine used standalone and
//! in tests, the same way the broker ships a default storage backend behind
//! its persistence trait.

mod memory;

pub use memory::MemoryMessageStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::protocol::QoS;
use crate::registry::SessionHandle;

/// Reference to a stored message. Dropped via [`MessageStore::deref`] once
/// the last holder lets go.
pub type MsgRef = u64;

/// Contract between the router and the durable message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Apply a retain action for `routing_key`. An empty payload clears any
    /// retained message.
    async fn retain(&self, sender_client: &str, routing_key: &str, payload: &Bytes);

    /// Persist a message and hand back a reference. Calls carrying the same
    /// `(sender_client, msg_id)` return the existing reference with its
    /// count bumped instead of storing a duplicate.
    async fn store(
        &self,
        sender_client: &str,
        msg_id: Option<u64>,
        routing_key: &str,
        payload: &Bytes,
    ) -> MsgRef;

    /// Queue `msg_ref` for `client_id`, to be replayed when it reconnects.
    async fn defer_deliver(&self, client_id: &str, qos: QoS, msg_ref: MsgRef);

    /// Release one reference to a stored message.
    async fn deref(&self, msg_ref: MsgRef);

    /// Deliver retained messages matching `filter` to a fresh subscriber.
    async fn deliver_retained(&self, session: &SessionHandle, filter: &str, qos: QoS);

    /// Replay `client_id`'s deferred messages to its new session.
    async fn deliver_from_store(&self, client_id: &str, session: &SessionHandle);

    /// Purge everything held for `client_id`.
    async fn clean_session(&self, client_id: &str);
}
