//! Node-local client bindings.
//!
//! Maps client identifiers to the message channel of their connection
//! process. Bindings are never replicated; cluster-wide uniqueness of a
//! client id is enforced procedurally by the takeover protocol in `router`.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::msgstore::MsgRef;
use crate::protocol::QoS;

/// A message handed to a client's connection process.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub routing_key: Arc<str>,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
    /// Store reference for QoS > 0 deliveries; released on acknowledgement.
    pub msg_ref: Option<MsgRef>,
}

/// Commands the registry sends to a connection process.
#[derive(Debug)]
pub enum SessionEvent {
    Deliver(Delivery),
    /// Asked to go away, typically because a takeover is in progress.
    Disconnect,
}

/// Handle to a connection process: the registry's side of its mailbox.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Create a handle together with the receiving end the connection
    /// process consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Hand off a message. Returns false when the mailbox is full or the
    /// process is gone; callers decide whether that is a drop or a defer.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.tx.try_send(SessionEvent::Deliver(delivery)).is_ok()
    }

    /// Instruct the connection process to disconnect.
    pub fn disconnect(&self) -> bool {
        self.tx.try_send(SessionEvent::Disconnect).is_ok()
    }

    /// True once the connection process has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// The node-local `client_id -> session` registry.
///
/// Lookups lazily prune bindings whose session channel has closed, which is
/// how a crashed connection process releases its name without a coordinated
/// exit path.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    bindings: DashMap<Arc<str>, SessionHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `client_id` to `handle`. Fails with the incumbent handle if one
    /// is still bound; the takeover path treats that as fatal since it only
    /// inserts after observing absence.
    pub fn insert(
        &self,
        client_id: Arc<str>,
        handle: SessionHandle,
    ) -> Result<(), SessionHandle> {
        match self.bindings.entry(client_id) {
            Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
            Entry::Occupied(entry) => Err(entry.get().clone()),
        }
    }

    pub fn lookup(&self, client_id: &str) -> Option<SessionHandle> {
        let handle = self.bindings.get(client_id)?.value().clone();
        if handle.is_closed() {
            self.bindings.remove_if(client_id, |_, h| h.is_closed());
            return None;
        }
        Some(handle)
    }

    pub fn is_bound(&self, client_id: &str) -> bool {
        self.lookup(client_id).is_some()
    }

    pub fn remove(&self, client_id: &str) -> Option<SessionHandle> {
        self.bindings.remove(client_id).map(|(_, handle)| handle)
    }

    /// Remove the binding only if it still refers to `handle`; used by a
    /// session's exit path so it cannot evict a successor that already took
    /// the name over.
    pub fn remove_if_same(&self, client_id: &str, handle: &SessionHandle) -> bool {
        self.bindings
            .remove_if(client_id, |_, bound| bound.same_session(handle))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
