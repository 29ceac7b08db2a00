//! The routing registry core.
//!
//! [`Router`] ties the replicated trie and topic tables to this node's
//! subscriber bag and client bindings, and exposes the operation surface a
//! broker frontend drives: subscribe, unsubscribe, publish, client
//! registration with cluster-wide takeover, and routing-key matching.
//!
//! A `Router` is cheap to clone; every field is shared. One instance exists
//! per cluster node, and peers reach it through
//! [`Router::handle_peer_request`] via their cluster transport.

mod local;
mod publish;

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, PeerRequest, PeerResponse};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::hooks::{DefaultHooks, Hooks};
use crate::msgstore::MessageStore;
use crate::protocol::QoS;
use crate::registry::{ClientRegistry, SessionEvent, SessionHandle, SubscriberTable};
use crate::store::{Store, StoreError};
use crate::topic;
use crate::trie;

/// One match result: a filter and the cluster node hosting subscribers
/// for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub filter: Arc<str>,
    pub node: Arc<str>,
}

/// The per-node routing registry.
#[derive(Clone)]
pub struct Router {
    pub(crate) node: Arc<str>,
    pub(crate) config: Arc<RegistryConfig>,
    pub(crate) store: Arc<Store>,
    pub(crate) subscribers: Arc<SubscriberTable>,
    pub(crate) clients: Arc<ClientRegistry>,
    pub(crate) msg_store: Arc<dyn MessageStore>,
    pub(crate) cluster: Arc<dyn Cluster>,
    pub(crate) hooks: Arc<dyn Hooks>,
    pub(crate) publish_permits: Arc<Semaphore>,
}

impl Router {
    /// Create a router with default hooks (allows everything).
    pub fn new(
        config: RegistryConfig,
        cluster: Arc<dyn Cluster>,
        store: Arc<Store>,
        msg_store: Arc<dyn MessageStore>,
    ) -> Self {
        Self::with_hooks(config, cluster, store, msg_store, Arc::new(DefaultHooks))
    }

    /// Create a router with custom hooks.
    pub fn with_hooks(
        config: RegistryConfig,
        cluster: Arc<dyn Cluster>,
        store: Arc<Store>,
        msg_store: Arc<dyn MessageStore>,
        hooks: Arc<dyn Hooks>,
    ) -> Self {
        let node: Arc<str> = Arc::from(cluster.node_name());
        let permits = Arc::new(Semaphore::new(config.max_inflight_publishes));
        Self {
            node,
            config: Arc::new(config),
            store,
            subscribers: Arc::new(SubscriberTable::new()),
            clients: Arc::new(ClientRegistry::new()),
            msg_store,
            cluster,
            hooks,
            publish_permits: permits,
        }
    }

    /// Name of the cluster node this router serves.
    pub fn node_name(&self) -> &str {
        &self.node
    }

    /// The node-local client bindings.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Create a session mailbox sized per configuration.
    pub fn session_channel(&self) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        SessionHandle::channel(self.config.session_channel_capacity)
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.cluster.is_ready() {
            Ok(())
        } else {
            Err(RegistryError::NotReady)
        }
    }

    /// Subscribe `client_id` to a batch of filters.
    ///
    /// Topics are attempted in order; a failed topic aborts only its own
    /// transaction, and the collected reasons come back as
    /// [`RegistryError::SubscribeErrors`] while the successful topics stay
    /// subscribed. Retained messages are delivered for each installed
    /// filter when the client is bound locally.
    pub async fn subscribe(&self, client_id: &Arc<str>, topics: &[(Arc<str>, QoS)]) -> Result<()> {
        self.ensure_ready()?;

        match self.hooks.auth_on_subscribe(client_id, topics).await {
            Ok(true) => {}
            Ok(false) => return Err(RegistryError::NotAllowed),
            Err(err) => {
                warn!(client = client_id.as_ref(), error = %err, "subscribe auth hook failed");
                return Err(RegistryError::NotAllowed);
            }
        }

        let mut errors = Vec::new();
        for (filter, qos) in topics {
            match self.subscribe_one(client_id, filter, *qos) {
                Ok(()) => {
                    self.hooks.on_subscribe(client_id, filter, *qos).await;
                    if let Some(session) = self.clients.lookup(client_id) {
                        self.msg_store
                            .deliver_retained(&session, filter, *qos)
                            .await;
                    }
                }
                Err(StoreError::InvariantViolation(detail)) => {
                    return Err(RegistryError::InvariantViolation(detail));
                }
                Err(err) => {
                    warn!(
                        client = client_id.as_ref(),
                        filter = filter.as_ref(),
                        error = %err,
                        "subscribe failed"
                    );
                    errors.push(err.to_string());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::SubscribeErrors(errors))
        }
    }

    fn subscribe_one(
        &self,
        client_id: &Arc<str>,
        filter: &Arc<str>,
        qos: QoS,
    ) -> std::result::Result<(), StoreError> {
        topic::validate_filter(filter)
            .map_err(|reason| StoreError::Abort(reason.to_string()))?;

        self.store.transaction(|tx| {
            trie::insert(tx, filter)?;
            tx.add_topic_node(filter, &self.node);
            Ok(())
        })?;
        self.subscribers.upsert(filter, client_id, qos);
        Ok(())
    }

    /// Remove `client_id`'s subscriptions for the given filters.
    pub async fn unsubscribe(&self, client_id: &str, filters: &[Arc<str>]) -> Result<()> {
        self.ensure_ready()?;
        for filter in filters {
            self.unsubscribe_one(client_id, filter)?;
            self.hooks.on_unsubscribe(client_id, filter).await;
        }
        Ok(())
    }

    fn unsubscribe_one(&self, client_id: &str, filter: &str) -> Result<()> {
        if !self.subscribers.remove(filter, client_id) {
            return Ok(());
        }
        if self.subscribers.has_subscribers(filter) {
            return Ok(());
        }

        // Last local subscriber is gone: retract this node's topic record,
        // and prune the trie once no node holds the filter anywhere.
        self.store.transaction(|tx| {
            tx.remove_topic_node(filter, &self.node);
            if !tx.tables().has_topic(filter) {
                trie::remove(tx, filter)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// All `(filter, qos)` pairs held by `client_id` on this node.
    pub fn subscriptions(&self, client_id: &str) -> Vec<(Arc<str>, QoS)> {
        self.subscribers.subscriptions_for(client_id)
    }

    /// Session cleanup: drop every subscription `client_id` holds here.
    pub fn remove_client_subscriptions(&self, client_id: &str) -> Result<()> {
        for filter in self.subscribers.filters_for(client_id) {
            self.unsubscribe_one(client_id, &filter)?;
        }
        Ok(())
    }

    /// Match a routing key to `(filter, node)` pairs. A filter hosted on
    /// several nodes contributes one entry per node.
    pub fn match_routes(&self, routing_key: &str) -> Vec<RouteEntry> {
        self.store.dirty(|tables| {
            let mut out = Vec::new();
            for filter in trie::match_filters(tables, routing_key) {
                for node in tables.topic_nodes(&filter) {
                    out.push(RouteEntry {
                        filter: filter.clone(),
                        node: node.clone(),
                    });
                }
            }
            out
        })
    }

    /// Register `client_id`'s new session cluster-wide.
    ///
    /// Every node evicts any incumbent bound to the id and waits for its
    /// binding to clear before touching session state; the new binding is
    /// installed here, on the node that owns the session. When the call
    /// returns, this node holds the only live binding for `client_id`.
    pub async fn register_client(
        &self,
        client_id: &Arc<str>,
        session: SessionHandle,
        clean_session: bool,
    ) -> Result<()> {
        self.ensure_ready()?;

        let peers: Vec<String> = self
            .cluster
            .nodes()
            .into_iter()
            .filter(|node| node.as_str() != self.node.as_ref())
            .collect();

        let remote = join_all(peers.iter().map(|node| {
            self.cluster.call(
                node,
                PeerRequest::Register {
                    client_id: client_id.to_string(),
                    clean_session,
                },
            )
        }));
        let local = self.register_client_local(client_id, Some(session), clean_session);
        let (local_result, remote_results) = tokio::join!(local, remote);
        local_result?;

        for (node, result) in peers.iter().zip(remote_results) {
            match result {
                Ok(PeerResponse::Ok) => {}
                Ok(PeerResponse::Error(reason)) => {
                    warn!(
                        node = node.as_str(),
                        reason = reason.as_str(),
                        "peer registration leg failed"
                    );
                }
                Err(err) => {
                    warn!(node = node.as_str(), error = %err, "peer registration call failed");
                }
            }
        }

        info!(client = client_id.as_ref(), clean_session, "client registered");
        self.hooks.on_client_registered(client_id).await;
        Ok(())
    }

    /// The local leg of a registration, also run on behalf of peers.
    ///
    /// `session` is present only on the node that owns the new session;
    /// peer-invoked legs evict and prime but do not bind.
    pub(crate) async fn register_client_local(
        &self,
        client_id: &Arc<str>,
        session: Option<SessionHandle>,
        clean_session: bool,
    ) -> Result<()> {
        // Evict the incumbent once, then wait for its exit path to release
        // the binding. No timeout: the registration must not proceed while
        // two sessions could both claim the id.
        if let Some(incumbent) = self.clients.lookup(client_id) {
            debug!(client = client_id.as_ref(), "evicting incumbent session");
            incumbent.disconnect();
            while self.clients.is_bound(client_id) {
                sleep(self.config.takeover_poll_interval).await;
            }
        }

        if clean_session {
            self.msg_store.clean_session(client_id).await;
            self.remove_client_subscriptions(client_id)?;
        } else if let Some(session) = &session {
            self.msg_store.deliver_from_store(client_id, session).await;
        }

        if let Some(session) = session {
            if self.clients.insert(client_id.clone(), session).is_err() {
                return Err(RegistryError::InvariantViolation(format!(
                    "binding for '{}' reappeared during takeover",
                    client_id
                )));
            }
        }
        Ok(())
    }

    /// Ask the session bound to `client_id` on this node to disconnect.
    pub fn disconnect_client(&self, client_id: &str) -> Result<()> {
        match self.clients.lookup(client_id) {
            Some(session) => {
                session.disconnect();
                Ok(())
            }
            None => Err(RegistryError::NotFound),
        }
    }

    /// Session exit path: release the binding if it still refers to
    /// `session`.
    pub fn unregister_client(&self, client_id: &str, session: &SessionHandle) -> bool {
        self.clients.remove_if_same(client_id, session)
    }

    /// Serve a request from a peer node's registry.
    pub async fn handle_peer_request(&self, request: PeerRequest) -> PeerResponse {
        match request {
            PeerRequest::Route {
                filter,
                sender_client,
                msg_id,
                routing_key,
                payload,
                retain,
            } => {
                let routing_key: Arc<str> = Arc::from(routing_key);
                match self
                    .route_local(
                        &filter,
                        &sender_client,
                        msg_id,
                        &routing_key,
                        &bytes::Bytes::from(payload),
                        retain,
                    )
                    .await
                {
                    Ok(()) => PeerResponse::Ok,
                    Err(err) => PeerResponse::Error(err.to_string()),
                }
            }
            PeerRequest::Register {
                client_id,
                clean_session,
            } => {
                let client_id: Arc<str> = Arc::from(client_id);
                match self
                    .register_client_local(&client_id, None, clean_session)
                    .await
                {
                    Ok(()) => PeerResponse::Ok,
                    Err(err) => PeerResponse::Error(err.to_string()),
                }
            }
        }
    }

    /// Admin: drop all replicated records and this node's subscriber bag.
    pub fn reset(&self) {
        self.store.reset();
        self.subscribers.clear();
    }
}
