//! Plugin convenience endpoint.
//!
//! In-process extensions (sys-topic emitters, webhooks, shell tooling) want
//! to publish and subscribe without running a real client connection. The
//! endpoint binds a synthetic client id — derived from the plugin's name so
//! it is stable across restarts — and exposes the three calls a plugin
//! needs, each waiting out the cluster readiness gate instead of failing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::error::Result;
use crate::protocol::QoS;
use crate::registry::SessionEvent;
use crate::router::Router;

/// A plugin's handle onto the registry.
pub struct PluginEndpoint {
    router: Router,
    client_id: Arc<str>,
}

impl Router {
    /// Build a plugin endpoint named `name`.
    pub fn plugin_endpoint(&self, name: &str) -> PluginEndpoint {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        let client_id = STANDARD.encode(hasher.finish().to_be_bytes());
        PluginEndpoint {
            router: self.clone(),
            client_id: Arc::from(client_id.as_str()),
        }
    }
}

impl PluginEndpoint {
    /// The synthetic client id this endpoint publishes and subscribes as.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn wait_ready(&self) {
        while !self.router.cluster.is_ready() {
            sleep(self.router.config.ready_poll_interval).await;
        }
    }

    /// Register the synthetic client, returning the mailbox its deliveries
    /// arrive on.
    pub async fn register(&self) -> Result<mpsc::Receiver<SessionEvent>> {
        self.wait_ready().await;
        let (session, rx) = self.router.session_channel();
        self.router
            .register_client(&self.client_id, session, true)
            .await?;
        Ok(rx)
    }

    /// Publish `payload` under `routing_key` as the plugin client.
    pub async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<()> {
        self.wait_ready().await;
        self.router
            .publish(&self.client_id, None, routing_key, payload, false)
            .await
    }

    /// Subscribe the plugin client to `filter`.
    pub async fn subscribe(&self, filter: &str) -> Result<()> {
        self.wait_ready().await;
        self.router
            .subscribe(&self.client_id, &[(Arc::from(filter), QoS::AtMostOnce)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StandaloneCluster;
    use crate::config::RegistryConfig;
    use crate::msgstore::MemoryMessageStore;
    use crate::store::Store;

    fn standalone() -> Router {
        Router::new(
            RegistryConfig::default(),
            Arc::new(StandaloneCluster::new("n1")),
            Arc::new(Store::new()),
            Arc::new(MemoryMessageStore::new()),
        )
    }

    #[tokio::test]
    async fn test_client_id_is_stable_and_distinct() {
        let router = standalone();
        let a1 = router.plugin_endpoint("sys-stats");
        let a2 = router.plugin_endpoint("sys-stats");
        let b = router.plugin_endpoint("webhook");

        assert_eq!(a1.client_id(), a2.client_id());
        assert_ne!(a1.client_id(), b.client_id());
    }

    #[tokio::test]
    async fn test_round_trip_through_endpoint() {
        let router = standalone();
        let endpoint = router.plugin_endpoint("loopback");

        let mut rx = endpoint.register().await.unwrap();
        endpoint.subscribe("plugin/echo").await.unwrap();
        endpoint
            .publish("plugin/echo", Bytes::from_static(b"ping"))
            .await
            .unwrap();

        match rx.recv().await {
            Some(SessionEvent::Deliver(delivery)) => {
                assert_eq!(delivery.routing_key.as_ref(), "plugin/echo");
                assert_eq!(delivery.payload.as_ref(), b"ping");
            }
            other => panic!("expected delivery, got {:?}", other),
        }
    }
}
