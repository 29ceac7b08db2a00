//! Publish dispatch.
//!
//! Each publish runs in a transient worker task so the calling session gets
//! its acknowledgement as soon as the work is accepted, and a crashing
//! dispatch cannot take the caller down with it. The worker signals
//! acceptance over a oneshot token; a worker that dies first surfaces as a
//! worker-down error.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::cluster::{PeerRequest, PeerResponse, RemoteError};
use crate::error::{RegistryError, Result};
use crate::store::StoreError;
use crate::topic;

use super::{RouteEntry, Router};

impl Router {
    /// Publish `payload` under `routing_key` on behalf of `sender_client`.
    ///
    /// Returns once the spawned worker has dispatched the message — after
    /// the fast-path delivery or the cluster fan-out handoff — not when
    /// every subscriber has received it. Undeliverable QoS > 0 messages
    /// land in the store's deferred queues.
    pub async fn publish(
        &self,
        sender_client: &Arc<str>,
        msg_id: Option<u64>,
        routing_key: &str,
        payload: Bytes,
        retain: bool,
    ) -> Result<()> {
        topic::validate_routing_key(routing_key)
            .map_err(|reason| RegistryError::Store(StoreError::Abort(reason.to_string())))?;

        let permit = match self.publish_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(RegistryError::SystemLimit),
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let worker = {
            let router = self.clone();
            let sender_client = sender_client.clone();
            let routing_key: Arc<str> = Arc::from(routing_key);
            tokio::spawn(async move {
                let _permit = permit;
                let result = router
                    .dispatch(&sender_client, msg_id, &routing_key, payload, retain)
                    .await;
                if result.is_ok() {
                    let _ = ack_tx.send(());
                }
                result
            })
        };

        match ack_rx.await {
            Ok(()) => Ok(()),
            // no token: the worker failed or died before accepting the work
            Err(_) => match worker.await {
                Ok(Err(err)) => Err(err),
                Ok(Ok(())) => Err(RegistryError::WorkerDown(
                    "worker exited without acknowledging".to_string(),
                )),
                Err(join_err) => Err(RegistryError::WorkerDown(join_err.to_string())),
            },
        }
    }

    async fn dispatch(
        &self,
        sender_client: &Arc<str>,
        msg_id: Option<u64>,
        routing_key: &Arc<str>,
        payload: Bytes,
        retain: bool,
    ) -> Result<()> {
        let matches = self.match_routes(routing_key);

        if retain {
            self.ensure_ready()?;
            self.msg_store
                .retain(sender_client, routing_key, &payload)
                .await;
            return self
                .fan_out(&matches, sender_client, msg_id, routing_key, &payload, true)
                .await;
        }

        if matches.iter().all(|entry| entry.node == self.node) {
            // Single-node fast-path: every subscriber is ours, so a closed
            // readiness gate (e.g. a network partition) must not stop
            // delivery.
            debug!(key = routing_key.as_ref(), routes = matches.len(), "fast-path publish");
            for entry in &matches {
                self.route_local(
                    &entry.filter,
                    sender_client,
                    msg_id,
                    routing_key,
                    &payload,
                    false,
                )
                .await?;
            }
            return Ok(());
        }

        self.ensure_ready()?;
        self.fan_out(&matches, sender_client, msg_id, routing_key, &payload, false)
            .await
    }

    async fn fan_out(
        &self,
        matches: &[RouteEntry],
        sender_client: &Arc<str>,
        msg_id: Option<u64>,
        routing_key: &Arc<str>,
        payload: &Bytes,
        retain: bool,
    ) -> Result<()> {
        for entry in matches {
            if entry.node == self.node {
                self.route_local(
                    &entry.filter,
                    sender_client,
                    msg_id,
                    routing_key,
                    payload,
                    retain,
                )
                .await?;
                continue;
            }

            let response = self
                .cluster
                .call(
                    &entry.node,
                    PeerRequest::Route {
                        filter: entry.filter.to_string(),
                        sender_client: sender_client.to_string(),
                        msg_id,
                        routing_key: routing_key.to_string(),
                        payload: payload.to_vec(),
                        retain,
                    },
                )
                .await?;
            if let PeerResponse::Error(reason) = response {
                return Err(RegistryError::Remote(RemoteError::Other(reason)));
            }
        }
        Ok(())
    }
}
