//! Local delivery leg of the publish path.
//!
//! Runs on the node that owns the matched subscribers: reads the subscriber
//! bag, lets the hook chain thin the list, then hands each message to the
//! bound session or to the store.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::registry::Delivery;

use super::Router;

impl Router {
    /// Deliver a publication to this node's subscribers for `filter`.
    ///
    /// QoS 0 deliveries go straight to the bound session and are dropped
    /// silently when the client is not here. QoS > 0 messages are stored
    /// first; an unbound or unreachable client gets the reference deferred
    /// for replay at its next registration. A retained delete (retain set,
    /// empty payload) is never delivered; its store reference is released
    /// immediately since the dispatcher already applied the clear.
    pub(crate) async fn route_local(
        &self,
        filter: &str,
        sender_client: &str,
        msg_id: Option<u64>,
        routing_key: &Arc<str>,
        payload: &Bytes,
        retain: bool,
    ) -> Result<()> {
        let subscribers = self.subscribers.get(filter);
        let subscribers = self.hooks.filter_subscribers(routing_key, subscribers).await;
        let retained_delete = retain && payload.is_empty();

        for subscriber in subscribers {
            if !subscriber.qos.is_durable() {
                if retained_delete {
                    continue;
                }
                if let Some(session) = self.clients.lookup(&subscriber.client_id) {
                    let delivered = session.deliver(Delivery {
                        routing_key: routing_key.clone(),
                        payload: payload.clone(),
                        qos: subscriber.qos,
                        dup: false,
                        retain,
                        msg_ref: None,
                    });
                    if !delivered {
                        debug!(
                            client = subscriber.client_id.as_ref(),
                            key = routing_key.as_ref(),
                            "QoS 0 mailbox unavailable, dropping"
                        );
                    }
                }
                // no local binding: drop silently
                continue;
            }

            let msg_ref = self
                .msg_store
                .store(sender_client, msg_id, routing_key, payload)
                .await;

            if retained_delete {
                self.msg_store.deref(msg_ref).await;
                continue;
            }

            let delivered = match self.clients.lookup(&subscriber.client_id) {
                Some(session) => session.deliver(Delivery {
                    routing_key: routing_key.clone(),
                    payload: payload.clone(),
                    qos: subscriber.qos,
                    dup: false,
                    retain,
                    msg_ref: Some(msg_ref),
                }),
                None => false,
            };
            if !delivered {
                self.msg_store
                    .defer_deliver(&subscriber.client_id, subscriber.qos, msg_ref)
                    .await;
            }
        }

        Ok(())
    }
}
