//! Integration tests for the MeshMQ routing registry.
//!
//! These tests drive the registry the way a broker frontend would, over an
//! in-process cluster: every node gets its own router, client registry, and
//! message store, while the replicated tables are shared — the same view a
//! real deployment gets from its replicated storage backend. Peer calls go
//! straight to the target router's request handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use pretty_assertions::assert_eq;
use tokio::time::timeout;

use meshmq::{
    Cluster, MemoryMessageStore, MessageStore, PeerRequest, PeerResponse, QoS, RegistryConfig,
    RegistryError, RemoteError, Router, SessionEvent, SessionHandle, Store,
};

/// In-process cluster: membership is the set of routers in the testbed, and
/// peer calls are direct method invocations.
struct TestCluster {
    node: String,
    peers: Arc<RwLock<HashMap<String, Router>>>,
    ready: Arc<AtomicBool>,
}

#[async_trait]
impl Cluster for TestCluster {
    fn node_name(&self) -> &str {
        &self.node
    }

    fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.peers.read().keys().cloned().collect();
        nodes.sort();
        nodes
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn call(&self, node: &str, request: PeerRequest) -> Result<PeerResponse, RemoteError> {
        let peer = self
            .peers
            .read()
            .get(node)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownNode(node.to_string()))?;
        Ok(peer.handle_peer_request(request).await)
    }
}

struct TestBed {
    peers: Arc<RwLock<HashMap<String, Router>>>,
    ready: Arc<AtomicBool>,
    store: Arc<Store>,
}

impl TestBed {
    fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(AtomicBool::new(true)),
            store: Arc::new(Store::new()),
        }
    }

    fn add_node(&self, name: &str) -> (Router, Arc<MemoryMessageStore>) {
        let msg_store = Arc::new(MemoryMessageStore::new());
        let cluster = Arc::new(TestCluster {
            node: name.to_string(),
            peers: self.peers.clone(),
            ready: self.ready.clone(),
        });
        let mut config = RegistryConfig::default();
        config.takeover_poll_interval = Duration::from_millis(10);
        let router = Router::new(config, cluster, self.store.clone(), msg_store.clone());
        self.peers.write().insert(name.to_string(), router.clone());
        (router, msg_store)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

fn s(text: &str) -> Arc<str> {
    Arc::from(text)
}

async fn recv_delivery(
    rx: &mut tokio::sync::mpsc::Receiver<SessionEvent>,
) -> meshmq::Delivery {
    match timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(SessionEvent::Deliver(delivery))) => delivery,
        other => panic!("expected delivery, got {:?}", other),
    }
}

async fn register(
    router: &Router,
    client_id: &str,
    clean_session: bool,
) -> (SessionHandle, tokio::sync::mpsc::Receiver<SessionEvent>) {
    let (session, rx) = router.session_channel();
    router
        .register_client(&s(client_id), session.clone(), clean_session)
        .await
        .unwrap();
    (session, rx)
}

#[tokio::test]
async fn wildcard_plus_delivers_with_store_reference() {
    let bed = TestBed::new();
    let (router, msg_store) = bed.add_node("n1");

    let (_session, mut rx) = register(&router, "c1", true).await;
    router
        .subscribe(&s("c1"), &[(s("a/+/c"), QoS::AtLeastOnce)])
        .await
        .unwrap();

    router
        .publish(&s("pub"), Some(1), "a/b/c", Bytes::from_static(b"x"), false)
        .await
        .unwrap();

    let delivery = recv_delivery(&mut rx).await;
    assert_eq!(delivery.routing_key.as_ref(), "a/b/c");
    assert_eq!(delivery.payload.as_ref(), b"x");
    assert_eq!(delivery.qos, QoS::AtLeastOnce);
    assert!(delivery.msg_ref.is_some());
    assert_eq!(msg_store.message_count(), 1);
}

#[tokio::test]
async fn hash_matches_parent_and_descendants() {
    let bed = TestBed::new();
    let (router, _) = bed.add_node("n1");

    let (_session, mut rx) = register(&router, "c1", true).await;
    router
        .subscribe(&s("c1"), &[(s("a/#"), QoS::AtMostOnce)])
        .await
        .unwrap();

    for key in ["a", "a/b", "a/b/c"] {
        router
            .publish(&s("pub"), None, key, Bytes::from_static(b"m"), false)
            .await
            .unwrap();
    }

    // sequential publishes from one sender arrive in order
    for expected in ["a", "a/b", "a/b/c"] {
        let delivery = recv_delivery(&mut rx).await;
        assert_eq!(delivery.routing_key.as_ref(), expected);
    }
}

#[tokio::test]
async fn retained_clear_is_not_delivered() {
    let bed = TestBed::new();
    let (router, msg_store) = bed.add_node("n1");

    router
        .publish(&s("pub"), None, "t", Bytes::from_static(b"v1"), true)
        .await
        .unwrap();
    assert_eq!(msg_store.retained_count(), 1);

    let (_s1, mut rx1) = register(&router, "c1", true).await;
    let (_s2, mut rx2) = register(&router, "c2", true).await;
    router
        .subscribe(&s("c1"), &[(s("t"), QoS::AtMostOnce)])
        .await
        .unwrap();
    router
        .subscribe(&s("c2"), &[(s("t"), QoS::AtLeastOnce)])
        .await
        .unwrap();
    // both get the retained value at subscribe time
    assert_eq!(recv_delivery(&mut rx1).await.payload.as_ref(), b"v1");
    assert_eq!(recv_delivery(&mut rx2).await.payload.as_ref(), b"v1");

    // empty payload clears the retained slot and delivers nothing
    router
        .publish(&s("pub"), None, "t", Bytes::new(), true)
        .await
        .unwrap();

    assert_eq!(msg_store.retained_count(), 0);
    assert_eq!(msg_store.message_count(), 0);
    assert!(rx1.try_recv().is_err());
    assert!(rx2.try_recv().is_err());
}

#[tokio::test]
async fn takeover_moves_binding_and_wipes_clean_session() {
    let bed = TestBed::new();
    let (n1, n1_store) = bed.add_node("n1");
    let (n2, _) = bed.add_node("n2");

    let (_session, mut rx1) = register(&n1, "c", false).await;
    n1.subscribe(&s("c"), &[(s("x/#"), QoS::AtLeastOnce)])
        .await
        .unwrap();
    assert_eq!(n2.match_routes("x/y").len(), 1);
    n1_store
        .defer_deliver("c", QoS::AtLeastOnce, 7)
        .await;

    // the incumbent's exit path: disconnect arrives, the session goes away
    let watcher = tokio::spawn(async move {
        loop {
            match rx1.recv().await {
                Some(SessionEvent::Disconnect) | None => break,
                Some(_) => {}
            }
        }
    });

    let (new_session, _rx2) = n2.session_channel();
    n2.register_client(&s("c"), new_session.clone(), true)
        .await
        .unwrap();
    watcher.await.unwrap();

    // exactly one live binding cluster-wide, on the registering node
    assert!(!n1.clients().is_bound("c"));
    let bound = n2.clients().lookup("c").unwrap();
    assert!(bound.same_session(&new_session));

    // session wipe: subscriptions gone everywhere, store purged
    assert!(n1.subscriptions("c").is_empty());
    assert!(n1.match_routes("x/y").is_empty());
    assert!(n2.match_routes("x/y").is_empty());
    assert_eq!(n1_store.deferred_count("c"), 0);
}

#[tokio::test]
async fn takeover_with_session_resume_replays_deferred() {
    let bed = TestBed::new();
    let (router, msg_store) = bed.add_node("n1");

    router
        .subscribe(&s("c"), &[(s("q"), QoS::AtLeastOnce)])
        .await
        .unwrap();
    router
        .publish(&s("pub"), None, "q", Bytes::from_static(b"held"), false)
        .await
        .unwrap();
    assert_eq!(msg_store.deferred_count("c"), 1);

    let (_session, mut rx) = register(&router, "c", false).await;
    let delivery = recv_delivery(&mut rx).await;
    assert_eq!(delivery.routing_key.as_ref(), "q");
    assert_eq!(delivery.payload.as_ref(), b"held");
    assert!(delivery.msg_ref.is_some());
    assert_eq!(msg_store.deferred_count("c"), 0);

    // the resumed session keeps its subscriptions
    assert_eq!(router.subscriptions("c"), vec![(s("q"), QoS::AtLeastOnce)]);
}

#[tokio::test]
async fn fast_path_survives_closed_readiness_gate() {
    let bed = TestBed::new();
    let (n1, _) = bed.add_node("n1");
    let (n2, _) = bed.add_node("n2");

    let (_s1, mut rx1) = register(&n1, "local", true).await;
    n1.subscribe(&s("local"), &[(s("t"), QoS::AtMostOnce)])
        .await
        .unwrap();
    let (_s2, _rx2) = register(&n2, "remote", true).await;
    n2.subscribe(&s("remote"), &[(s("elsewhere"), QoS::AtMostOnce)])
        .await
        .unwrap();

    // partition: the gate closes, but all subscribers for "t" are local
    bed.set_ready(false);
    n1.publish(&s("pub"), None, "t", Bytes::from_static(b"x"), false)
        .await
        .unwrap();
    assert_eq!(recv_delivery(&mut rx1).await.routing_key.as_ref(), "t");

    // a publish that needs the remote node fails while the gate is closed
    let err = n1
        .publish(
            &s("pub"),
            None,
            "elsewhere",
            Bytes::from_static(b"x"),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotReady));
}

#[tokio::test]
async fn partial_subscribe_failure_keeps_good_topics() {
    let bed = TestBed::new();
    let (router, _) = bed.add_node("n1");

    // retained messages under the two valid filters
    router
        .publish(&s("pub"), None, "f1/x", Bytes::from_static(b"r1"), true)
        .await
        .unwrap();
    router
        .publish(&s("pub"), None, "f3/x", Bytes::from_static(b"r3"), true)
        .await
        .unwrap();

    let (_session, mut rx) = register(&router, "c1", true).await;
    let err = router
        .subscribe(
            &s("c1"),
            &[
                (s("f1/#"), QoS::AtMostOnce),
                (s("f2/#/bad"), QoS::AtMostOnce),
                (s("f3/#"), QoS::AtMostOnce),
            ],
        )
        .await
        .unwrap_err();

    match err {
        RegistryError::SubscribeErrors(reasons) => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].contains("wildcard"));
        }
        other => panic!("expected SubscribeErrors, got {}", other),
    }

    // retained deliveries arrive for the two installed filters only
    let mut keys = vec![
        recv_delivery(&mut rx).await.routing_key.to_string(),
        recv_delivery(&mut rx).await.routing_key.to_string(),
    ];
    keys.sort();
    assert_eq!(keys, vec!["f1/x", "f3/x"]);
    assert!(rx.try_recv().is_err());

    assert_eq!(router.match_routes("f1/x").len(), 1);
    assert_eq!(router.match_routes("f3/x").len(), 1);
    assert!(router.match_routes("f2/y/bad").is_empty());
}

#[tokio::test]
async fn cluster_fan_out_reaches_remote_subscribers() {
    let bed = TestBed::new();
    let (n1, _) = bed.add_node("n1");
    let (n2, _) = bed.add_node("n2");

    let (_s1, mut rx1) = register(&n1, "near", true).await;
    n1.subscribe(&s("near"), &[(s("span/+"), QoS::AtMostOnce)])
        .await
        .unwrap();
    let (_s2, mut rx2) = register(&n2, "far", true).await;
    n2.subscribe(&s("far"), &[(s("span/+"), QoS::AtLeastOnce)])
        .await
        .unwrap();

    // both nodes appear in the match, from either side
    assert_eq!(n1.match_routes("span/1").len(), 2);
    assert_eq!(n2.match_routes("span/1").len(), 2);

    n1.publish(&s("pub"), Some(9), "span/1", Bytes::from_static(b"m"), false)
        .await
        .unwrap();

    let near = recv_delivery(&mut rx1).await;
    assert_eq!(near.qos, QoS::AtMostOnce);
    let far = recv_delivery(&mut rx2).await;
    assert_eq!(far.qos, QoS::AtLeastOnce);
    assert!(far.msg_ref.is_some());
}

#[tokio::test]
async fn unsubscribe_returns_tables_to_prior_state() {
    let bed = TestBed::new();
    let (n1, _) = bed.add_node("n1");
    let (n2, _) = bed.add_node("n2");

    n1.subscribe(&s("c1"), &[(s("shared/#"), QoS::AtMostOnce)])
        .await
        .unwrap();
    n2.subscribe(&s("c2"), &[(s("shared/#"), QoS::AtMostOnce)])
        .await
        .unwrap();

    // dropping one node's subscriber keeps the filter routable to the other
    n1.unsubscribe("c1", &[s("shared/#")]).await.unwrap();
    let routes = n1.match_routes("shared/x");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].node.as_ref(), "n2");

    // dropping the last subscriber anywhere prunes the trie entirely
    n2.unsubscribe("c2", &[s("shared/#")]).await.unwrap();
    assert!(n1.match_routes("shared/x").is_empty());
}

#[tokio::test]
async fn disconnect_client_reaches_bound_session() {
    let bed = TestBed::new();
    let (router, _) = bed.add_node("n1");

    let (_session, mut rx) = register(&router, "c1", true).await;
    router.disconnect_client("c1").unwrap();
    match timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(SessionEvent::Disconnect)) => {}
        other => panic!("expected disconnect, got {:?}", other),
    }

    assert!(matches!(
        router.disconnect_client("ghost"),
        Err(RegistryError::NotFound)
    ));
}
