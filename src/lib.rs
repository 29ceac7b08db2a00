//! MeshMQ - Clustered routing and subscription registry for MQTT brokers
//!
//! Maintains a replicated, wildcard-aware index of topic subscriptions,
//! matches published messages against it, and hands them to the sessions of
//! connected clients, locally or on peer cluster nodes. Also enforces
//! cluster-wide uniqueness of client identifiers (takeover semantics) and
//! cooperates with a durable message store for QoS > 0 and retained
//! messages.
//!
//! The wire codec, the per-connection state machine, and the cluster
//! transport are external: they drive this crate through [`Router`] and the
//! [`Cluster`], [`MessageStore`], and [`Hooks`] seams.

pub mod cluster;
pub mod config;
pub mod error;
pub mod hooks;
pub mod msgstore;
pub mod plugin;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod store;
pub mod topic;
pub mod trie;

pub use cluster::{Cluster, PeerRequest, PeerResponse, RemoteError, StandaloneCluster};
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use hooks::{CompositeHooks, DefaultHooks, Hooks};
pub use msgstore::{MemoryMessageStore, MessageStore, MsgRef};
pub use plugin::PluginEndpoint;
pub use protocol::QoS;
pub use registry::{ClientRegistry, Delivery, SessionEvent, SessionHandle, Subscriber};
pub use router::{RouteEntry, Router};
pub use store::Store;
