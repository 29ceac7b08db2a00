//! Inter-node request messages.
//!
//! The registry speaks to its peers through two requests: routing a matched
//! publish to the node owning the subscribers, and running the local leg of
//! a client registration. Messages are serialized with bincode; the cluster
//! transport carrying them lives outside this crate.

use bincode::{Decode, Encode};

/// Protocol version for compatibility checking
pub const PEER_PROTOCOL_VERSION: u8 = 1;

/// Requests exchanged between registry nodes
#[derive(Debug, Clone, Encode, Decode)]
pub enum PeerRequest {
    /// Invoke the local router for a matched filter on the receiving node
    Route {
        /// Matched topic filter whose subscribers live on the receiver
        filter: String,
        /// Client id of the original publisher
        sender_client: String,
        /// Publisher-assigned message id, if any
        msg_id: Option<u64>,
        /// Concrete topic of the publication
        routing_key: String,
        /// Message payload
        payload: Vec<u8>,
        /// Retain flag of the publication
        retain: bool,
    },

    /// Run the local leg of a client registration: evict any incumbent and
    /// prime or purge the session state held on the receiver
    Register {
        /// Client identifier being registered
        client_id: String,
        /// True wipes the session, false replays deferred messages
        clean_session: bool,
    },
}

/// Responses to peer requests
#[derive(Debug, Clone, Encode, Decode)]
pub enum PeerResponse {
    /// Request executed
    Ok,
    /// Request failed on the receiving node
    Error(String),
}

impl PeerRequest {
    /// Encode message to bytes using bincode
    pub fn encode(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
    }

    /// Decode message from bytes using bincode
    pub fn decode(data: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        bincode::decode_from_slice(data, bincode::config::standard()).map(|(msg, _)| msg)
    }

    /// Get the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerRequest::Route { .. } => "Route",
            PeerRequest::Register { .. } => "Register",
        }
    }
}

impl PeerResponse {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
    }

    pub fn decode(data: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        bincode::decode_from_slice(data, bincode::config::standard()).map(|(msg, _)| msg)
    }
}
