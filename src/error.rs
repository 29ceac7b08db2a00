//! Registry error types.

use std::fmt;

use crate::cluster::RemoteError;
use crate::store::StoreError;

/// Errors surfaced by the registry's public operations.
#[derive(Debug)]
pub enum RegistryError {
    /// The cluster readiness gate is closed.
    NotReady,
    /// An authorization hook denied the subscribe.
    NotAllowed,
    /// No such client.
    NotFound,
    /// Resource exhaustion launching a publish worker.
    SystemLimit,
    /// Per-topic abort reasons from a subscribe batch. Topics not listed
    /// were subscribed successfully.
    SubscribeErrors(Vec<String>),
    /// The publish worker terminated abnormally before acknowledging.
    WorkerDown(String),
    /// A registry invariant was found broken. Fatal.
    InvariantViolation(String),
    /// Replicated store failure.
    Store(StoreError),
    /// Peer call failure.
    Remote(RemoteError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotReady => write!(f, "cluster not ready"),
            RegistryError::NotAllowed => write!(f, "not allowed"),
            RegistryError::NotFound => write!(f, "not found"),
            RegistryError::SystemLimit => write!(f, "system limit reached"),
            RegistryError::SubscribeErrors(reasons) => {
                write!(f, "subscribe errors: [{}]", reasons.join(", "))
            }
            RegistryError::WorkerDown(reason) => {
                write!(f, "publish worker down: {}", reason)
            }
            RegistryError::InvariantViolation(detail) => {
                write!(f, "invariant violation: {}", detail)
            }
            RegistryError::Store(err) => write!(f, "store error: {}", err),
            RegistryError::Remote(err) => write!(f, "remote error: {}", err),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Store(err) => Some(err),
            RegistryError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvariantViolation(detail) => RegistryError::InvariantViolation(detail),
            other => RegistryError::Store(other),
        }
    }
}

impl From<RemoteError> for RegistryError {
    fn from(err: RemoteError) -> Self {
        RegistryError::Remote(err)
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
