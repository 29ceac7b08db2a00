//! Hook bus.
//!
//! Extensibility points the router consults on its hot paths: subscribe
//! authorization (first deny wins), subscriber filtering on delivery (each
//! hook reduces the list the previous one produced), and fire-and-forget
//! event notifications.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::QoS;
use crate::registry::Subscriber;

/// Hook error types
#[derive(Debug)]
pub enum HookError {
    /// Internal error
    Internal(String),
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for HookError {}

/// Hook result type
pub type HookResult<T> = Result<T, HookError>;

/// Router hooks trait
///
/// Implement this trait to customize authorization and delivery filtering.
/// All methods have default implementations that allow everything.
#[async_trait]
pub trait Hooks: Send + Sync {
    /// Called when a client attempts to subscribe to a batch of filters.
    ///
    /// # Returns
    /// * `Ok(true)` - Subscribe allowed
    /// * `Ok(false)` - Subscribe denied
    /// * `Err(_)` - Internal error occurred
    async fn auth_on_subscribe(
        &self,
        _client_id: &str,
        _topics: &[(Arc<str>, QoS)],
    ) -> HookResult<bool> {
        Ok(true) // Default: allow all
    }

    /// Called before delivery with the subscribers matched for a routing
    /// key. Hooks may drop or rewrite entries; the returned list is what the
    /// router delivers to.
    async fn filter_subscribers(
        &self,
        _routing_key: &str,
        subscribers: Vec<Subscriber>,
    ) -> Vec<Subscriber> {
        subscribers
    }

    /// Called after a subscription is installed.
    async fn on_subscribe(&self, _client_id: &str, _filter: &str, _qos: QoS) {
        // Default: no-op
    }

    /// Called after a subscription is removed.
    async fn on_unsubscribe(&self, _client_id: &str, _filter: &str) {
        // Default: no-op
    }

    /// Called after a client registration (takeover included) completes.
    async fn on_client_registered(&self, _client_id: &str) {
        // Default: no-op
    }
}

/// Default hooks implementation that allows everything
pub struct DefaultHooks;

#[async_trait]
impl Hooks for DefaultHooks {
    // All methods use default implementations (allow all, no-op)
}

impl Default for DefaultHooks {
    fn default() -> Self {
        Self
    }
}

/// Implement Hooks for Arc<T> where T: Hooks
/// This allows Arc-wrapped hook providers to be used directly
#[async_trait]
impl<T: Hooks + ?Sized> Hooks for Arc<T> {
    async fn auth_on_subscribe(
        &self,
        client_id: &str,
        topics: &[(Arc<str>, QoS)],
    ) -> HookResult<bool> {
        (**self).auth_on_subscribe(client_id, topics).await
    }

    async fn filter_subscribers(
        &self,
        routing_key: &str,
        subscribers: Vec<Subscriber>,
    ) -> Vec<Subscriber> {
        (**self).filter_subscribers(routing_key, subscribers).await
    }

    async fn on_subscribe(&self, client_id: &str, filter: &str, qos: QoS) {
        (**self).on_subscribe(client_id, filter, qos).await;
    }

    async fn on_unsubscribe(&self, client_id: &str, filter: &str) {
        (**self).on_unsubscribe(client_id, filter).await;
    }

    async fn on_client_registered(&self, client_id: &str) {
        (**self).on_client_registered(client_id).await;
    }
}

/// Composite hooks that chains multiple hook implementations
///
/// For authorization: the first hook to deny wins.
/// For subscriber filtering: each hook reduces the previous hook's output.
/// For events: all hooks are called in order.
pub struct CompositeHooks {
    hooks: Vec<Box<dyn Hooks>>,
}

impl CompositeHooks {
    /// Create a new composite hooks instance
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hooks implementation
    pub fn add<H: Hooks + 'static>(&mut self, hooks: H) {
        self.hooks.push(Box::new(hooks));
    }

    /// Add a hooks implementation and return self for chaining
    pub fn with<H: Hooks + 'static>(mut self, hooks: H) -> Self {
        self.add(hooks);
        self
    }
}

impl Default for CompositeHooks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hooks for CompositeHooks {
    async fn auth_on_subscribe(
        &self,
        client_id: &str,
        topics: &[(Arc<str>, QoS)],
    ) -> HookResult<bool> {
        for hooks in &self.hooks {
            if !hooks.auth_on_subscribe(client_id, topics).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn filter_subscribers(
        &self,
        routing_key: &str,
        subscribers: Vec<Subscriber>,
    ) -> Vec<Subscriber> {
        let mut current = subscribers;
        for hooks in &self.hooks {
            current = hooks.filter_subscribers(routing_key, current).await;
        }
        current
    }

    async fn on_subscribe(&self, client_id: &str, filter: &str, qos: QoS) {
        for hooks in &self.hooks {
            hooks.on_subscribe(client_id, filter, qos).await;
        }
    }

    async fn on_unsubscribe(&self, client_id: &str, filter: &str) {
        for hooks in &self.hooks {
            hooks.on_unsubscribe(client_id, filter).await;
        }
    }

    async fn on_client_registered(&self, client_id: &str) {
        for hooks in &self.hooks {
            hooks.on_client_registered(client_id).await;
        }
    }
}
