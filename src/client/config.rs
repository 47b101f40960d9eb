//! Configuration for the RES client.

use crate::bus::EventBus;
use crate::client::ResClient;
use crate::error::Result;
use crate::transport::Transport;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Hook run after each successful transport open, before the connect call
/// resolves and before stale resources are resubscribed. Typically used to
/// authenticate the connection.
pub type OnConnect = Arc<dyn Fn(ResClient) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Configuration for a [`ResClient`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Event-bus namespace prefixed to every emitted event subject.
    pub namespace: String,

    /// Delay before a resource demoted to stale is resubscribed.
    ///
    /// Absorbs flapping: a resource staled and evicted shortly after never
    /// hits the wire.
    pub subscribe_stale_delay: Duration,

    /// Delay before reconnecting after an unexpected connection loss.
    pub reconnect_delay: Duration,

    /// Connection hook; see [`OnConnect`]. A failing hook closes the
    /// transport, which triggers another reconnect cycle.
    pub on_connect: Option<OnConnect>,

    /// Event bus to publish on. Defaults to the process-wide shared bus.
    pub event_bus: Option<EventBus>,

    /// Transport used to open connections. Defaults to WebSocket.
    pub transport: Option<Arc<dyn Transport>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            namespace: "resclient".to_string(),
            subscribe_stale_delay: Duration::from_millis(2000),
            reconnect_delay: Duration::from_millis(3000),
            on_connect: None,
            event_bus: None,
            transport: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_subscribe_stale_delay(mut self, delay: Duration) -> Self {
        self.subscribe_stale_delay = delay;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the connect hook from an async closure.
    #[must_use]
    pub fn with_on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ResClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |client| Box::pin(hook(client))));
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("namespace", &self.namespace)
            .field("subscribe_stale_delay", &self.subscribe_stale_delay)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("has_on_connect", &self.on_connect.is_some())
            .field("has_event_bus", &self.event_bus.is_some())
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}
