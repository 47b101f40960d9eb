//! The RES client.

use crate::bus::{default_bus, EventBus, Handler, HandlerId};
use crate::cache::CacheItem;
use crate::client::config::{ClientConfig, OnConnect};
use crate::client::requests::{self, RequestKind};
use crate::client::state::{SharedState, State};
use crate::client::{connection, coordinator};
use crate::error::{Error, Result};
use crate::resources::{self, CollectionFactory, ModelFactory, Resource, Stored};
use crate::transport::{Transport, WsTransport};
use crate::types::{delete_sentinel, Rid};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub(crate) struct ClientInner {
    pub host_url: String,
    pub namespace: String,
    pub subscribe_stale_delay: Duration,
    pub reconnect_delay: Duration,
    pub on_connect: Option<OnConnect>,
    pub transport: Arc<dyn Transport>,
    pub bus: EventBus,
    pub state: SharedState,
}

/// A client for a RES gateway.
///
/// The client keeps a cache of every resource it is subscribed to and
/// applies server-pushed events so the cached resource graph always matches
/// the authoritative server state. Cloning is cheap; clones share the same
/// connection and cache.
///
/// # Example
///
/// ```no_run
/// use res_rs::ResClient;
///
/// # async fn run() -> res_rs::Result<()> {
/// let client = ResClient::new("ws://localhost:8080");
/// let ticker = client.get("example.ticker").await?;
/// let model = ticker.as_model().expect("a model");
/// println!("price: {:?}", model.prop("price"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ResClient {
    /// Create a client with default configuration.
    ///
    /// `host_url` with an `http` or `https` scheme is rewritten to the
    /// corresponding WebSocket scheme; other URLs are used as given.
    #[must_use]
    pub fn new(host_url: &str) -> Self {
        Self::with_config(host_url, ClientConfig::default())
    }

    /// Create a client with custom configuration.
    #[must_use]
    pub fn with_config(host_url: &str, config: ClientConfig) -> Self {
        let ClientConfig {
            namespace,
            subscribe_stale_delay,
            reconnect_delay,
            on_connect,
            event_bus,
            transport,
        } = config;
        ResClient {
            inner: Arc::new(ClientInner {
                host_url: host_url.to_string(),
                namespace,
                subscribe_stale_delay,
                reconnect_delay,
                on_connect,
                transport: transport.unwrap_or_else(|| Arc::new(WsTransport)),
                bus: event_bus.unwrap_or_else(default_bus),
                state: Arc::new(Mutex::new(State::new())),
            }),
        }
    }

    /// Open the connection.
    ///
    /// Requests connect on demand, so calling this is only needed to force
    /// an early connection or to resume after [`disconnect`].
    ///
    /// [`disconnect`]: ResClient::disconnect
    pub async fn connect(&self) -> Result<()> {
        connection::connect(&self.inner).await
    }

    /// Close the connection and stop reconnecting.
    ///
    /// A pending `connect` rejects with a disconnect error. Cached
    /// resources stay available for reading; a later call that needs the
    /// connection will reconnect.
    pub fn disconnect(&self) {
        connection::disconnect(&self.inner);
    }

    /// Get a resource, subscribing to it if it is not already cached.
    ///
    /// Concurrent calls for the same resource share one subscription. If
    /// the gateway answers with an error resource, the error is returned
    /// and the provisional cache entry dropped.
    pub async fn get(&self, rid: &str) -> Result<Resource> {
        if rid.is_empty() {
            return Err(Error::InvalidArgument(
                "resource id must not be empty".to_string(),
            ));
        }
        let rid = Rid::new(rid);
        let (rx, must_send) = {
            let mut st = self.inner.state.lock();
            if let Some(item) = st.items.get_mut(&rid) {
                if let Some(stored) = &item.stored {
                    return match stored {
                        Stored::Error(payload) => Err(Error::from(payload.clone())),
                        _ => Ok(resources::handle(
                            &self.inner.state,
                            &rid,
                            stored.res_type(),
                        )),
                    };
                }
                let (tx, rx) = oneshot::channel();
                item.waiters.push(tx);
                (rx, false)
            } else {
                let mut item = CacheItem::new(rid.clone());
                let (tx, rx) = oneshot::channel();
                item.waiters.push(tx);
                st.items.insert(rid.clone(), item);
                (rx, true)
            }
        };

        if must_send {
            let kind = RequestKind::Subscribe { rid: rid.clone() };
            if let Err(e) = requests::send(&self.inner, "subscribe", &rid, None, None, kind).await
            {
                let mut st = self.inner.state.lock();
                requests::fail_subscribe(&self.inner, &mut st, &rid, e.duplicate());
                return Err(e);
            }
        }

        match rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::Connection("subscription aborted".to_string())),
        }

        let st = self.inner.state.lock();
        match st.items.get(&rid).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Error(payload)) => Err(Error::from(payload.clone())),
            Some(stored) => Ok(resources::handle(
                &self.inner.state,
                &rid,
                stored.res_type(),
            )),
            None => Err(Error::Protocol(format!(
                "resource {rid} not in cache after subscribe"
            ))),
        }
    }

    /// A handle to an already-cached resource, without subscribing.
    #[must_use]
    pub fn cached(&self, rid: &str) -> Option<Resource> {
        let st = self.inner.state.lock();
        let stored = st.items.get(rid)?.stored.as_ref()?;
        Some(resources::handle(
            &self.inner.state,
            &Rid::new(rid),
            stored.res_type(),
        ))
    }

    /// Call a method on a resource.
    pub async fn call(
        &self,
        rid: &str,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.request("call", rid, method, params).await
    }

    /// Call an authentication method on a resource.
    pub async fn authenticate(
        &self,
        rid: &str,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.request("auth", rid, method, params).await
    }

    async fn request(
        &self,
        action: &str,
        rid: &str,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        if rid.is_empty() {
            return Err(Error::InvalidArgument(
                "resource id must not be empty".to_string(),
            ));
        }
        if method.is_empty() {
            return Err(Error::InvalidArgument(
                "method must not be empty".to_string(),
            ));
        }
        let rid = Rid::new(rid);
        let (tx, rx) = oneshot::channel();
        requests::send(
            &self.inner,
            action,
            &rid,
            Some(method),
            params,
            RequestKind::Call { tx },
        )
        .await?;
        rx.await
            .map_err(|_| Error::Connection("request abandoned".to_string()))?
    }

    /// Create a resource. Resolves with the created resource, subscribed.
    pub async fn create(
        &self,
        rid: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Resource> {
        if rid.is_empty() {
            return Err(Error::InvalidArgument(
                "resource id must not be empty".to_string(),
            ));
        }
        let rid = Rid::new(rid);
        let (tx, rx) = oneshot::channel();
        requests::send(
            &self.inner,
            "new",
            &rid,
            None,
            params,
            RequestKind::New { tx },
        )
        .await?;
        let created = rx
            .await
            .map_err(|_| Error::Connection("request abandoned".to_string()))??;

        let st = self.inner.state.lock();
        match st.items.get(&created).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Error(payload)) => Err(Error::from(payload.clone())),
            Some(stored) => Ok(resources::handle(
                &self.inner.state,
                &created,
                stored.res_type(),
            )),
            None => Err(Error::Protocol(format!(
                "created resource {created} not in cache"
            ))),
        }
    }

    /// Update model properties with `call(rid, "set", ..)`.
    ///
    /// A property set to `None` is sent as the protocol's delete sentinel,
    /// removing it from the model.
    pub async fn set_model(
        &self,
        rid: &str,
        props: impl IntoIterator<Item = (String, Option<serde_json::Value>)>,
    ) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (key, value) in props {
            map.insert(key, value.unwrap_or_else(delete_sentinel));
        }
        self.call(rid, "set", Some(serde_json::Value::Object(map)))
            .await
    }

    /// Listen to client events (`connect`, `close`, `error`).
    ///
    /// `events` is an optional space-separated filter of event names.
    pub fn on(&self, events: Option<&str>, handler: Handler) -> HandlerId {
        self.inner.bus.on(&self.inner.namespace, events, handler)
    }

    /// Remove a client event handler.
    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.bus.off(id)
    }

    /// Listen to events of a cached resource.
    ///
    /// The listener anchors the resource: it will not be evicted while
    /// listeners remain. Fails if the resource is not cached.
    pub fn resource_on(
        &self,
        rid: &str,
        events: Option<&str>,
        handler: Handler,
    ) -> Result<HandlerId> {
        let rid = Rid::new(rid);
        {
            let mut st = self.inner.state.lock();
            let Some(item) = st.items.get_mut(&rid) else {
                return Err(Error::NotFound(rid.to_string()));
            };
            item.direct += 1;
        }
        Ok(self
            .inner
            .bus
            .on(&self.resource_target(&rid), events, handler))
    }

    /// Remove a resource event handler, releasing its anchor.
    ///
    /// When the last listener goes, the client unsubscribes the resource
    /// and evicts whatever the reference graph no longer reaches.
    pub fn resource_off(&self, rid: &str, id: HandlerId) -> Result<()> {
        let rid = Rid::new(rid);
        if !self.inner.bus.off_matching(id, &self.resource_target(&rid)) {
            return Err(Error::NotFound(format!("no such handler on {rid}")));
        }
        let mut st = self.inner.state.lock();
        let Some(item) = st.items.get_mut(&rid) else {
            return Err(Error::NotFound(rid.to_string()));
        };
        item.direct = item.direct.saturating_sub(1);
        if item.direct > 0 {
            return Ok(());
        }
        if item.subscribed {
            if st.is_connected() {
                let kind = RequestKind::Unsubscribe { rid: rid.clone() };
                if let Err(e) =
                    requests::send_locked(&mut st, "unsubscribe", &rid, None, None, kind)
                {
                    tracing::debug!(rid = %rid, "unsubscribe failed to send: {e}");
                }
            } else if let Some(item) = st.items.get_mut(&rid) {
                item.subscribed = false;
                coordinator::try_delete(&self.inner, &mut st, &rid);
            }
        } else {
            coordinator::try_delete(&self.inner, &mut st, &rid);
        }
        Ok(())
    }

    /// Register a model factory for resource ids matching `pattern`.
    ///
    /// Patterns are dot-separated with `*` matching one segment and a
    /// trailing `>` matching the rest, e.g. `library.book.*`.
    pub fn register_model_type(&self, pattern: &str, factory: ModelFactory) -> Result<()> {
        self.inner.state.lock().model_types.add(pattern, factory)
    }

    /// Remove a model factory registration.
    pub fn unregister_model_type(&self, pattern: &str) -> Option<ModelFactory> {
        self.inner.state.lock().model_types.remove(pattern)
    }

    /// Register a collection factory for resource ids matching `pattern`.
    pub fn register_collection_type(
        &self,
        pattern: &str,
        factory: CollectionFactory,
    ) -> Result<()> {
        self.inner
            .state
            .lock()
            .collection_types
            .add(pattern, factory)
    }

    /// Remove a collection factory registration.
    pub fn unregister_collection_type(&self, pattern: &str) -> Option<CollectionFactory> {
        self.inner.state.lock().collection_types.remove(pattern)
    }

    fn resource_target(&self, rid: &Rid) -> String {
        format!("{}.resource.{}", self.inner.namespace, rid)
    }
}

impl std::fmt::Debug for ResClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("ResClient")
            .field("host_url", &self.inner.host_url)
            .field("namespace", &self.inner.namespace)
            .field("connected", &st.is_connected())
            .field("cached_resources", &st.items.len())
            .finish()
    }
}
