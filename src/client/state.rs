//! Shared client state.
//!
//! Everything the protocol handlers mutate lives in one [`State`] behind a
//! single mutex: the resource cache, the stale set, the outstanding-request
//! table and the connection state. Handlers lock it for the duration of one
//! message or API call and never across an await; user-visible events are
//! collected as [`Emission`]s under the lock and dispatched after release,
//! so event handlers may re-enter the client.

use crate::bus::EventData;
use crate::cache::{CacheItem, TypeList};
use crate::client::requests::PendingRequest;
use crate::resources::{CollectionFactory, ModelFactory};
use crate::types::Rid;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub(crate) type SharedState = Arc<Mutex<State>>;

/// Connection lifecycle.
pub(crate) enum ConnState {
    Disconnected,
    Connecting,
    Connected {
        /// Outbound frame channel. Dropping it closes the transport.
        sender: mpsc::UnboundedSender<String>,
        /// Distinguishes this connection from earlier ones in late
        /// callbacks.
        epoch: u64,
        /// True once the connect hook has run and stale resources have been
        /// resubscribed.
        ready: bool,
    },
}

pub(crate) struct State {
    pub items: HashMap<Rid, CacheItem>,
    pub stale: HashSet<Rid>,
    pub requests: HashMap<u64, PendingRequest>,
    pub next_request_id: u64,
    pub conn: ConnState,
    pub conn_epoch: u64,
    pub try_connect: bool,
    pub connect_waiters: Vec<oneshot::Sender<crate::error::Result<()>>>,
    pub model_types: TypeList<ModelFactory>,
    pub collection_types: TypeList<CollectionFactory>,
}

impl State {
    pub(crate) fn new() -> Self {
        State {
            items: HashMap::new(),
            stale: HashSet::new(),
            requests: HashMap::new(),
            next_request_id: 1,
            conn: ConnState::Disconnected,
            conn_epoch: 0,
            try_connect: false,
            connect_waiters: Vec::new(),
            model_types: TypeList::new(),
            collection_types: TypeList::new(),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        matches!(self.conn, ConnState::Connected { .. })
    }
}

/// Target half of an event subject.
pub(crate) enum EmitTarget {
    Client,
    Resource(Rid),
}

/// An event collected under the state lock, dispatched after release.
pub(crate) struct Emission {
    pub target: EmitTarget,
    pub event: String,
    pub data: EventData,
}

impl Emission {
    pub(crate) fn client(event: &str, data: EventData) -> Self {
        Emission {
            target: EmitTarget::Client,
            event: event.to_string(),
            data,
        }
    }

    pub(crate) fn resource(rid: &Rid, event: &str, data: EventData) -> Self {
        Emission {
            target: EmitTarget::Resource(rid.clone()),
            event: event.to_string(),
            data,
        }
    }
}
