//! Per-resource cache records.

use crate::error::Result;
use crate::resources::{ResourceType, Stored};
use crate::types::Rid;
use tokio::sync::oneshot;

/// The cache record for a single resource.
///
/// Tracks the two kinds of anchors that keep a resource alive: `direct`
/// counts application listeners registered through the client, `indirect`
/// counts inbound references from other cached resources. A resource with no
/// anchors and no subscription is eligible for eviction.
#[derive(Debug)]
pub(crate) struct CacheItem {
    pub rid: Rid,
    /// Kind, fixed the first time the resource is materialized.
    pub res_type: Option<ResourceType>,
    /// Materialized data, absent while the initial subscribe is in flight.
    pub stored: Option<Stored>,
    /// Whether the gateway currently considers this client subscribed.
    pub subscribed: bool,
    /// Application listeners registered on this resource.
    pub direct: usize,
    /// Inbound references from other cached resources.
    pub indirect: usize,
    /// Callers waiting on the in-flight initial subscription.
    pub waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl CacheItem {
    pub(crate) fn new(rid: Rid) -> Self {
        CacheItem {
            rid,
            res_type: None,
            stored: None,
            subscribed: false,
            direct: 0,
            indirect: 0,
            waiters: Vec::new(),
        }
    }

    /// Outbound resource references, with multiplicity.
    pub(crate) fn refs(&self) -> Vec<Rid> {
        self.stored.as_ref().map_or_else(Vec::new, Stored::refs)
    }

    /// Whether nothing anchors this resource.
    pub(crate) fn is_unused(&self) -> bool {
        self.direct == 0 && self.indirect == 0 && !self.subscribed
    }

    pub(crate) fn drain_waiters(&mut self) -> Vec<oneshot::Sender<Result<()>>> {
        std::mem::take(&mut self.waiters)
    }
}
