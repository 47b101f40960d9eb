//! Resource wrappers: models, collections and error resources.
//!
//! A cached resource is one of three kinds. The materialized data lives in
//! the client's cache; the public [`Model`], [`Collection`] and
//! [`ResourceError`] types are lightweight handles that read through it, so
//! two handles for the same resource id always observe the same value.

mod collection;
mod model;

pub use collection::{Collection, CollectionData};
pub use model::{Model, ModelData};

use crate::client::state::SharedState;
use crate::types::{ErrorPayload, Rid};
use std::sync::Arc;

/// The kind of a cached resource, fixed at first materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Model,
    Collection,
    Error,
}

/// Constructs the model wrapper for a resource id matched by a registered
/// pattern. The returned wrapper is populated by the client afterwards.
pub type ModelFactory = Arc<dyn Fn(&Rid) -> ModelData + Send + Sync>;

/// Constructs the collection wrapper for a resource id matched by a
/// registered pattern.
pub type CollectionFactory = Arc<dyn Fn(&Rid) -> CollectionData + Send + Sync>;

/// Materialized resource data held by a cache entry.
#[derive(Debug, Clone)]
pub(crate) enum Stored {
    Model(ModelData),
    Collection(CollectionData),
    Error(ErrorPayload),
}

impl Stored {
    pub(crate) fn res_type(&self) -> ResourceType {
        match self {
            Stored::Model(_) => ResourceType::Model,
            Stored::Collection(_) => ResourceType::Collection,
            Stored::Error(_) => ResourceType::Error,
        }
    }

    /// Outbound resource references, with multiplicity.
    pub(crate) fn refs(&self) -> Vec<Rid> {
        match self {
            Stored::Model(m) => m
                .values()
                .filter_map(|v| v.as_rid().cloned())
                .collect(),
            Stored::Collection(c) => c
                .values()
                .filter_map(|v| v.as_rid().cloned())
                .collect(),
            Stored::Error(_) => Vec::new(),
        }
    }
}

/// A handle to a cached resource.
#[derive(Debug, Clone)]
pub enum Resource {
    Model(Model),
    Collection(Collection),
    Error(ResourceError),
}

impl Resource {
    /// The resource id.
    #[must_use]
    pub fn rid(&self) -> &Rid {
        match self {
            Resource::Model(m) => m.rid(),
            Resource::Collection(c) => c.rid(),
            Resource::Error(e) => e.rid(),
        }
    }

    #[must_use]
    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Resource::Model(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Resource::Collection(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Resource::Error(_))
    }
}

/// A handle to a cached error resource, e.g. a reference target the gateway
/// could not deliver.
#[derive(Clone)]
pub struct ResourceError {
    rid: Rid,
    state: SharedState,
}

impl std::fmt::Debug for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceError")
            .field("rid", &self.rid)
            .finish()
    }
}

impl ResourceError {
    pub(crate) fn new(rid: Rid, state: SharedState) -> Self {
        ResourceError { rid, state }
    }

    /// The resource id.
    #[must_use]
    pub fn rid(&self) -> &Rid {
        &self.rid
    }

    /// The error payload, or `None` if the resource has been evicted.
    #[must_use]
    pub fn error(&self) -> Option<ErrorPayload> {
        let st = self.state.lock();
        match st.items.get(&self.rid).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Error(payload)) => Some(payload.clone()),
            _ => None,
        }
    }
}

/// Build the public handle for a cached resource of a known kind.
pub(crate) fn handle(state: &SharedState, rid: &Rid, res_type: ResourceType) -> Resource {
    match res_type {
        ResourceType::Model => Resource::Model(Model::new(rid.clone(), state.clone())),
        ResourceType::Collection => {
            Resource::Collection(Collection::new(rid.clone(), state.clone()))
        }
        ResourceType::Error => Resource::Error(ResourceError::new(rid.clone(), state.clone())),
    }
}
