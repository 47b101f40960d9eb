//! Model resources.

use crate::client::state::SharedState;
use crate::resources::Stored;
use crate::types::{Rid, Value};
use std::collections::BTreeMap;

/// The materialized property map of a model.
///
/// Property values are plain JSON or references to other cached resources.
/// Mutation goes through [`ModelData::update`], which applies a prepared
/// change set and reports what actually changed so the client can emit a
/// minimal `change` event.
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    props: BTreeMap<String, Value>,
}

/// Outcome of applying a change set to a model.
#[derive(Debug, Clone)]
pub(crate) struct ModelUpdate {
    /// Prior value of every key in the change set, `None` if absent.
    pub old_values: BTreeMap<String, Option<Value>>,
    /// Prior values of only the keys whose value actually changed.
    pub changed: BTreeMap<String, Option<Value>>,
}

impl ModelData {
    /// Create an empty model wrapper.
    #[must_use]
    pub fn new() -> Self {
        ModelData::default()
    }

    /// Set the initial property map.
    pub(crate) fn init(&mut self, props: BTreeMap<String, Value>) {
        self.props = props;
    }

    pub(crate) fn props(&self) -> &BTreeMap<String, Value> {
        &self.props
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> {
        self.props.values()
    }

    /// Apply a change set. `None` deletes the key.
    pub(crate) fn update(
        &mut self,
        values: BTreeMap<String, Option<Value>>,
    ) -> ModelUpdate {
        let mut old_values = BTreeMap::new();
        let mut changed = BTreeMap::new();
        for (key, new_value) in values {
            let old = self.props.get(&key).cloned();
            match new_value {
                Some(v) => {
                    if old.as_ref() != Some(&v) {
                        changed.insert(key.clone(), old.clone());
                        self.props.insert(key.clone(), v);
                    }
                }
                None => {
                    if old.is_some() {
                        changed.insert(key.clone(), old.clone());
                        self.props.remove(&key);
                    }
                }
            }
            old_values.insert(key, old);
        }
        ModelUpdate {
            old_values,
            changed,
        }
    }
}

/// A handle to a cached model.
///
/// Reads go through the client's cache, so the handle always reflects the
/// latest synchronized state. After the resource is evicted, reads return
/// empty results.
#[derive(Clone)]
pub struct Model {
    rid: Rid,
    state: SharedState,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").field("rid", &self.rid).finish()
    }
}

impl Model {
    pub(crate) fn new(rid: Rid, state: SharedState) -> Self {
        Model { rid, state }
    }

    /// The resource id.
    #[must_use]
    pub fn rid(&self) -> &Rid {
        &self.rid
    }

    /// The current value of a property.
    #[must_use]
    pub fn prop(&self, key: &str) -> Option<Value> {
        let st = self.state.lock();
        match st.items.get(&self.rid).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Model(m)) => m.props.get(key).cloned(),
            _ => None,
        }
    }

    /// A snapshot of all properties.
    #[must_use]
    pub fn props(&self) -> BTreeMap<String, Value> {
        let st = self.state.lock();
        match st.items.get(&self.rid).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Model(m)) => m.props.clone(),
            _ => BTreeMap::new(),
        }
    }
}
