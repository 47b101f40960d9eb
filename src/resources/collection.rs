//! Collection resources.

use crate::client::state::SharedState;
use crate::resources::Stored;
use crate::types::{Rid, Value};

/// The materialized element sequence of a collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionData {
    items: Vec<Value>,
}

impl CollectionData {
    /// Create an empty collection wrapper.
    #[must_use]
    pub fn new() -> Self {
        CollectionData::default()
    }

    /// Set the initial element sequence.
    pub(crate) fn init(&mut self, items: Vec<Value>) {
        self.items = items;
    }

    pub(crate) fn items(&self) -> &[Value] {
        &self.items
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn insert(&mut self, idx: usize, value: Value) {
        self.items.insert(idx, value);
    }

    pub(crate) fn remove(&mut self, idx: usize) -> Value {
        self.items.remove(idx)
    }
}

/// A handle to a cached collection.
///
/// Reads go through the client's cache, so the handle always reflects the
/// latest synchronized state. After the resource is evicted, reads return
/// empty results.
#[derive(Clone)]
pub struct Collection {
    rid: Rid,
    state: SharedState,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("rid", &self.rid).finish()
    }
}

impl Collection {
    pub(crate) fn new(rid: Rid, state: SharedState) -> Self {
        Collection { rid, state }
    }

    /// The resource id.
    #[must_use]
    pub fn rid(&self) -> &Rid {
        &self.rid
    }

    /// The element at `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Value> {
        let st = self.state.lock();
        match st.items.get(&self.rid).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Collection(c)) => c.items.get(idx).cloned(),
            _ => None,
        }
    }

    /// A snapshot of all elements.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        let st = self.state.lock();
        match st.items.get(&self.rid).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Collection(c)) => c.items.clone(),
            _ => Vec::new(),
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        let st = self.state.lock();
        match st.items.get(&self.rid).and_then(|i| i.stored.as_ref()) {
            Some(Stored::Collection(c)) => c.items.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_remove() {
        let mut data = CollectionData::new();
        data.init(vec![Value::Json(json!(1)), Value::Json(json!(3))]);
        data.insert(1, Value::Json(json!(2)));
        assert_eq!(
            data.items(),
            &[
                Value::Json(json!(1)),
                Value::Json(json!(2)),
                Value::Json(json!(3))
            ]
        );
        let removed = data.remove(0);
        assert_eq!(removed, Value::Json(json!(1)));
        assert_eq!(data.len(), 2);
    }
}
