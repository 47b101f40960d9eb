//! Cache coordination: materialization, eviction and staling.
//!
//! Materializing a response bundle is a three-phase operation so that
//! cyclic reference graphs resolve without recursion:
//!
//! 1. **create**: ensure a cache entry exists for every resource in the
//!    bundle and pin its kind. Entries that already hold data are set aside
//!    for synchronization instead.
//! 2. **init**: resolve reference values against the cache (every target
//!    now has an entry), count the new inbound edges, and populate the
//!    fresh wrappers. No user-visible events are produced.
//! 3. **sync**: reconcile pre-existing entries against the new snapshots,
//!    emitting exactly the events the application needs to catch up.

use crate::bus::EventData;
use crate::cache::{self, CacheItem, RefState};
use crate::client::client::ClientInner;
use crate::client::state::{Emission, State};
use crate::client::{connection, events};
use crate::diff::{self, DiffOp};
use crate::resources::{CollectionData, ModelData, ResourceType, Stored};
use crate::types::{delete_sentinel, Bundle, Rid, Value, WireValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Materialize a response bundle into the cache.
pub(crate) fn materialize(
    inner: &Arc<ClientInner>,
    state: &mut State,
    bundle: Bundle,
    emits: &mut Vec<Emission>,
) {
    if bundle.is_empty() {
        return;
    }
    let Bundle {
        models,
        collections,
        errors,
    } = bundle;

    // Phase 1: create.
    let mut fresh_models = Vec::new();
    let mut sync_models = Vec::new();
    for rid in models.keys() {
        classify_create(state, rid, ResourceType::Model, &mut fresh_models, &mut sync_models);
    }
    let mut fresh_collections = Vec::new();
    let mut sync_collections = Vec::new();
    for rid in collections.keys() {
        classify_create(
            state,
            rid,
            ResourceType::Collection,
            &mut fresh_collections,
            &mut sync_collections,
        );
    }
    let mut fresh_errors = Vec::new();
    let mut sync_errors = Vec::new();
    for rid in errors.keys() {
        classify_create(state, rid, ResourceType::Error, &mut fresh_errors, &mut sync_errors);
    }

    // Phase 2: init.
    for rid in &fresh_errors {
        if let Some(payload) = errors.get(rid) {
            if let Some(item) = state.items.get_mut(rid) {
                item.stored = Some(Stored::Error(payload.clone()));
            }
        }
    }
    for rid in &fresh_models {
        let Some(raw) = models.get(rid) else { continue };
        let props = prepare_props(state, raw);
        let factory = state.model_types.get(rid.as_str()).cloned();
        let mut data = match factory {
            Some(make) => make(rid),
            None => ModelData::new(),
        };
        data.init(props);
        if let Some(item) = state.items.get_mut(rid) {
            item.stored = Some(Stored::Model(data));
        }
    }
    for rid in &fresh_collections {
        let Some(raw) = collections.get(rid) else { continue };
        let elements = prepare_elements(state, raw);
        let factory = state.collection_types.get(rid.as_str()).cloned();
        let mut data = match factory {
            Some(make) => make(rid),
            None => CollectionData::new(),
        };
        data.init(elements);
        if let Some(item) = state.items.get_mut(rid) {
            item.stored = Some(Stored::Collection(data));
        }
    }

    // Phase 3: sync.
    for rid in &sync_models {
        if let Some(raw) = models.get(rid) {
            sync_model(inner, state, rid, raw, emits);
        }
    }
    for rid in &sync_collections {
        if let Some(raw) = collections.get(rid) {
            sync_collection(inner, state, rid, raw, emits);
        }
    }
    for rid in &sync_errors {
        if let Some(payload) = errors.get(rid) {
            if let Some(item) = state.items.get_mut(rid) {
                item.stored = Some(Stored::Error(payload.clone()));
            }
        }
    }
}

fn classify_create(
    state: &mut State,
    rid: &Rid,
    res_type: ResourceType,
    fresh: &mut Vec<Rid>,
    syncs: &mut Vec<Rid>,
) {
    let item = state
        .items
        .entry(rid.clone())
        .or_insert_with(|| CacheItem::new(rid.clone()));
    match item.res_type {
        None => {
            item.res_type = Some(res_type);
            fresh.push(rid.clone());
        }
        Some(existing) if existing == res_type => {
            if item.stored.is_some() {
                syncs.push(rid.clone());
            } else {
                fresh.push(rid.clone());
            }
        }
        Some(existing) => {
            tracing::error!(
                rid = %rid,
                ?existing,
                incoming = ?res_type,
                "resource type mismatch, skipping materialization"
            );
        }
    }
}

/// Resolve a reference value, counting the new inbound edge. A reference to
/// a resource the cache has never seen is a protocol violation; the raw
/// JSON is kept in its place.
fn resolve_ref(state: &mut State, rid: Rid, raw: &serde_json::Value) -> Value {
    match state.items.get_mut(&rid) {
        Some(target) => {
            target.indirect += 1;
            Value::Resource(rid)
        }
        None => {
            tracing::error!(rid = %rid, "reference to unknown resource");
            Value::Json(raw.clone())
        }
    }
}

fn prepare_props(
    state: &mut State,
    raw: &serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, Value> {
    let mut props = BTreeMap::new();
    for (key, value) in raw {
        match WireValue::classify(value.clone()) {
            Ok(WireValue::Json(json)) => {
                props.insert(key.clone(), Value::Json(json));
            }
            Ok(WireValue::Ref(rid)) => {
                props.insert(key.clone(), resolve_ref(state, rid, value));
            }
            Ok(WireValue::Delete) => {
                tracing::error!(key = %key, "delete sentinel in resource snapshot");
            }
            Err(e) => {
                tracing::error!(key = %key, "{e}");
            }
        }
    }
    props
}

fn prepare_elements(state: &mut State, raw: &[serde_json::Value]) -> Vec<Value> {
    let mut elements = Vec::with_capacity(raw.len());
    for value in raw {
        match WireValue::classify(value.clone()) {
            Ok(WireValue::Json(json)) => elements.push(Value::Json(json)),
            Ok(WireValue::Ref(rid)) => elements.push(resolve_ref(state, rid, value)),
            Ok(WireValue::Delete) => {
                tracing::error!("delete sentinel in collection snapshot");
            }
            Err(e) => {
                tracing::error!("{e}");
            }
        }
    }
    elements
}

/// Reconcile a cached model against a fresh snapshot. The snapshot is
/// authoritative, so keys it lacks are deletions.
fn sync_model(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    raw: &serde_json::Map<String, serde_json::Value>,
    emits: &mut Vec<Emission>,
) {
    let existing: Vec<String> = match state.items.get(rid).and_then(|i| i.stored.as_ref()) {
        Some(Stored::Model(m)) => m.props().keys().cloned().collect(),
        _ => return,
    };
    let mut values = raw.clone();
    for key in existing {
        if !values.contains_key(&key) {
            values.insert(key, delete_sentinel());
        }
    }
    events::apply_change(inner, state, rid, values, emits);
}

/// Reconcile a cached collection against a fresh snapshot, emitting the
/// remove and add events the missed event stream would have produced.
/// Elements on the common subsequence keep their identity.
fn sync_collection(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    raw: &[serde_json::Value],
    emits: &mut Vec<Emission>,
) {
    let current: Vec<Value> = match state.items.get(rid).and_then(|i| i.stored.as_ref()) {
        Some(Stored::Collection(c)) => c.items().to_vec(),
        _ => return,
    };
    // Resolve the target sequence without touching reference counts; the
    // per-operation bookkeeping below settles them.
    let mut target = Vec::with_capacity(raw.len());
    for value in raw {
        match WireValue::classify(value.clone()) {
            Ok(WireValue::Json(json)) => target.push(Value::Json(json)),
            Ok(WireValue::Ref(r)) => {
                if state.items.contains_key(&r) {
                    target.push(Value::Resource(r));
                } else {
                    tracing::error!(rid = %r, "reference to unknown resource");
                    target.push(Value::Json(value.clone()));
                }
            }
            Ok(WireValue::Delete) => {
                tracing::error!("delete sentinel in collection snapshot");
            }
            Err(e) => {
                tracing::error!("{e}");
            }
        }
    }

    let ops = diff::diff(&current, &target);
    let mut severed: Vec<Rid> = Vec::new();
    for op in ops {
        match op {
            DiffOp::Remove { idx } => {
                let removed = match collection_of(state, rid) {
                    Some(c) if idx < c.len() => c.remove(idx),
                    _ => continue,
                };
                if let Value::Resource(r) = &removed {
                    dec_indirect(state, r);
                    severed.push(r.clone());
                }
                emits.push(Emission::resource(
                    rid,
                    "remove",
                    EventData::Remove { value: removed, idx },
                ));
            }
            DiffOp::Add { idx, value } => {
                if let Value::Resource(r) = &value {
                    if let Some(t) = state.items.get_mut(r) {
                        t.indirect += 1;
                    }
                }
                match collection_of(state, rid) {
                    Some(c) if idx <= c.len() => c.insert(idx, value.clone()),
                    _ => continue,
                }
                emits.push(Emission::resource(rid, "add", EventData::Add { value, idx }));
            }
        }
    }
    // Severed references are re-examined only after the whole patch has
    // been applied, so an element that merely moved is never evicted.
    severed.sort();
    severed.dedup();
    for r in severed {
        try_delete(inner, state, &r);
    }
}

fn collection_of<'a>(state: &'a mut State, rid: &Rid) -> Option<&'a mut CollectionData> {
    match state.items.get_mut(rid).and_then(|i| i.stored.as_mut()) {
        Some(Stored::Collection(c)) => Some(c),
        _ => None,
    }
}

pub(crate) fn dec_indirect(state: &mut State, rid: &Rid) {
    if let Some(target) = state.items.get_mut(rid) {
        target.indirect = target.indirect.saturating_sub(1);
    }
}

/// Re-examine a resource that may have lost its last anchor, evicting or
/// staling everything the classification marks. Eviction does not recurse:
/// the classification already accounts for the whole cascade.
pub(crate) fn try_delete(inner: &Arc<ClientInner>, state: &mut State, rid: &Rid) {
    let Some(item) = state.items.get(rid) else {
        return;
    };
    if item.subscribed {
        return;
    }
    let classified = cache::evaluate(&state.items, rid);
    for (r, entry) in classified {
        match entry.state {
            RefState::Delete => evict(state, &r),
            RefState::Stale => set_stale(inner, state, &r),
            RefState::Keep | RefState::None => {}
        }
    }
}

/// Drop a resource from the cache, severing its outbound edges.
pub(crate) fn evict(state: &mut State, rid: &Rid) {
    let Some(mut item) = state.items.remove(rid) else {
        return;
    };
    state.stale.remove(rid);
    for r in item.refs() {
        dec_indirect(state, &r);
    }
    // Dropping the waiters errors anyone still awaiting the subscription.
    drop(item.drain_waiters());
    tracing::debug!(rid = %rid, "evicted resource");
}

/// Demote a resource to stale. While connected, resubscription is scheduled
/// after the configured delay; membership is rechecked when the timer
/// fires, so a resource evicted in the meantime never hits the wire.
pub(crate) fn set_stale(inner: &Arc<ClientInner>, state: &mut State, rid: &Rid) {
    if !state.items.contains_key(rid) {
        return;
    }
    if !state.stale.insert(rid.clone()) {
        return;
    }
    tracing::debug!(rid = %rid, "resource is stale");
    if state.is_connected() {
        let inner = inner.clone();
        let rid = rid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.subscribe_stale_delay).await;
            connection::subscribe_stale(&inner, &rid);
        });
    }
}
