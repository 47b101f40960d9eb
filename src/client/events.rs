//! Inbound event pipeline.
//!
//! Event subjects are `<rid>.<event>`, split at the last dot. The four
//! protocol events mutate the cache; anything else passes through to the
//! event bus untouched. Events for resources the cache does not hold are
//! protocol violations: the gateway must not push to an unsubscribed
//! client.

use crate::bus::EventData;
use crate::client::client::ClientInner;
use crate::client::coordinator;
use crate::client::state::{Emission, State};
use crate::resources::Stored;
use crate::types::{split_subject, Bundle, Rid, Value, WireValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) fn handle_event(
    inner: &Arc<ClientInner>,
    state: &mut State,
    subject: &str,
    data: serde_json::Value,
    emits: &mut Vec<Emission>,
) {
    let (rid, event) = match split_subject(subject) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!("{e}");
            return;
        }
    };
    if !state.items.contains_key(&rid) {
        tracing::error!(rid = %rid, event, "event for resource not in cache");
        return;
    }
    match event {
        "change" => handle_change(inner, state, &rid, data, emits),
        "add" => handle_add(inner, state, &rid, data, emits),
        "remove" => handle_remove(inner, state, &rid, data, emits),
        "unsubscribe" => handle_unsubscribe(inner, state, &rid, emits),
        _ => emits.push(Emission::resource(&rid, event, EventData::Json(data))),
    }
}

fn handle_change(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    data: serde_json::Value,
    emits: &mut Vec<Emission>,
) {
    #[derive(Deserialize)]
    struct ChangePayload {
        #[serde(default)]
        values: serde_json::Map<String, serde_json::Value>,
        #[serde(flatten)]
        bundle: Bundle,
    }
    let payload: ChangePayload = match serde_json::from_value(data) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(rid = %rid, "malformed change event: {e}");
            return;
        }
    };
    coordinator::materialize(inner, state, payload.bundle, emits);
    apply_change(inner, state, rid, payload.values, emits);
}

/// Apply a prepared set of property changes to a model.
///
/// New reference values gain their inbound edge before old values lose
/// theirs, so a reference removed and re-added in the same change nets to
/// zero and is never evicted in between.
pub(crate) fn apply_change(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    values: serde_json::Map<String, serde_json::Value>,
    emits: &mut Vec<Emission>,
) {
    match state.items.get(rid).and_then(|i| i.stored.as_ref()) {
        Some(Stored::Model(_)) => {}
        _ => {
            tracing::error!(rid = %rid, "change event on a non-model resource");
            return;
        }
    }

    let mut prepared: BTreeMap<String, Option<Value>> = BTreeMap::new();
    for (key, value) in values {
        match WireValue::classify(value.clone()) {
            Ok(WireValue::Json(json)) => {
                prepared.insert(key, Some(Value::Json(json)));
            }
            Ok(WireValue::Ref(r)) => match state.items.get_mut(&r) {
                Some(target) => {
                    target.indirect += 1;
                    prepared.insert(key, Some(Value::Resource(r)));
                }
                None => {
                    tracing::error!(rid = %r, "reference to unknown resource");
                    prepared.insert(key, Some(Value::Json(value)));
                }
            },
            Ok(WireValue::Delete) => {
                prepared.insert(key, None);
            }
            Err(e) => {
                tracing::error!(rid = %rid, key = %key, "{e}");
            }
        }
    }

    let update = {
        let Some(Stored::Model(model)) =
            state.items.get_mut(rid).and_then(|i| i.stored.as_mut())
        else {
            return;
        };
        model.update(prepared)
    };

    // Sever the old reference of every written key.
    let mut zeroed = Vec::new();
    for old in update.old_values.values().flatten() {
        if let Value::Resource(r) = old {
            if let Some(target) = state.items.get_mut(r) {
                target.indirect = target.indirect.saturating_sub(1);
                if target.indirect == 0 {
                    zeroed.push(r.clone());
                }
            }
        }
    }

    if !update.changed.is_empty() {
        emits.push(Emission::resource(
            rid,
            "change",
            EventData::Change {
                old_values: update.changed,
            },
        ));
    }
    for r in zeroed {
        coordinator::try_delete(inner, state, &r);
    }
}

fn handle_add(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    data: serde_json::Value,
    emits: &mut Vec<Emission>,
) {
    #[derive(Deserialize)]
    struct AddPayload {
        value: serde_json::Value,
        idx: usize,
        #[serde(flatten)]
        bundle: Bundle,
    }
    let payload: AddPayload = match serde_json::from_value(data) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(rid = %rid, "malformed add event: {e}");
            return;
        }
    };
    coordinator::materialize(inner, state, payload.bundle, emits);

    let len = match state.items.get(rid).and_then(|i| i.stored.as_ref()) {
        Some(Stored::Collection(c)) => c.len(),
        _ => {
            tracing::error!(rid = %rid, "add event on a non-collection resource");
            return;
        }
    };
    if payload.idx > len {
        tracing::error!(rid = %rid, idx = payload.idx, len, "add index out of bounds");
        return;
    }

    let value = match WireValue::classify(payload.value.clone()) {
        Ok(WireValue::Json(json)) => Value::Json(json),
        Ok(WireValue::Ref(r)) => match state.items.get_mut(&r) {
            Some(target) => {
                target.indirect += 1;
                Value::Resource(r)
            }
            None => {
                tracing::error!(rid = %r, "reference to unknown resource");
                Value::Json(payload.value)
            }
        },
        Ok(WireValue::Delete) | Err(_) => {
            tracing::error!(rid = %rid, "unsupported value in add event");
            return;
        }
    };

    if let Some(Stored::Collection(c)) =
        state.items.get_mut(rid).and_then(|i| i.stored.as_mut())
    {
        c.insert(payload.idx, value.clone());
    }
    emits.push(Emission::resource(
        rid,
        "add",
        EventData::Add {
            value,
            idx: payload.idx,
        },
    ));
}

fn handle_remove(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    data: serde_json::Value,
    emits: &mut Vec<Emission>,
) {
    #[derive(Deserialize)]
    struct RemovePayload {
        idx: usize,
    }
    let payload: RemovePayload = match serde_json::from_value(data) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(rid = %rid, "malformed remove event: {e}");
            return;
        }
    };
    let removed = match state.items.get_mut(rid).and_then(|i| i.stored.as_mut()) {
        Some(Stored::Collection(c)) if payload.idx < c.len() => c.remove(payload.idx),
        Some(Stored::Collection(c)) => {
            tracing::error!(rid = %rid, idx = payload.idx, len = c.len(), "remove index out of bounds");
            return;
        }
        _ => {
            tracing::error!(rid = %rid, "remove event on a non-collection resource");
            return;
        }
    };
    emits.push(Emission::resource(
        rid,
        "remove",
        EventData::Remove {
            value: removed.clone(),
            idx: payload.idx,
        },
    ));
    if let Value::Resource(r) = removed {
        coordinator::dec_indirect(state, &r);
        coordinator::try_delete(inner, state, &r);
    }
}

fn handle_unsubscribe(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    emits: &mut Vec<Emission>,
) {
    if let Some(item) = state.items.get_mut(rid) {
        item.subscribed = false;
    }
    coordinator::try_delete(inner, state, rid);
    emits.push(Emission::resource(rid, "unsubscribe", EventData::None));
}
