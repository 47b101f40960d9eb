//! Resource values and wire-value classification.

use crate::error::{Error, Result};
use crate::types::Rid;

/// A value held by a cached resource.
///
/// Model properties and collection elements are either plain JSON or a
/// reference to another cached resource. References carry only the target's
/// [`Rid`]; the referenced value itself lives in the cache, which keeps
/// cyclic resource graphs representable without ownership cycles.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A plain JSON value (string, number, bool or null).
    Json(serde_json::Value),
    /// A reference to another cached resource.
    Resource(Rid),
}

impl Value {
    /// Whether this value references another resource.
    #[inline]
    #[must_use]
    pub fn is_resource(&self) -> bool {
        matches!(self, Value::Resource(_))
    }

    /// The referenced resource id, if this is a reference.
    #[must_use]
    pub fn as_rid(&self) -> Option<&Rid> {
        match self {
            Value::Resource(rid) => Some(rid),
            Value::Json(_) => None,
        }
    }

    /// The plain JSON value, if this is not a reference.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            Value::Resource(_) => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// A classified value slot from the wire.
///
/// Objects are reserved by the protocol: `{"rid": ..}` is a resource
/// reference and `{"action": "delete"}` is the delete sentinel. Any other
/// object or array in a value slot is a protocol violation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WireValue {
    Json(serde_json::Value),
    Ref(Rid),
    Delete,
}

impl WireValue {
    pub(crate) fn classify(v: serde_json::Value) -> Result<WireValue> {
        match v {
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::String(rid)) = map.get("rid") {
                    Ok(WireValue::Ref(Rid::new(rid.clone())))
                } else if map.get("action").and_then(|a| a.as_str()) == Some("delete") {
                    Ok(WireValue::Delete)
                } else {
                    Err(Error::Protocol(format!(
                        "unsupported value object: {}",
                        serde_json::Value::Object(map)
                    )))
                }
            }
            serde_json::Value::Array(_) => {
                Err(Error::Protocol("unsupported array value".to_string()))
            }
            other => Ok(WireValue::Json(other)),
        }
    }
}

/// The `{"action": "delete"}` sentinel used on the wire to remove a property.
pub(crate) fn delete_sentinel() -> serde_json::Value {
    serde_json::json!({ "action": "delete" })
}
