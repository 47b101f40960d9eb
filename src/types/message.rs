//! Wire frames of the RES protocol.
//!
//! The protocol exchanges JSON text frames of three shapes: outbound
//! requests `{id, method, params?}`, inbound responses `{id, result}` or
//! `{id, error}`, and inbound events `{event, data?}`. Resource data rides
//! along in a [`Bundle`] of models, collections and errors keyed by
//! resource id.

use crate::error::{Error, Result};
use crate::types::Rid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An outbound request frame.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RequestFrame {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A structured error as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Dot-separated error code, e.g. `system.notFound`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional additional error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A parsed inbound frame.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Successful response to an outbound request.
    Response { id: u64, result: serde_json::Value },
    /// Error response to an outbound request.
    Failure { id: u64, error: ErrorPayload },
    /// Server-pushed event, subject `<rid>.<event>`.
    Event {
        subject: String,
        data: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    id: Option<u64>,
    result: Option<serde_json::Value>,
    error: Option<ErrorPayload>,
    event: Option<String>,
    data: Option<serde_json::Value>,
}

/// Parse one inbound text frame.
pub(crate) fn parse_frame(text: &str) -> Result<Inbound> {
    let raw: RawEnvelope = serde_json::from_str(text)?;
    if let Some(subject) = raw.event {
        return Ok(Inbound::Event {
            subject,
            data: raw.data.unwrap_or(serde_json::Value::Null),
        });
    }
    let id = raw
        .id
        .ok_or_else(|| Error::Protocol(format!("frame without id or event: {text}")))?;
    if let Some(error) = raw.error {
        return Ok(Inbound::Failure { id, error });
    }
    Ok(Inbound::Response {
        id,
        result: raw.result.unwrap_or(serde_json::Value::Null),
    })
}

/// Split an event subject into `(rid, event name)` at the last dot.
pub(crate) fn split_subject(subject: &str) -> Result<(Rid, &str)> {
    match subject.rsplit_once('.') {
        Some((rid, event)) if !rid.is_empty() && !event.is_empty() => Ok((Rid::new(rid), event)),
        _ => Err(Error::Protocol(format!("malformed event subject: {subject}"))),
    }
}

/// Resource data side-loaded in a response or event.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Bundle {
    #[serde(default)]
    pub models: HashMap<Rid, serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub collections: HashMap<Rid, Vec<serde_json::Value>>,
    #[serde(default)]
    pub errors: HashMap<Rid, ErrorPayload>,
}

impl Bundle {
    pub(crate) fn is_empty(&self) -> bool {
        self.models.is_empty() && self.collections.is_empty() && self.errors.is_empty()
    }
}
