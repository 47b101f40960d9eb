//! Outbound request multiplexing.
//!
//! Every outbound frame carries a monotonically increasing id; the table of
//! outstanding requests maps inbound responses back to the action that sent
//! them. Subscribe and create responses are materialized into the cache
//! inside the response-handling turn, before the next frame is examined, so
//! a later event for the same resource always observes the materialized
//! state.

use crate::bus::EventData;
use crate::client::client::ClientInner;
use crate::client::state::{ConnState, Emission, State};
use crate::client::{connection, coordinator};
use crate::error::{Error, Result};
use crate::resources::ResourceType;
use crate::types::{Bundle, ErrorPayload, RequestFrame, Rid};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::oneshot;

/// What the sender of a request expects back.
pub(crate) enum RequestKind {
    /// Initial subscription or stale resubscription; the response bundle is
    /// materialized and the item's waiters resolved.
    Subscribe { rid: Rid },
    /// Server-side unsubscription of a resource this client stopped using.
    Unsubscribe { rid: Rid },
    /// A call or auth request; the raw result is handed back.
    Call {
        tx: oneshot::Sender<Result<serde_json::Value>>,
    },
    /// Resource creation; resolves with the created resource's id after the
    /// response bundle is materialized.
    New {
        tx: oneshot::Sender<Result<Rid>>,
    },
}

pub(crate) struct PendingRequest {
    pub method: String,
    pub kind: RequestKind,
}

/// Build the wire method string `<action>.<rid>[.<name>]`.
pub(crate) fn method_string(action: &str, rid: &Rid, method: Option<&str>) -> String {
    match method {
        Some(name) => format!("{action}.{rid}.{name}"),
        None => format!("{action}.{rid}"),
    }
}

/// Frame and send a request on the current connection.
pub(crate) fn send_locked(
    state: &mut State,
    action: &str,
    rid: &Rid,
    method: Option<&str>,
    params: Option<serde_json::Value>,
    kind: RequestKind,
) -> Result<()> {
    let ConnState::Connected { sender, .. } = &state.conn else {
        return Err(Error::Connection("not connected".to_string()));
    };
    let id = state.next_request_id;
    let method = method_string(action, rid, method);
    let frame = serde_json::to_string(&RequestFrame {
        id,
        method: method.clone(),
        params,
    })?;
    if sender.send(frame).is_err() {
        return Err(Error::Connection("connection closed".to_string()));
    }
    state.next_request_id += 1;
    state.requests.insert(id, PendingRequest { method, kind });
    Ok(())
}

/// Send a request, connecting first if necessary.
///
/// A request issued while disconnected waits for the connection to come up;
/// connection failure rejects the request with the underlying cause.
pub(crate) async fn send(
    inner: &Arc<ClientInner>,
    action: &str,
    rid: &Rid,
    method: Option<&str>,
    params: Option<serde_json::Value>,
    kind: RequestKind,
) -> Result<()> {
    let mut kind = Some(kind);
    let mut params = Some(params);
    loop {
        let rx = {
            let mut st = inner.state.lock();
            if st.is_connected() {
                return send_locked(
                    &mut st,
                    action,
                    rid,
                    method,
                    params.take().unwrap_or(None),
                    kind.take().expect("request kind consumed"),
                );
            }
            let (tx, rx) = oneshot::channel();
            st.connect_waiters.push(tx);
            st.try_connect = true;
            if matches!(st.conn, ConnState::Disconnected) {
                st.conn = ConnState::Connecting;
                connection::spawn_connect(inner);
            }
            rx
        };
        rx.await
            .map_err(|_| Error::Connection("connect aborted".to_string()))??;
    }
}

/// Handle a successful response frame.
pub(crate) fn handle_response(
    inner: &Arc<ClientInner>,
    state: &mut State,
    id: u64,
    result: serde_json::Value,
    emits: &mut Vec<Emission>,
) {
    let Some(request) = state.requests.remove(&id) else {
        tracing::error!(id, "response without matching request");
        return;
    };
    tracing::trace!(id, method = %request.method, "response");
    match request.kind {
        RequestKind::Subscribe { rid } => {
            if !state.items.contains_key(&rid) {
                // The resource was dropped while the subscribe was in
                // flight; release the server-side subscription again.
                let unsub = RequestKind::Unsubscribe { rid: rid.clone() };
                if let Err(e) = send_locked(state, "unsubscribe", &rid, None, None, unsub) {
                    tracing::debug!(rid = %rid, "could not release orphaned subscription: {e}");
                }
                return;
            }
            let bundle: Bundle = match serde_json::from_value(result) {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(rid = %rid, "malformed subscribe response: {e}");
                    fail_subscribe(inner, state, &rid, Error::Protocol(e.to_string()));
                    return;
                }
            };
            coordinator::materialize(inner, state, bundle, emits);
            let (res_type, materialized) = match state.items.get(&rid) {
                Some(item) => (item.res_type, item.stored.is_some()),
                None => return,
            };
            match res_type {
                Some(ResourceType::Error) => {
                    let err = stored_error(state, &rid);
                    fail_subscribe(inner, state, &rid, err);
                }
                Some(_) if materialized => {
                    state.stale.remove(&rid);
                    if let Some(item) = state.items.get_mut(&rid) {
                        item.subscribed = true;
                        for waiter in item.drain_waiters() {
                            let _ = waiter.send(Ok(()));
                        }
                    }
                }
                _ => {
                    tracing::error!(rid = %rid, "subscribe response did not include the resource");
                    fail_subscribe(
                        inner,
                        state,
                        &rid,
                        Error::Protocol(format!("resource {rid} missing from response")),
                    );
                }
            }
        }
        RequestKind::Unsubscribe { rid } => {
            if let Some(item) = state.items.get_mut(&rid) {
                item.subscribed = false;
                coordinator::try_delete(inner, state, &rid);
            }
        }
        RequestKind::Call { tx } => {
            let _ = tx.send(Ok(result));
        }
        RequestKind::New { tx } => {
            #[derive(Deserialize)]
            struct NewResult {
                rid: Rid,
                #[serde(flatten)]
                bundle: Bundle,
            }
            match serde_json::from_value::<NewResult>(result) {
                Ok(new_result) => {
                    coordinator::materialize(inner, state, new_result.bundle, emits);
                    let created = new_result.rid;
                    match state.items.get_mut(&created) {
                        Some(item) if item.stored.is_some() => {
                            let is_error = item.res_type == Some(ResourceType::Error);
                            if !is_error {
                                item.subscribed = true;
                                state.stale.remove(&created);
                            }
                            let result = if is_error {
                                Err(stored_error(state, &created))
                            } else {
                                Ok(created.clone())
                            };
                            // Settles the error-resource case, which would
                            // otherwise linger with no anchors; a no-op for
                            // the subscribed resource just created.
                            coordinator::try_delete(inner, state, &created);
                            let _ = tx.send(result);
                        }
                        _ => {
                            let _ = tx.send(Err(Error::Protocol(format!(
                                "created resource {created} missing from response"
                            ))));
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("malformed new response: {e}");
                    let _ = tx.send(Err(Error::Protocol(e.to_string())));
                }
            }
        }
    }
}

/// Handle an error response frame.
pub(crate) fn handle_failure(
    inner: &Arc<ClientInner>,
    state: &mut State,
    id: u64,
    payload: ErrorPayload,
    emits: &mut Vec<Emission>,
) {
    let Some(request) = state.requests.remove(&id) else {
        tracing::error!(id, "error response without matching request");
        return;
    };
    tracing::debug!(id, method = %request.method, code = %payload.code, "request failed");
    match request.kind {
        RequestKind::Subscribe { rid } => {
            // Subscription failures reject the waiting callers without
            // raising a client-level error event.
            fail_subscribe(inner, state, &rid, Error::from(payload));
        }
        RequestKind::Unsubscribe { rid } => {
            tracing::error!(rid = %rid, code = %payload.code, "unsubscribe rejected");
            let err = Arc::new(Error::from(payload));
            emits.push(Emission::client("error", EventData::ClientError(err)));
        }
        RequestKind::Call { tx } => {
            let err = Error::from(payload);
            emits.push(Emission::client(
                "error",
                EventData::ClientError(Arc::new(err.duplicate())),
            ));
            let _ = tx.send(Err(err));
        }
        RequestKind::New { tx } => {
            let err = Error::from(payload);
            emits.push(Emission::client(
                "error",
                EventData::ClientError(Arc::new(err.duplicate())),
            ));
            let _ = tx.send(Err(err));
        }
    }
}

/// Reject a failed subscription: waiters get the error, a never-materialized
/// unanchored item is dropped, anything else goes back through the
/// reference-state engine (re-staling it if listeners remain).
pub(crate) fn fail_subscribe(
    inner: &Arc<ClientInner>,
    state: &mut State,
    rid: &Rid,
    err: Error,
) {
    let Some(item) = state.items.get_mut(rid) else {
        return;
    };
    let waiters = item.drain_waiters();
    if item.stored.is_none() && item.is_unused() {
        state.items.remove(rid);
        state.stale.remove(rid);
    } else {
        coordinator::try_delete(inner, state, rid);
    }
    for waiter in waiters {
        let _ = waiter.send(Err(err.duplicate()));
    }
}

/// Remote error stored on an error resource, for rejecting its subscribers.
fn stored_error(state: &State, rid: &Rid) -> Error {
    use crate::resources::Stored;
    match state.items.get(rid).and_then(|i| i.stored.as_ref()) {
        Some(Stored::Error(payload)) => Error::from(payload.clone()),
        _ => Error::Protocol(format!("error resource {rid} not materialized")),
    }
}
