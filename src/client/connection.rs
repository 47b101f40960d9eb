//! Connection lifecycle: connect, disconnect, reconnect and frame handling.
//!
//! One reader task per connection pulls frames off the transport and
//! processes each to completion before looking at the next, which keeps
//! per-resource event order and guarantees a subscribe response is
//! materialized before any later frame for the same resource is examined.

use crate::bus::EventData;
use crate::client::client::{ClientInner, ResClient};
use crate::client::requests::{self, RequestKind};
use crate::client::state::{ConnState, EmitTarget, Emission, State};
use crate::client::{coordinator, events, url};
use crate::error::{Error, Result};
use crate::transport::Connection;
use crate::types::{parse_frame, Inbound, Rid};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

/// Why a connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseCause {
    Transport,
    Disconnect,
}

/// Connect, or wait for the connection already being established.
///
/// Resolves once the transport is open, the connect hook has run and stale
/// resources have been resubscribed.
pub(crate) async fn connect(inner: &Arc<ClientInner>) -> Result<()> {
    let rx = {
        let mut st = inner.state.lock();
        st.try_connect = true;
        if let ConnState::Connected { ready: true, .. } = &st.conn {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        st.connect_waiters.push(tx);
        if matches!(st.conn, ConnState::Disconnected) {
            st.conn = ConnState::Connecting;
            spawn_connect(inner);
        }
        rx
    };
    rx.await
        .map_err(|_| Error::Connection("connect aborted".to_string()))?
}

/// Spawn the connect task. The caller must already have moved the
/// connection state to `Connecting`.
pub(crate) fn spawn_connect(inner: &Arc<ClientInner>) {
    let inner = inner.clone();
    tokio::spawn(connect_task(inner));
}

async fn connect_task(inner: Arc<ClientInner>) {
    let host = url::resolve_host_url(&inner.host_url);
    tracing::debug!(host = %host, "connecting");
    match inner.transport.connect(&host).await {
        Err(e) => {
            let waiters = {
                let mut st = inner.state.lock();
                st.conn = ConnState::Disconnected;
                maybe_schedule_reconnect(&inner, &mut st);
                std::mem::take(&mut st.connect_waiters)
            };
            let err = Error::Connection(e.to_string());
            tracing::debug!("connect failed: {err}");
            for waiter in waiters {
                let _ = waiter.send(Err(err.duplicate()));
            }
            emit_all(
                &inner,
                vec![Emission::client(
                    "error",
                    EventData::ClientError(Arc::new(err)),
                )],
            );
        }
        Ok(Connection { sender, receiver }) => {
            let epoch = {
                let mut st = inner.state.lock();
                if !st.try_connect || !matches!(st.conn, ConnState::Connecting) {
                    // Disconnected while the transport was opening; dropping
                    // the sender closes it again.
                    return;
                }
                st.conn_epoch += 1;
                st.conn = ConnState::Connected {
                    sender,
                    epoch: st.conn_epoch,
                    ready: false,
                };
                st.conn_epoch
            };
            tokio::spawn(reader_task(inner.clone(), receiver, epoch));

            if let Some(hook) = inner.on_connect.clone() {
                let client = ResClient {
                    inner: inner.clone(),
                };
                if let Err(e) = hook(client).await {
                    tracing::debug!("connect hook failed: {e}");
                    handle_close(&inner, epoch, CloseCause::Transport);
                    return;
                }
            }

            let (waiters, emits) = {
                let mut st = inner.state.lock();
                match &mut st.conn {
                    ConnState::Connected {
                        epoch: current,
                        ready,
                        ..
                    } if *current == epoch => *ready = true,
                    // Closed while the hook ran; the close path already
                    // settled the waiters.
                    _ => return,
                }
                resubscribe_stale(&inner, &mut st);
                (
                    std::mem::take(&mut st.connect_waiters),
                    vec![Emission::client("connect", EventData::None)],
                )
            };
            tracing::debug!("connected");
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
            emit_all(&inner, emits);
        }
    }
}

/// Resubscribe every stale resource on the current connection.
///
/// A resource whose resubscribe cannot be sent goes back through the
/// reference-state engine: with listeners it returns to the stale set and
/// gets a fresh timer, without them it is evicted.
fn resubscribe_stale(inner: &Arc<ClientInner>, state: &mut State) {
    let stale: Vec<Rid> = state.stale.iter().cloned().collect();
    for rid in stale {
        state.stale.remove(&rid);
        let kind = RequestKind::Subscribe { rid: rid.clone() };
        if let Err(e) = requests::send_locked(state, "subscribe", &rid, None, None, kind) {
            tracing::debug!(rid = %rid, "stale resubscribe failed to send: {e}");
            coordinator::try_delete(inner, state, &rid);
        }
    }
}

/// Fired by the stale timer: resubscribe if the resource is still stale.
/// A failed send feeds the resource back through the reference-state
/// engine, which re-stales or evicts it.
pub(crate) fn subscribe_stale(inner: &Arc<ClientInner>, rid: &Rid) {
    let mut st = inner.state.lock();
    if !st.stale.contains(rid) || !st.is_connected() {
        return;
    }
    st.stale.remove(rid);
    let kind = RequestKind::Subscribe { rid: rid.clone() };
    if let Err(e) = requests::send_locked(&mut st, "subscribe", rid, None, None, kind) {
        tracing::debug!(rid = %rid, "stale resubscribe failed to send: {e}");
        coordinator::try_delete(inner, &mut st, rid);
    }
}

async fn reader_task(inner: Arc<ClientInner>, mut receiver: mpsc::UnboundedReceiver<String>, epoch: u64) {
    while let Some(frame) = receiver.recv().await {
        let live = {
            let st = inner.state.lock();
            matches!(st.conn, ConnState::Connected { epoch: e, .. } if e == epoch)
        };
        if !live {
            return;
        }
        handle_frame(&inner, &frame);
    }
    handle_close(&inner, epoch, CloseCause::Transport);
}

/// Parse and dispatch one inbound frame.
pub(crate) fn handle_frame(inner: &Arc<ClientInner>, frame: &str) {
    tracing::trace!(frame, "recv");
    let inbound = match parse_frame(frame) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::error!("{e}");
            return;
        }
    };
    let mut emits = Vec::new();
    {
        let mut st = inner.state.lock();
        match inbound {
            Inbound::Response { id, result } => {
                requests::handle_response(inner, &mut st, id, result, &mut emits);
            }
            Inbound::Failure { id, error } => {
                requests::handle_failure(inner, &mut st, id, error, &mut emits);
            }
            Inbound::Event { subject, data } => {
                events::handle_event(inner, &mut st, &subject, data, &mut emits);
            }
        }
    }
    emit_all(inner, emits);
}

/// Tear down a closed connection: reject outstanding work, demote every
/// subscribed resource to stale, and schedule a reconnect while anything
/// worth recovering remains cached.
pub(crate) fn handle_close(inner: &Arc<ClientInner>, epoch: u64, cause: CloseCause) {
    let mut emits = Vec::new();
    let mut rejections: Vec<oneshot::Sender<Result<()>>> = Vec::new();
    let mut call_rejections: Vec<RequestKind> = Vec::new();
    {
        let mut st = inner.state.lock();
        match st.conn {
            ConnState::Connected { epoch: e, .. } if e == epoch => {}
            _ => return,
        }
        st.conn = ConnState::Disconnected;
        tracing::debug!(?cause, "connection closed");

        // Outstanding requests reject with the close reason.
        let pending: Vec<_> = st.requests.drain().map(|(_, req)| req).collect();
        for request in pending {
            match request.kind {
                RequestKind::Subscribe { rid } => {
                    if let Some(item) = st.items.get_mut(&rid) {
                        rejections.extend(item.drain_waiters());
                        if item.stored.is_none() && item.is_unused() {
                            st.items.remove(&rid);
                            st.stale.remove(&rid);
                        }
                    }
                }
                RequestKind::Unsubscribe { .. } => {}
                kind => call_rejections.push(kind),
            }
        }
        rejections.append(&mut std::mem::take(&mut st.connect_waiters));

        // Every subscribed resource goes stale, then through the
        // reference-state engine: unanchored ones are evicted, the rest
        // wait for the reconnect to resubscribe them.
        let subscribed: Vec<Rid> = st
            .items
            .iter()
            .filter(|(_, item)| item.subscribed)
            .map(|(rid, _)| rid.clone())
            .collect();
        for rid in &subscribed {
            if let Some(item) = st.items.get_mut(rid) {
                item.subscribed = false;
            }
            st.stale.insert(rid.clone());
        }
        for rid in &subscribed {
            coordinator::try_delete(inner, &mut st, rid);
        }

        if cause == CloseCause::Transport {
            maybe_schedule_reconnect(inner, &mut st);
        }
        emits.push(Emission::client("close", EventData::None));
    }

    let close_error = || match cause {
        CloseCause::Disconnect => Error::Disconnect,
        CloseCause::Transport => Error::Connection("connection closed".to_string()),
    };
    for waiter in rejections {
        let _ = waiter.send(Err(close_error()));
    }
    for kind in call_rejections {
        match kind {
            RequestKind::Call { tx } => {
                let _ = tx.send(Err(close_error()));
            }
            RequestKind::New { tx } => {
                let _ = tx.send(Err(close_error()));
            }
            _ => {}
        }
    }
    emit_all(inner, emits);
}

fn maybe_schedule_reconnect(inner: &Arc<ClientInner>, state: &mut State) {
    if !state.try_connect || state.items.is_empty() {
        return;
    }
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(inner.reconnect_delay).await;
        let mut st = inner.state.lock();
        if !st.try_connect || !matches!(st.conn, ConnState::Disconnected) || st.items.is_empty() {
            return;
        }
        st.conn = ConnState::Connecting;
        spawn_connect(&inner);
    });
}

/// Explicit disconnect: stop reconnecting and close the transport. Pending
/// connect calls reject with a disconnect error.
pub(crate) fn disconnect(inner: &Arc<ClientInner>) {
    let (epoch, waiters) = {
        let mut st = inner.state.lock();
        st.try_connect = false;
        match st.conn {
            ConnState::Connected { epoch, .. } => (Some(epoch), Vec::new()),
            ConnState::Connecting => {
                st.conn = ConnState::Disconnected;
                (None, std::mem::take(&mut st.connect_waiters))
            }
            ConnState::Disconnected => (None, Vec::new()),
        }
    };
    for waiter in waiters {
        let _ = waiter.send(Err(Error::Disconnect));
    }
    if let Some(epoch) = epoch {
        handle_close(inner, epoch, CloseCause::Disconnect);
    }
}

/// Dispatch collected emissions outside the state lock.
pub(crate) fn emit_all(inner: &Arc<ClientInner>, emits: Vec<Emission>) {
    for emission in emits {
        let target = match &emission.target {
            EmitTarget::Client => inner.namespace.clone(),
            EmitTarget::Resource(rid) => {
                format!("{}.resource.{}", inner.namespace, rid)
            }
        };
        inner.bus.emit(&target, &emission.event, &emission.data);
    }
}
