//! End-to-end client scenarios over a mock transport.
//!
//! The mock hands each `connect` call a fresh pair of frame channels and
//! surfaces the server side to the test, which plays gateway: it asserts
//! the frames the client sends and pushes responses and events back.

use async_trait::async_trait;
use res_rs::{
    ClientConfig, Connection, Error, EventBus, EventData, Handler, ResClient, Transport, Value,
};
use serde_json::{json, Value as Json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

struct MockTransport {
    sessions: mpsc::UnboundedSender<Session>,
}

struct Session {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str) -> res_rs::Result<Connection> {
        let (c2s_tx, c2s_rx) = mpsc::unbounded_channel();
        let (s2c_tx, s2c_rx) = mpsc::unbounded_channel();
        self.sessions
            .send(Session {
                from_client: c2s_rx,
                to_client: s2c_tx,
            })
            .map_err(|_| Error::Connection("connection refused".to_string()))?;
        Ok(Connection {
            sender: c2s_tx,
            receiver: s2c_rx,
        })
    }
}

impl Session {
    async fn recv(&mut self) -> Json {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed");
        serde_json::from_str(&frame).expect("invalid frame")
    }

    fn send(&self, value: Json) {
        self.to_client
            .send(value.to_string())
            .expect("client connection gone");
    }

    fn assert_idle(&mut self) {
        assert!(matches!(
            self.from_client.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }
}

fn mock_client(config: ClientConfig) -> (ResClient, mpsc::UnboundedReceiver<Session>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = config
        .with_transport(Arc::new(MockTransport { sessions: tx }))
        .with_event_bus(EventBus::new());
    (ResClient::with_config("ws://test.example", config), rx)
}

fn fast_config() -> ClientConfig {
    ClientConfig::new()
        .with_subscribe_stale_delay(Duration::from_millis(30))
        .with_reconnect_delay(Duration::from_millis(30))
}

async fn session(conns: &mut mpsc::UnboundedReceiver<Session>) -> Session {
    tokio::time::timeout(Duration::from_secs(2), conns.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

type Events = Arc<Mutex<Vec<(String, EventData)>>>;

fn recorder() -> (Handler, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    let handler: Handler = Arc::new(move |event: &str, data: &EventData| {
        seen.lock().unwrap().push((event.to_string(), data.clone()));
    });
    (handler, events)
}

/// Drive a `get` for a model while playing gateway on the other side.
async fn get_model(
    client: &ResClient,
    conns: &mut mpsc::UnboundedReceiver<Session>,
    rid: &str,
    props: Json,
) -> (res_rs::Model, Session) {
    let task = tokio::spawn({
        let client = client.clone();
        let rid = rid.to_string();
        async move { client.get(&rid).await }
    });
    let mut sess = session(conns).await;
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!(format!("subscribe.{rid}")));
    let mut models = serde_json::Map::new();
    models.insert(rid.to_string(), props);
    sess.send(json!({ "id": frame["id"], "result": { "models": models } }));
    let resource = task.await.unwrap().unwrap();
    let model = resource.as_model().expect("expected a model").clone();
    (model, sess)
}

#[tokio::test]
async fn test_get_model() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("x.a").await }
    });

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(frame, json!({ "id": 1, "method": "subscribe.x.a" }));

    sess.send(json!({ "id": 1, "result": { "models": { "x.a": { "msg": "hi" } } } }));
    let resource = task.await.unwrap().unwrap();
    let model = resource.as_model().expect("expected a model");
    assert_eq!(model.rid().as_str(), "x.a");
    assert_eq!(model.prop("msg"), Some(Value::Json(json!("hi"))));
}

#[tokio::test]
async fn test_model_change_event() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let (model, sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    let (handler, events) = recorder();
    client.resource_on("x.a", Some("change"), handler).unwrap();

    sess.send(json!({
        "event": "x.a.change",
        "data": { "values": { "msg": "bye", "n": 42 } }
    }));
    settle().await;

    assert_eq!(model.prop("msg"), Some(Value::Json(json!("bye"))));
    assert_eq!(model.prop("n"), Some(Value::Json(json!(42))));

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let (name, data) = &events[0];
    assert_eq!(name, "change");
    match data {
        EventData::Change { old_values } => {
            assert_eq!(
                old_values.get("msg"),
                Some(&Some(Value::Json(json!("hi"))))
            );
            assert_eq!(old_values.get("n"), Some(&None));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_unchanged_values_emit_nothing() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let (model, sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    let (handler, events) = recorder();
    client.resource_on("x.a", None, handler).unwrap();

    sess.send(json!({
        "event": "x.a.change",
        "data": { "values": { "msg": "hi" } }
    }));
    settle().await;

    assert_eq!(model.prop("msg"), Some(Value::Json(json!("hi"))));
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_nested_reference_resolution_and_release() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("p").await }
    });

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({
        "id": frame["id"],
        "result": { "models": {
            "p": { "child": { "rid": "c" } },
            "c": { "v": 1 }
        } }
    }));

    let resource = task.await.unwrap().unwrap();
    let model = resource.as_model().expect("expected a model");
    assert_eq!(
        model.prop("child"),
        Some(Value::Resource(res_rs::Rid::new("c")))
    );
    let child = client.cached("c").expect("child should be cached");
    assert_eq!(
        child.as_model().unwrap().prop("v"),
        Some(Value::Json(json!(1)))
    );

    // Severing the only reference evicts the unanchored child.
    sess.send(json!({
        "event": "p.change",
        "data": { "values": { "child": { "action": "delete" } } }
    }));
    settle().await;
    assert_eq!(model.prop("child"), None);
    assert!(client.cached("c").is_none());
}

#[tokio::test]
async fn test_cyclic_graph_materializes_and_collapses() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("a").await }
    });

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({
        "id": frame["id"],
        "result": { "models": {
            "a": { "next": { "rid": "b" } },
            "b": { "next": { "rid": "a" } }
        } }
    }));

    let resource = task.await.unwrap().unwrap();
    let a = resource.as_model().expect("expected a model");
    assert_eq!(a.prop("next"), Some(Value::Resource(res_rs::Rid::new("b"))));
    let b = client.cached("b").expect("b should be cached");
    assert_eq!(
        b.as_model().unwrap().prop("next"),
        Some(Value::Resource(res_rs::Rid::new("a")))
    );

    // Dropping the subscription collapses the whole unanchored cycle.
    sess.send(json!({ "event": "a.unsubscribe" }));
    settle().await;
    assert!(client.cached("a").is_none());
    assert!(client.cached("b").is_none());
}

#[tokio::test]
async fn test_stale_resubscribe_on_reconnect() {
    let (client, mut conns) = mock_client(fast_config());
    let (model, sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    let (handler, events) = recorder();
    client.resource_on("x.a", Some("change"), handler).unwrap();
    let (close_handler, client_events) = recorder();
    client.on(None, close_handler);

    drop(sess);
    settle().await;

    // The listener keeps the resource cached while disconnected.
    assert!(client.cached("x.a").is_some());
    assert!(client_events
        .lock()
        .unwrap()
        .iter()
        .any(|(name, _)| name == "close"));

    // After the reconnect delay the client comes back and resubscribes.
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!("subscribe.x.a"));
    sess.send(json!({ "id": frame["id"], "result": { "models": { "x.a": { "msg": "bye" } } } }));
    settle().await;

    assert_eq!(model.prop("msg"), Some(Value::Json(json!("bye"))));
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0].1 {
        EventData::Change { old_values } => {
            assert_eq!(
                old_values.get("msg"),
                Some(&Some(Value::Json(json!("hi"))))
            );
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_with_unchanged_state_is_silent() {
    let (client, mut conns) = mock_client(fast_config());
    let (model, sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    let (handler, events) = recorder();
    client.resource_on("x.a", None, handler).unwrap();

    drop(sess);
    settle().await;

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({ "id": frame["id"], "result": { "models": { "x.a": { "msg": "hi" } } } }));
    settle().await;

    assert_eq!(model.prop("msg"), Some(Value::Json(json!("hi"))));
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unanchored_resources_drop_on_disconnect() {
    let (client, mut conns) = mock_client(fast_config());
    let (_model, sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    // No listeners anywhere: nothing survives the close, and with an empty
    // cache no reconnect is attempted.
    drop(sess);
    settle().await;
    assert!(client.cached("x.a").is_none());
    assert!(
        tokio::time::timeout(Duration::from_millis(150), conns.recv())
            .await
            .is_err(),
        "client should not reconnect for an empty cache"
    );
}

#[tokio::test]
async fn test_collection_add_remove_events() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("col").await }
    });

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({ "id": frame["id"], "result": { "collections": { "col": [1, 2] } } }));
    let resource = task.await.unwrap().unwrap();
    let col = resource.as_collection().expect("expected a collection").clone();

    let (handler, events) = recorder();
    client.resource_on("col", Some("add remove"), handler).unwrap();

    sess.send(json!({ "event": "col.add", "data": { "value": 3, "idx": 1 } }));
    settle().await;
    assert_eq!(
        col.items(),
        vec![
            Value::Json(json!(1)),
            Value::Json(json!(3)),
            Value::Json(json!(2))
        ]
    );

    sess.send(json!({ "event": "col.remove", "data": { "idx": 0 } }));
    settle().await;
    assert_eq!(col.items(), vec![Value::Json(json!(3)), Value::Json(json!(2))]);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    match &events[0].1 {
        EventData::Add { value, idx } => {
            assert_eq!(value, &Value::Json(json!(3)));
            assert_eq!(*idx, 1);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    match &events[1].1 {
        EventData::Remove { value, idx } => {
            assert_eq!(value, &Value::Json(json!(1)));
            assert_eq!(*idx, 0);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_collection_sync_emits_minimal_diff() {
    let (client, mut conns) = mock_client(fast_config());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("col").await }
    });

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({ "id": frame["id"], "result": { "collections": { "col": [1, 2, 3, 4, 5] } } }));
    let resource = task.await.unwrap().unwrap();
    let col = resource.as_collection().expect("expected a collection").clone();

    let (handler, events) = recorder();
    client.resource_on("col", None, handler).unwrap();

    drop(sess);
    settle().await;

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!("subscribe.col"));
    sess.send(json!({ "id": frame["id"], "result": { "collections": { "col": [1, 3, 4, 6, 5] } } }));
    settle().await;

    let expected: Vec<Value> = [1, 3, 4, 6, 5]
        .iter()
        .map(|n| Value::Json(json!(n)))
        .collect();
    assert_eq!(col.items(), expected);

    let events = events.lock().unwrap();
    let sync_events: Vec<&(String, EventData)> = events
        .iter()
        .filter(|(name, _)| name == "add" || name == "remove")
        .collect();
    assert_eq!(sync_events.len(), 2);
    match &sync_events[0].1 {
        EventData::Remove { value, idx } => {
            assert_eq!(value, &Value::Json(json!(2)));
            assert_eq!(*idx, 1);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    match &sync_events[1].1 {
        EventData::Add { value, idx } => {
            assert_eq!(value, &Value::Json(json!(6)));
            assert_eq!(*idx, 3);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_call_resolves_and_rejects() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let (error_handler, client_events) = recorder();
    client.on(Some("error"), error_handler);

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call("svc.mod", "probe", Some(json!({ "p": 1 }))).await }
    });
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(
        frame,
        json!({ "id": 1, "method": "call.svc.mod.probe", "params": { "p": 1 } })
    );
    sess.send(json!({ "id": 1, "result": { "ok": true } }));
    assert_eq!(task.await.unwrap().unwrap(), json!({ "ok": true }));

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call("svc.mod", "probe", None).await }
    });
    let frame = sess.recv().await;
    sess.send(json!({
        "id": frame["id"],
        "error": { "code": "svc.noProbe", "message": "probe disabled" }
    }));
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "svc.noProbe");
    settle().await;
    assert!(client_events
        .lock()
        .unwrap()
        .iter()
        .any(|(name, data)| name == "error" && matches!(data, EventData::ClientError(_))));
}

#[tokio::test]
async fn test_authenticate_method_string() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .authenticate("usr.passwd", "login", Some(json!({ "password": "hunter2" })))
                .await
        }
    });
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!("auth.usr.passwd.login"));
    sess.send(json!({ "id": frame["id"], "result": null }));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_create_materializes_subscribed_resource() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.create("notes", Some(json!({ "title": "draft" }))).await }
    });
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(
        frame,
        json!({ "id": 1, "method": "new.notes", "params": { "title": "draft" } })
    );
    sess.send(json!({
        "id": 1,
        "result": {
            "rid": "notes.1",
            "models": { "notes.1": { "title": "draft" } }
        }
    }));
    let resource = task.await.unwrap().unwrap();
    let model = resource.as_model().expect("expected a model");
    assert_eq!(model.rid().as_str(), "notes.1");
    assert_eq!(model.prop("title"), Some(Value::Json(json!("draft"))));
    assert!(client.cached("notes.1").is_some());
}

#[tokio::test]
async fn test_set_model_rewrites_absent_to_delete() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .set_model(
                    "x.a",
                    [
                        ("keep".to_string(), Some(json!(1))),
                        ("drop".to_string(), None),
                    ],
                )
                .await
        }
    });
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!("call.x.a.set"));
    assert_eq!(
        frame["params"],
        json!({ "keep": 1, "drop": { "action": "delete" } })
    );
    sess.send(json!({ "id": frame["id"], "result": null }));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_gets_share_one_subscription() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let first = tokio::spawn({
        let client = client.clone();
        async move { client.get("x.a").await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.get("x.a").await }
    });

    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({ "id": frame["id"], "result": { "models": { "x.a": { "msg": "hi" } } } }));

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();
    assert_eq!(a.rid(), b.rid());
    sess.assert_idle();
}

#[tokio::test]
async fn test_unsubscribes_when_last_listener_leaves() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let (_model, mut sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    let (handler, _) = recorder();
    let id = client.resource_on("x.a", None, handler).unwrap();
    client.resource_off("x.a", id).unwrap();

    let frame = sess.recv().await;
    assert_eq!(frame, json!({ "id": 2, "method": "unsubscribe.x.a" }));
    sess.send(json!({ "id": 2, "result": null }));
    settle().await;
    assert!(client.cached("x.a").is_none());
}

#[tokio::test]
async fn test_unsubscribe_event_stales_and_resubscribes() {
    let (client, mut conns) = mock_client(fast_config());
    let (model, mut sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    let (handler, events) = recorder();
    client.resource_on("x.a", None, handler).unwrap();

    sess.send(json!({ "event": "x.a.unsubscribe" }));
    settle().await;
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|(name, _)| name == "unsubscribe"));
    // Listeners keep it cached while it waits for resubscription.
    assert!(client.cached("x.a").is_some());

    // The stale timer fires and the subscription is restored.
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!("subscribe.x.a"));
    sess.send(json!({ "id": frame["id"], "result": { "models": { "x.a": { "msg": "back" } } } }));
    settle().await;
    assert_eq!(model.prop("msg"), Some(Value::Json(json!("back"))));
}

#[tokio::test]
async fn test_disconnect_rejects_pending_work() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call("svc.mod", "slow", None).await }
    });
    let mut sess = session(&mut conns).await;
    let _frame = sess.recv().await;

    client.disconnect();
    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_disconnect());

    // No reconnect after an explicit disconnect.
    assert!(
        tokio::time::timeout(Duration::from_millis(150), conns.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_subscribe_error_evicts_provisional_entry() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("x.missing").await }
    });
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({
        "id": frame["id"],
        "error": { "code": "system.notFound", "message": "not found" }
    }));
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "system.notFound");

    // The entry is gone: a second get subscribes again.
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("x.missing").await }
    });
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!("subscribe.x.missing"));
    sess.send(json!({ "id": frame["id"], "result": { "models": { "x.missing": {} } } }));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_error_resource_rejects_get() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get("x.gone").await }
    });
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    sess.send(json!({
        "id": frame["id"],
        "result": { "errors": { "x.gone": { "code": "system.timeout", "message": "timed out" } } }
    }));
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "system.timeout");
    assert!(client.cached("x.gone").is_none());
}

#[tokio::test]
async fn test_invalid_arguments_fail_without_connecting() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    assert!(matches!(
        client.get("").await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        client.call("x.a", "", None).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        conns.try_recv(),
        Err(TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_resource_on_unknown_rid_fails() {
    let (client, _conns) = mock_client(ClientConfig::new());
    let (handler, _) = recorder();
    assert!(matches!(
        client.resource_on("never.seen", None, handler),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_custom_events_pass_through() {
    let (client, mut conns) = mock_client(ClientConfig::new());
    let (_model, sess) = get_model(&client, &mut conns, "x.a", json!({ "msg": "hi" })).await;

    let (handler, events) = recorder();
    client.resource_on("x.a", None, handler).unwrap();

    sess.send(json!({ "event": "x.a.ping", "data": { "seq": 7 } }));
    settle().await;

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "ping");
    match &events[0].1 {
        EventData::Json(data) => assert_eq!(data, &json!({ "seq": 7 })),
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_on_connect_hook_runs_before_connect_resolves() {
    let authed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log = authed.clone();
    let config = ClientConfig::new().with_on_connect(move |client: ResClient| {
        let log = log.clone();
        async move {
            let result = client
                .authenticate("usr.passwd", "login", Some(json!({ "token": "t" })))
                .await;
            log.lock().unwrap().push(format!("auth: {}", result.is_ok()));
            Ok(())
        }
    });
    let (client, mut conns) = mock_client(config);

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    let mut sess = session(&mut conns).await;
    let frame = sess.recv().await;
    assert_eq!(frame["method"], json!("auth.usr.passwd.login"));
    sess.send(json!({ "id": frame["id"], "result": null }));

    task.await.unwrap().unwrap();
    assert_eq!(authed.lock().unwrap().as_slice(), ["auth: true"]);
}
