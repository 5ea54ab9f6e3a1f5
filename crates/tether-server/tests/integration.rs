//! End-to-end tests: a real TCP server driven by the real client.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use secrecy::SecretString;
use serde_json::Value;
use tether_client::{ClientConfig, ClientError, ConnectionManager, STATUS_ROUTE};
use tether_core::{ClientId, Notification, StreamHandle, TetherError};
use tether_server::{InMemoryCredentialVerifier, ServerConfig, ServerHandle, TetherServer};
use tokio::time::{Instant, sleep, timeout};

// ── helpers ─────────────────────────────────────────────────────────────

const STREAM_INTERVAL: Duration = Duration::from_millis(100);
const CHANNEL_INTERVAL: Duration = Duration::from_millis(200);

async fn start_server() -> ServerHandle {
    let mut users = InMemoryCredentialVerifier::new();
    users.insert("user", "pass", vec!["USER".into()]);
    users.insert("test", "pass", vec!["NONE".into()]);
    let config = ServerConfig {
        stream_interval: STREAM_INTERVAL,
        channel_interval: CHANNEL_INTERVAL,
        ..ServerConfig::default()
    };
    TetherServer::new(config, Arc::new(users)).bind().await.unwrap()
}

fn client(id: &str) -> ConnectionManager {
    ConnectionManager::with_client_id(ClientConfig::default(), ClientId::from_raw(id))
}

async fn login(server: &ServerHandle, id: &str, user: &str) -> ConnectionManager {
    let manager = client(id);
    let port = server.local_addr().port();
    let _ = manager
        .connect(user, SecretString::from("pass".to_owned()), "127.0.0.1", port)
        .await
        .unwrap();
    manager
}

fn note(text: &str, client_id: &str) -> Value {
    Notification::new("Client", "Server", text, client_id).to_payload()
}

/// Poll until `check` holds or a second has passed.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ── setup ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn valid_login_opens_session_with_principal() {
    let server = start_server().await;
    let manager = login(&server, "c-1", "user").await;
    assert!(manager.is_connected());

    let id = ClientId::from_raw("c-1");
    assert!(eventually(|| server.registry().contains(&id)).await);
    let session = server.registry().get(&id).unwrap();
    let principal = session.principal().unwrap();
    assert_eq!(principal.username, "user");
    assert!(principal.has_role("USER"));

    server.shutdown().await;
}

#[tokio::test]
async fn bad_password_is_rejected() {
    let server = start_server().await;
    let manager = client("c-1");
    let err = manager
        .connect(
            "user",
            SecretString::from("wrong".to_owned()),
            "127.0.0.1",
            server.local_addr().port(),
        )
        .await
        .unwrap_err();
    assert!(err.is_authentication());
    assert!(!manager.is_connected());
    assert!(server.registry().is_empty());
    server.shutdown().await;
}

#[tokio::test]
async fn wrong_setup_route_is_invalid_setup() {
    let server = start_server().await;
    let config = ClientConfig {
        setup_route: "other-client".into(),
        ..ClientConfig::default()
    };
    let manager = ConnectionManager::with_client_id(config, ClientId::from_raw("c-1"));
    let err = manager
        .connect(
            "user",
            SecretString::from("pass".to_owned()),
            "127.0.0.1",
            server.local_addr().port(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(TetherError::InvalidSetup(_))));
    server.shutdown().await;
}

#[tokio::test]
async fn duplicate_client_id_is_refused() {
    let server = start_server().await;
    let _first = login(&server, "dup", "user").await;
    assert!(eventually(|| server.registry().len() == 1).await);

    let second = client("dup");
    let err = second
        .connect(
            "user",
            SecretString::from("pass".to_owned()),
            "127.0.0.1",
            server.local_addr().port(),
        )
        .await
        .unwrap_err();
    assert!(err.is_authentication());
    assert_eq!(server.registry().len(), 1);
    server.shutdown().await;
}

// ── interactions ────────────────────────────────────────────────────────

#[tokio::test]
async fn request_response_swaps_and_prefixes() {
    let server = start_server().await;
    let manager = login(&server, "c-rr", "user").await;

    let reply = manager
        .invoke("request-response", note("hello", "c-rr"))
        .await
        .unwrap();
    let reply = Notification::from_payload(reply).unwrap();
    assert_eq!(reply.source, "Server");
    assert_eq!(reply.destination, "Client");
    assert_eq!(reply.text, "In response to: hello");
    assert_eq!(reply.client_id, "Client Id:c-rr");
    server.shutdown().await;
}

#[tokio::test]
async fn fire_and_forget_completes_without_payload() {
    let server = start_server().await;
    let manager = login(&server, "c-fnf", "user").await;
    manager
        .invoke_fire_and_forget("fire-and-forget", note("ping", "c-fnf"))
        .await
        .unwrap();
    assert!(manager.is_connected());
    server.shutdown().await;
}

#[tokio::test]
async fn stream_emits_until_cancelled() {
    let server = start_server().await;
    let manager = login(&server, "c-stream", "user").await;

    let mut stream = manager
        .invoke_stream("stream", note("tick", "c-stream"))
        .await
        .unwrap();
    for _ in 0..3 {
        let item = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let item = Notification::from_payload(item).unwrap();
        assert_eq!(item.text, "In response to: tick");
    }

    assert!(manager.cancel_active());
    sleep(STREAM_INTERVAL * 3).await;
    assert!(stream.next().await.is_none());

    let session = manager.session().unwrap();
    assert!(eventually(|| session.live_streams() <= 1).await);
    assert!(manager.is_connected());
    server.shutdown().await;
}

#[tokio::test]
async fn channel_counts_switch_to_latest() {
    let server = start_server().await;
    let manager = login(&server, "c-chan", "user").await;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    tx.send(note("first", "c-chan")).unwrap();
    let outbound = tokio_stream_from(rx);
    let mut counts = manager.invoke_channel("channel", outbound).await.unwrap();

    assert_eq!(next_count(&mut counts).await, 1);
    assert_eq!(next_count(&mut counts).await, 1);

    tx.send(note("second", "c-chan")).unwrap();
    // at most one stale tick can already be in flight
    let mut value = next_count(&mut counts).await;
    if value == 1 {
        value = next_count(&mut counts).await;
    }
    assert_eq!(value, 2);
    assert_eq!(next_count(&mut counts).await, 2);

    assert!(manager.cancel_active());
    sleep(CHANNEL_INTERVAL * 2).await;
    assert!(counts.next().await.is_none());
    server.shutdown().await;
}

async fn next_count(counts: &mut StreamHandle) -> u64 {
    timeout(Duration::from_secs(2), counts.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .as_u64()
        .unwrap()
}

fn tokio_stream_from(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Value>,
) -> impl futures::Stream<Item = Value> + Send + 'static {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

// ── authorization ───────────────────────────────────────────────────────

#[tokio::test]
async fn principal_without_role_is_denied_everywhere() {
    let server = start_server().await;
    let config = ClientConfig {
        status_interval: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let manager = ConnectionManager::with_client_id(config, ClientId::from_raw("c-test"));
    let port = server.local_addr().port();
    let _ = manager
        .connect("test", SecretString::from("pass".to_owned()), "127.0.0.1", port)
        .await
        .unwrap();

    let err = manager
        .invoke("request-response", note("hi", "c-test"))
        .await
        .unwrap_err();
    assert!(err.is_denied());

    let err = manager
        .invoke_fire_and_forget("fire-and-forget", note("hi", "c-test"))
        .await
        .unwrap_err();
    assert!(err.is_denied());

    let mut stream = manager
        .invoke_stream("stream", note("hi", "c-test"))
        .await
        .unwrap();
    let first = timeout(Duration::from_secs(2), stream.next()).await.unwrap();
    assert!(matches!(first, Some(Err(e)) if e.is_denied()));
    assert!(stream.next().await.is_none());

    let mut channel = manager
        .invoke_channel("channel", futures::stream::iter([note("hi", "c-test")]))
        .await
        .unwrap();
    let first = timeout(Duration::from_secs(2), channel.next()).await.unwrap();
    assert!(matches!(first, Some(Err(e)) if e.is_denied()));

    // the session survives every denial and still carries a successful exchange
    assert!(manager.is_connected());
    let id = ClientId::from_raw("c-test");
    assert!(eventually(|| server.registry().contains(&id)).await);
    let server_side = server.registry().get(&id).unwrap();
    assert!(server_side.is_open());
    let mut reports = server_side
        .request_stream(STATUS_ROUTE, Value::from("OPEN"))
        .await
        .unwrap();
    let report = timeout(Duration::from_secs(2), reports.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report["clientId"], "c-test");
    reports.cancel();

    let err = manager
        .invoke("request-response", note("again", "c-test"))
        .await
        .unwrap_err();
    assert!(err.is_denied());
    assert!(manager.is_connected());
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_route_is_stream_error() {
    let server = start_server().await;
    let manager = login(&server, "c-unknown", "user").await;
    let err = manager.invoke("nowhere", Value::Null).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(TetherError::UnknownRoute(_))));
    assert!(manager.is_connected());
    server.shutdown().await;
}

// ── lifecycle ───────────────────────────────────────────────────────────

#[tokio::test]
async fn logout_unregisters_session() {
    let server = start_server().await;
    let manager = login(&server, "c-out", "user").await;
    let id = ClientId::from_raw("c-out");
    assert!(eventually(|| server.registry().contains(&id)).await);

    assert!(manager.dispose().await);
    assert!(!manager.is_connected());
    assert!(eventually(|| !server.registry().contains(&id)).await);
    server.shutdown().await;
}

#[tokio::test]
async fn lifecycle_is_logged() {
    let (logs, _guard) = tether_logging::capture::capture_logs();
    let server = start_server().await;
    let manager = login(&server, "c-log", "user").await;

    assert!(eventually(|| logs.has_message("Client: c-log CONNECTED.")).await);
    assert!(eventually(|| logs.has_message("Connection OPEN")).await);

    assert!(manager.dispose().await);
    assert!(eventually(|| logs.has_message("Client c-log DISCONNECTED")).await);
    assert!(logs.has_message("Client DISCONNECTED"));

    server.shutdown().await;
    assert!(logs.has_message("Detaching all remaining clients..."));
    assert!(logs.has_message("Shutting down."));
}

#[tokio::test]
async fn reconnect_replaces_session() {
    let first_server = start_server().await;
    let second_server = start_server().await;
    let manager = login(&first_server, "c-re", "user").await;
    let first = manager.session().unwrap();

    let _ = manager
        .connect(
            "user",
            SecretString::from("pass".to_owned()),
            "127.0.0.1",
            second_server.local_addr().port(),
        )
        .await
        .unwrap();
    assert!(!first.is_open());
    assert!(manager.is_connected());
    assert!(!manager.session().unwrap().ptr_eq(&first));

    let id = ClientId::from_raw("c-re");
    assert!(eventually(|| !first_server.registry().contains(&id)).await);
    assert!(eventually(|| second_server.registry().contains(&id)).await);
    first_server.shutdown().await;
    second_server.shutdown().await;
}

#[tokio::test]
async fn shutdown_disconnects_clients() {
    let server = start_server().await;
    let manager = login(&server, "c-down", "user").await;
    let session = manager.session().unwrap();

    server.shutdown().await;
    timeout(Duration::from_secs(2), session.closed()).await.unwrap();
    assert!(!manager.is_connected());
    assert!(matches!(
        manager.invoke("request-response", Value::Null).await,
        Err(ClientError::NotConnected)
    ));
}

async fn connect_and_disconnect(k: usize) {
    let server = start_server().await;
    let port = server.local_addr().port();

    let connects = (0..k).map(|i| async move {
        let manager = client(&format!("k-{i}"));
        let _ = manager
            .connect("user", SecretString::from("pass".to_owned()), "127.0.0.1", port)
            .await
            .unwrap();
        manager
    });
    let managers = futures::future::join_all(connects).await;
    assert!(eventually(|| server.registry().len() == k).await);

    let disconnects = managers.iter().map(ConnectionManager::dispose);
    let _ = futures::future::join_all(disconnects).await;
    assert!(eventually(|| server.registry().is_empty()).await);
    assert!(eventually(|| server.connections() == 0).await);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_drains_after_one_client() {
    connect_and_disconnect(1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_drains_after_ten_clients() {
    connect_and_disconnect(10).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_drains_after_hundred_clients() {
    connect_and_disconnect(100).await;
}
