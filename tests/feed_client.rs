use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use vessel_feed::{
    credentials::StaticToken, ConnectionStatus, ConnectivityStatus, FeedClient, FeedConfig,
    FeedError, FeedSnapshot, SessionError,
};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type ServerSocket = WebSocketStream<TcpStream>;

/// Feed endpoint on a random local port.
struct MockFeed {
    listener: TcpListener,
}

impl MockFeed {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    fn config(&self) -> FeedConfig {
        FeedConfig {
            reconnect_base_delay: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(2),
            ..FeedConfig::new(format!("ws://{}/feed", self.listener.local_addr().unwrap()))
        }
    }

    /// Accept the next client, returning the socket and the request URI.
    async fn accept(&self) -> (ServerSocket, String) {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("no connection attempt")
            .unwrap();
        let mut uri = String::new();
        let socket = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            uri = req.uri().to_string();
            Ok(resp)
        })
        .await
        .unwrap();
        (socket, uri)
    }

    /// Accept the next client and acknowledge its token.
    async fn accept_authenticated(&self) -> ServerSocket {
        let (mut socket, _) = self.accept().await;
        send(&mut socket, json!({"type": "auth", "success": true})).await;
        socket
    }

    async fn assert_no_connection(&self) {
        assert!(
            timeout(QUIET, self.listener.accept()).await.is_err(),
            "unexpected connection attempt"
        );
    }
}

async fn send(socket: &mut ServerSocket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

async fn next_text(socket: &mut ServerSocket) -> String {
    loop {
        match timeout(WAIT, socket.next()).await.expect("no frame from client") {
            Some(Ok(Message::Text(text))) => return text.to_string(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended: {:?}", other),
        }
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<FeedSnapshot>,
    predicate: impl FnMut(&FeedSnapshot) -> bool,
) -> FeedSnapshot {
    timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("driver stopped")
        .clone()
}

fn client(config: FeedConfig) -> FeedClient {
    FeedClient::connect(config, Arc::new(StaticToken::new("secret-token"))).unwrap()
}

fn update_frame() -> Value {
    json!({
        "type": "update",
        "timestamp": "2024-05-01T12:00:00Z",
        "data": [
            {
                "imei": "356938035643809",
                "mmsi": 271043250,
                "name": "Karadeniz 1",
                "vesselType": "Fishing",
                "status": "online",
                "lastUpdate": "2024-05-01T11:59:30Z",
                "position": {"latitude": 41.0, "longitude": 39.7, "speed": 7.2, "direction": 370},
                "mapped": true
            },
            {
                "imei": "356938035643810",
                "name": "Tracker",
                "mapped": false
            }
        ]
    })
}

#[tokio::test]
async fn update_publishes_vessels_and_trackers() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let (mut socket, uri) = feed.accept().await;
    assert!(uri.starts_with("/feed?"), "{}", uri);
    assert!(uri.contains("token=secret-token"), "{}", uri);

    send(&mut socket, json!({"type": "auth", "success": true})).await;
    wait_for(&mut rx, |s| s.status == ConnectionStatus::Authenticated).await;

    send(&mut socket, update_frame()).await;
    let snapshot = wait_for(&mut rx, |s| s.total_count() == 2).await;

    assert_eq!(snapshot.vessel_count(), 1);
    assert_eq!(snapshot.tracker_count(), 1);
    assert!(snapshot.is_connected());
    assert_eq!(snapshot.error, None);
    assert_eq!(
        snapshot.last_update.map(|t| t.to_rfc3339()),
        Some("2024-05-01T12:00:00+00:00".to_string())
    );

    let vessel = &snapshot.vessels[0];
    assert_eq!(vessel.mmsi.map(|m| m.value()), Some(271043250));
    assert_eq!(vessel.name, "Karadeniz 1");
    assert_eq!(vessel.vessel_type, "Fishing");
    assert_eq!(vessel.status, ConnectivityStatus::Online);
    assert_eq!(vessel.course, 10.0);
    assert_eq!(vessel.flag, "Unknown");
    assert_eq!(snapshot.trackers[0].as_value()["name"], "Tracker");

    client.teardown().await;
}

#[tokio::test]
async fn heartbeat_is_answered() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());

    let mut socket = feed.accept_authenticated().await;
    send(&mut socket, json!({"type": "ping"})).await;

    let reply: Value = serde_json::from_str(&next_text(&mut socket).await).unwrap();
    assert_eq!(reply, json!({"type": "pong"}));

    client.teardown().await;
}

#[tokio::test]
async fn malformed_frame_keeps_snapshot() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let mut socket = feed.accept_authenticated().await;
    send(&mut socket, update_frame()).await;
    let before = wait_for(&mut rx, |s| s.vessel_count() == 1).await;

    socket
        .send(Message::Text("{not json".into()))
        .await
        .unwrap();
    send(&mut socket, json!({"type": "update", "data": "nope"})).await;
    send(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(next_text(&mut socket).await, r#"{"type":"pong"}"#);

    let after = client.snapshot();
    assert_eq!(after.vessels, before.vessels);
    assert_eq!(after.status, ConnectionStatus::Authenticated);

    client.teardown().await;
}

#[tokio::test]
async fn rejected_token_clears_snapshot_without_reconnect() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let mut socket = feed.accept_authenticated().await;
    send(&mut socket, update_frame()).await;
    wait_for(&mut rx, |s| s.vessel_count() == 1).await;

    send(
        &mut socket,
        json!({"type": "auth", "success": false, "message": "token revoked"}),
    )
    .await;
    let snapshot = wait_for(&mut rx, |s| s.error.is_some()).await;

    assert_eq!(
        snapshot.error,
        Some(SessionError::AuthRejected {
            reason: Some("token revoked".to_string())
        })
    );
    assert_eq!(snapshot.total_count(), 0);
    assert!(!snapshot.is_connected());
    feed.assert_no_connection().await;

    client.teardown().await;
}

#[tokio::test]
async fn expired_session_close_is_final() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let mut socket = feed.accept_authenticated().await;
    wait_for(&mut rx, |s| s.is_connected()).await;

    socket
        .close(Some(CloseFrame {
            code: CloseCode::from(4002),
            reason: "expired".into(),
        }))
        .await
        .unwrap();

    match timeout(WAIT, socket.next()).await.expect("close not answered") {
        Some(Ok(Message::Close(Some(reply)))) => assert_eq!(u16::from(reply.code), 4002),
        other => panic!("expected close reply, got {:?}", other),
    }

    let snapshot = wait_for(&mut rx, |s| s.error.is_some()).await;
    assert_eq!(snapshot.error, Some(SessionError::SessionExpired { code: 4002 }));
    feed.assert_no_connection().await;

    client.teardown().await;
}

#[tokio::test]
async fn dropped_connection_is_retried() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let mut socket = feed.accept_authenticated().await;
    send(&mut socket, update_frame()).await;
    let before = wait_for(&mut rx, |s| s.is_connected() && s.vessel_count() == 1).await;
    drop(socket);

    let pending = wait_for(&mut rx, |s| !s.is_connected()).await;
    assert!(
        matches!(
            pending.status,
            ConnectionStatus::ReconnectPending { attempt: 1, .. }
                | ConnectionStatus::Closing
                | ConnectionStatus::Connecting
                | ConnectionStatus::Authenticating
        ),
        "{:?}",
        pending.status
    );
    assert_eq!(pending.error, None);
    assert_eq!(pending.vessels, before.vessels);
    assert_eq!(pending.trackers, before.trackers);

    let mut socket = feed.accept_authenticated().await;
    let snapshot = wait_for(&mut rx, |s| s.is_connected()).await;
    assert_eq!(snapshot.attempt, 0);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.vessels, before.vessels);
    assert_eq!(snapshot.last_update, before.last_update);

    send(
        &mut socket,
        json!({"type": "update", "timestamp": "2024-05-01T12:05:00Z", "data": []}),
    )
    .await;
    wait_for(&mut rx, |s| s.total_count() == 0).await;

    client.teardown().await;
}

#[tokio::test]
async fn update_replaces_previous_snapshot() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let mut socket = feed.accept_authenticated().await;
    send(&mut socket, update_frame()).await;
    wait_for(&mut rx, |s| s.total_count() == 2).await;

    send(
        &mut socket,
        json!({
            "type": "update",
            "timestamp": "2024-05-01T12:01:00Z",
            "data": [
                {"mmsi": 271000777, "name": "Poyraz", "mapped": true},
                {"imei": "356938035643999", "name": "Buoy", "mapped": false},
                {"imei": "356938035644000", "name": "Buoy 2", "mapped": false}
            ]
        }),
    )
    .await;
    let snapshot = wait_for(&mut rx, |s| s.tracker_count() == 2).await;

    let mmsis: Vec<_> = snapshot
        .vessels
        .iter()
        .map(|v| v.mmsi.map(|m| m.value()))
        .collect();
    assert_eq!(mmsis, vec![Some(271000777)]);
    assert_eq!(snapshot.trackers[0].as_value()["name"], "Buoy");
    assert_eq!(snapshot.trackers[1].as_value()["name"], "Buoy 2");
    assert_eq!(
        snapshot.last_update.map(|t| t.to_rfc3339()),
        Some("2024-05-01T12:01:00+00:00".to_string())
    );

    client.teardown().await;
}

#[tokio::test]
async fn manual_reconnect_replaces_socket() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let mut first = feed.accept_authenticated().await;
    wait_for(&mut rx, |s| s.is_connected()).await;

    client.reconnect().unwrap();

    let (_second, uri) = feed.accept().await;
    assert!(uri.contains("token=secret-token"));
    loop {
        match timeout(WAIT, first.next()).await.expect("old socket left open") {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }

    client.teardown().await;
}

#[tokio::test]
async fn missing_token_never_connects() {
    let feed = MockFeed::start().await;
    let mut client =
        FeedClient::connect(feed.config(), Arc::new(StaticToken::none())).unwrap();
    let mut rx = client.subscribe();

    let snapshot = wait_for(&mut rx, |s| s.error.is_some()).await;
    assert_eq!(snapshot.error, Some(SessionError::NoCredential));
    assert_eq!(snapshot.status, ConnectionStatus::Error(SessionError::NoCredential));
    feed.assert_no_connection().await;

    client.teardown().await;
}

#[tokio::test]
async fn teardown_is_idempotent() {
    let feed = MockFeed::start().await;
    let mut client = client(feed.config());
    let mut rx = client.subscribe();

    let mut socket = feed.accept_authenticated().await;
    wait_for(&mut rx, |s| s.is_connected()).await;

    client.teardown().await;
    client.teardown().await;

    assert_eq!(client.snapshot().status, ConnectionStatus::Disconnected);
    assert!(matches!(client.reconnect(), Err(FeedError::TornDown)));
    match timeout(WAIT, socket.next()).await.expect("socket left open") {
        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("unexpected frame {:?}", other),
    }
    feed.assert_no_connection().await;
}
