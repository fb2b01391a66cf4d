use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use realtime_client::{
    ClientConfig, ClientEvent, ConnectionState, Message, MessageKind, OutboundMessage,
    RealtimeClient,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite;

const WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;
type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

struct MockRealtimeServer {
    listener: TcpListener,
    port: u16,
}

impl MockRealtimeServer {
    async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    fn endpoint(&self) -> String {
        format!("ws://127.0.0.1:{}/ws/notifications", self.port)
    }

    async fn accept(&self) -> TestResult<WsStream> {
        let (tcp, _) = self.listener.accept().await?;
        Ok(tokio_tungstenite::accept_async(tcp).await?)
    }
}

async fn send_json(ws: &mut WsStream, value: serde_json::Value) -> TestResult<()> {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await?;
    Ok(())
}

/// Next JSON text frame from the client, or `None` once it closed.
async fn read_json(ws: &mut WsStream) -> TestResult<Option<serde_json::Value>> {
    while let Some(frame) = ws.next().await {
        match frame? {
            tungstenite::Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            tungstenite::Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

async fn read_joins(ws: &mut WsStream, n: usize) -> TestResult<Vec<String>> {
    let mut rooms = Vec::with_capacity(n);
    while rooms.len() < n {
        let frame = read_json(ws).await?.ok_or("client closed before joining")?;
        if frame["type"] == "join_room" {
            rooms.push(frame["room"].as_str().unwrap_or_default().to_string());
        }
    }
    Ok(rooms)
}

/// Keep the connection open until the client goes away.
async fn hold(mut ws: WsStream) {
    while let Ok(Some(_)) = read_json(&mut ws).await {}
}

fn config(endpoint: String) -> ClientConfig {
    ClientConfig::new(endpoint).with_reconnect_interval(Duration::from_millis(100))
}

fn forward(client: &RealtimeClient, kind: MessageKind) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = client.on_message(kind, move |m: &Message| {
        let _ = tx.send(m.clone());
    });
    rx
}

async fn wait_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

// ---------------------------------------------------------------------------
// Test 1: connect, join the default room, receive a message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_join_default_room_and_receive() {
    let server = MockRealtimeServer::start().await.unwrap();
    let client = RealtimeClient::new(config(server.endpoint())).unwrap();
    let mut referrals = forward(&client, MessageKind::NewReferral);

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await.unwrap();
        let rooms = read_joins(&mut ws, 1).await.unwrap();
        send_json(&mut ws, serde_json::json!({"type": "connection_established", "data": {"user": 7}}))
            .await
            .unwrap();
        send_json(
            &mut ws,
            serde_json::json!({
                "type": "new_referral",
                "timestamp": "2026-03-01T10:00:00.000Z",
                "data": {"referralId": 42, "priority": "urgent"}
            }),
        )
        .await
        .unwrap();
        hold(ws).await;
        rooms
    });

    client.connect();
    let msg = tokio::time::timeout(WAIT, referrals.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.kind, MessageKind::NewReferral);
    assert_eq!(msg.data.unwrap()["referralId"], 42);
    assert_eq!(msg.timestamp.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    assert!(client.is_connected());

    client.disconnect().await;
    let rooms = tokio::time::timeout(WAIT, server_task).await.unwrap().unwrap();
    assert_eq!(rooms, vec!["general"]);
}

// ---------------------------------------------------------------------------
// Test 2: server drops the socket, client reconnects and rejoins rooms
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_rejoins_rooms() {
    let server = MockRealtimeServer::start().await.unwrap();
    let client = RealtimeClient::new(config(server.endpoint())).unwrap();
    let mut events = client.events();
    client.join_room("alerts");

    let server_task = tokio::spawn(async move {
        let mut first = server.accept().await.unwrap();
        let first_rooms = read_joins(&mut first, 2).await.unwrap();
        first.close(None).await.unwrap();
        drop(first);

        let mut second = server.accept().await.unwrap();
        let second_rooms = read_joins(&mut second, 2).await.unwrap();
        (first_rooms, second_rooms, second)
    });

    client.connect();
    wait_event(&mut events, |e| *e == ClientEvent::Connected).await;
    wait_event(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    wait_event(&mut events, |e| *e == ClientEvent::Connected).await;

    let (first_rooms, second_rooms, second) =
        tokio::time::timeout(WAIT, server_task).await.unwrap().unwrap();
    assert_eq!(first_rooms, vec!["general", "alerts"]);
    assert_eq!(second_rooms, vec!["general", "alerts"]);

    client.disconnect().await;
    drop(second);
}

// ---------------------------------------------------------------------------
// Test 3: heartbeat pings reach the server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_pings_reach_server() {
    let server = MockRealtimeServer::start().await.unwrap();
    let client = RealtimeClient::new(
        config(server.endpoint())
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_default_room(None),
    )
    .unwrap();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await.unwrap();
        let mut pings = Vec::new();
        for _ in 0..2 {
            let frame = read_json(&mut ws).await.unwrap().unwrap();
            send_json(&mut ws, serde_json::json!({"type": "pong"})).await.unwrap();
            pings.push(frame);
        }
        pings
    });

    client.connect();
    let pings = tokio::time::timeout(WAIT, server_task).await.unwrap().unwrap();
    for ping in pings {
        assert_eq!(ping["type"], "ping");
        let ts = ping["timestamp"].as_str().unwrap();
        assert!(is_millis_utc(ts), "bad timestamp {ts}");
    }
    client.disconnect().await;
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
fn is_millis_utc(ts: &str) -> bool {
    ts.len() == 24 && ts.ends_with('Z') && chrono::DateTime::parse_from_rfc3339(ts).is_ok()
}

// ---------------------------------------------------------------------------
// Test 4: server error frames become events, connection stays open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_surfaced() {
    let server = MockRealtimeServer::start().await.unwrap();
    let client = RealtimeClient::new(config(server.endpoint())).unwrap();
    let mut events = client.events();
    let mut errors = forward(&client, MessageKind::Error);

    tokio::spawn(async move {
        let mut ws = server.accept().await.unwrap();
        read_joins(&mut ws, 1).await.unwrap();
        send_json(&mut ws, serde_json::json!({"type": "error", "message": "Unauthorized room"}))
            .await
            .unwrap();
        hold(ws).await;
    });

    client.connect();
    let event = wait_event(&mut events, |e| matches!(e, ClientEvent::ServerError { .. })).await;
    assert_eq!(
        event,
        ClientEvent::ServerError {
            message: "Unauthorized room".into()
        }
    );
    let msg = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert_eq!(msg.data, Some(serde_json::json!({"message": "Unauthorized room"})));
    assert!(client.is_connected());
    client.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test 5: malformed frames are dropped without closing the connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let server = MockRealtimeServer::start().await.unwrap();
    let client = RealtimeClient::new(config(server.endpoint())).unwrap();
    let mut events = client.events();
    let mut stats = forward(&client, MessageKind::Statistics);

    tokio::spawn(async move {
        let mut ws = server.accept().await.unwrap();
        read_joins(&mut ws, 1).await.unwrap();
        ws.send(tungstenite::Message::Text("garbage".into())).await.unwrap();
        ws.send(tungstenite::Message::Text("[1,2]".into())).await.unwrap();
        ws.send(tungstenite::Message::Binary(vec![0xff, 0xfe].into()))
            .await
            .unwrap();
        // UTF-8 JSON in a binary frame is accepted.
        ws.send(tungstenite::Message::Binary(
            br#"{"type":"statistics","data":{"openCases":3}}"#.to_vec().into(),
        ))
        .await
        .unwrap();
        hold(ws).await;
    });

    client.connect();
    let msg = tokio::time::timeout(WAIT, stats.recv()).await.unwrap().unwrap();
    assert_eq!(msg.data, Some(serde_json::json!({"openCases": 3})));
    assert!(client.is_connected());

    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ClientEvent::Disconnected { .. }), "{event:?}");
    }
    client.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test 6: outbound messages and explicit disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_and_disconnect_close_the_socket() {
    let server = MockRealtimeServer::start().await.unwrap();
    let client = RealtimeClient::new(config(server.endpoint())).unwrap();
    let mut state = client.state_changes();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await.unwrap();
        read_joins(&mut ws, 1).await.unwrap();
        let sent = read_json(&mut ws).await.unwrap().unwrap();
        // Next read observes the close handshake.
        let after = read_json(&mut ws).await.unwrap();
        (sent, after.is_none())
    });

    client.connect();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .unwrap()
        .unwrap();
    client.send(
        OutboundMessage::new(MessageKind::ProcessingStatus)
            .with_room("ward-3")
            .with_data(serde_json::json!({"caseId": 12, "status": "reviewed"})),
    );
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);

    let (sent, closed) = tokio::time::timeout(WAIT, server_task).await.unwrap().unwrap();
    assert_eq!(sent["type"], "processing_status");
    assert_eq!(sent["room"], "ward-3");
    assert_eq!(sent["data"]["status"], "reviewed");
    assert!(closed);
}

// ---------------------------------------------------------------------------
// Test 7: unreachable server exhausts retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_server_exhausts_retries() {
    let endpoint = {
        let server = MockRealtimeServer::start().await.unwrap();
        server.endpoint()
    };
    let client = RealtimeClient::new(
        ClientConfig::new(endpoint)
            .with_reconnect_interval(Duration::from_millis(50))
            .with_max_reconnect_attempts(2)
            .with_connect_timeout(Duration::from_secs(2)),
    )
    .unwrap();
    let mut events = client.events();

    client.connect();
    let event = wait_event(&mut events, |e| {
        matches!(e, ClientEvent::ReconnectExhausted { .. })
    })
    .await;
    assert_eq!(event, ClientEvent::ReconnectExhausted { attempts: 2 });
    assert_eq!(client.state(), ConnectionState::Closed);
}
