//! End-to-end tests over the WebSocket transport

mod common;

use std::time::Duration;

use common::{connect_ack, split_payload, TestServer};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn open_ws(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Next text frame, skipping control frames
async fn read_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

/// Ping and wait for the pong, so every packet sent before it has been handled
async fn sync(ws: &mut WsStream) {
    send_text(ws, "2").await;
    loop {
        if read_text(ws).await == "3" {
            return;
        }
    }
}

/// Direct WebSocket session with the default namespace connected
async fn connect_ws(server: &TestServer) -> (WsStream, String) {
    let mut ws = open_ws(&server.ws_url("EIO=4&transport=websocket")).await;
    let open = read_text(&mut ws).await;
    assert!(open.starts_with('0'), "unexpected open packet: {}", open);
    let handshake: Value = serde_json::from_str(&open[1..]).unwrap();

    send_text(&mut ws, "40").await;
    let ack = loop {
        let packet = read_text(&mut ws).await;
        if let Some(ack) = connect_ack(&[packet]) {
            break ack;
        }
    };
    assert_eq!(ack["sid"], handshake["sid"]);
    (ws, handshake["sid"].as_str().unwrap().to_string())
}

// ============== Direct WebSocket Tests ==============

#[tokio::test]
async fn test_websocket_handshake_has_no_upgrades() {
    let server = TestServer::start().await;
    let mut ws = open_ws(&server.ws_url("EIO=4&transport=websocket")).await;

    let open = read_text(&mut ws).await;
    let handshake: Value = serde_json::from_str(&open[1..]).unwrap();
    assert_eq!(handshake["upgrades"], json!([]));
    assert_eq!(handshake["pingInterval"], json!(25000));
    assert_eq!(server.health().await["connections"], json!(1));
}

#[tokio::test]
async fn test_websocket_and_polling_clients_share_a_room() {
    let server = TestServer::start().await;
    let (mut ws, _) = connect_ws(&server).await;
    let polling = server.connect().await;

    send_text(&mut ws, r#"42["join-project","abc123"]"#).await;
    sync(&mut ws).await;
    server.post(&polling, r#"42["join-project","abc123"]"#).await;

    server
        .post(&polling, r#"42["task-moved",{"projectId":"abc123","taskId":"t1"}]"#)
        .await;
    assert_eq!(
        read_text(&mut ws).await,
        r#"42["task-moved",{"projectId":"abc123","taskId":"t1"}]"#
    );

    send_text(&mut ws, r#"42["task-updated",{"projectId":"abc123","title":"x"}]"#).await;
    let packets = server.poll(&polling).await;
    assert!(
        packets.contains(&r#"42["task-updated",{"projectId":"abc123","title":"x"}]"#.to_string()),
        "polling client did not receive the event: {:?}",
        packets
    );
}

#[tokio::test]
async fn test_websocket_close_removes_connection() {
    let server = TestServer::start().await;
    let (mut ws, _) = connect_ws(&server).await;
    send_text(&mut ws, r#"42["join-chat","room1"]"#).await;
    sync(&mut ws).await;
    assert_eq!(server.health().await["rooms"], json!(1));

    ws.close(None).await.unwrap();

    let mut health = server.health().await;
    for _ in 0..50 {
        if health["connections"] == json!(0) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        health = server.health().await;
    }
    assert_eq!(health["connections"], json!(0));
    assert_eq!(health["rooms"], json!(0));
}

#[tokio::test]
async fn test_websocket_other_namespace_gets_connect_error() {
    let server = TestServer::start().await;
    let mut ws = open_ws(&server.ws_url("EIO=4&transport=websocket")).await;
    read_text(&mut ws).await;

    send_text(&mut ws, "40/admin,").await;
    assert_eq!(
        read_text(&mut ws).await,
        r#"44/admin,{"message":"Invalid namespace"}"#
    );
}

// ============== Upgrade Tests ==============

#[tokio::test]
async fn test_upgrade_releases_open_poll_and_switches_transport() {
    let server = TestServer::start().await;
    let sid = server.connect().await;

    // Long-poll left open, as a client does while it tries the upgrade
    let client = server.client.clone();
    let poll_url = server.poll_url(&sid);
    let pending = tokio::spawn(async move {
        client.get(poll_url).send().await.unwrap().text().await.unwrap()
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut ws = open_ws(&server.ws_url(&format!("EIO=4&transport=websocket&sid={}", sid))).await;
    send_text(&mut ws, "2probe").await;
    assert_eq!(read_text(&mut ws).await, "3probe");

    let released = timeout(Duration::from_secs(3), pending)
        .await
        .expect("open poll should be answered once the upgrade is acknowledged")
        .unwrap();
    assert_eq!(split_payload(&released), vec!["6".to_string()]);

    send_text(&mut ws, "5").await;
    send_text(&mut ws, r#"42["join-project","p1"]"#).await;
    sync(&mut ws).await;

    let other = server.connect().await;
    server.post(&other, r#"42["join-project","p1"]"#).await;
    server
        .post(&other, r#"42["task-created",{"projectId":"p1","taskId":"t2"}]"#)
        .await;
    assert_eq!(
        read_text(&mut ws).await,
        r#"42["task-created",{"projectId":"p1","taskId":"t2"}]"#
    );
    assert_eq!(server.health().await["connections"], json!(2));
}
