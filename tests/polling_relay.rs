//! End-to-end tests over HTTP long-polling

mod common;

use common::{connect_ack, TestServer};
use room_relay::{AllowedOrigins, Gateway};
use serde_json::{json, Value};

// ============== Handshake Tests ==============

#[tokio::test]
async fn test_polling_handshake_advertises_websocket_upgrade() {
    let server = TestServer::start().await;
    let body = server
        .client
        .get(server.url("EIO=4&transport=polling"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let open: Value = serde_json::from_str(&body[1..]).unwrap();
    assert_eq!(open["upgrades"], json!(["websocket"]));
    assert_eq!(open["pingInterval"], json!(25000));
    assert_eq!(open["pingTimeout"], json!(60000));
}

#[tokio::test]
async fn test_connect_ack_carries_sid() {
    let server = TestServer::start().await;
    let sid = server.handshake().await;
    server.post(&sid, "40").await;

    let packets = server.poll(&sid).await;
    let ack = connect_ack(&packets).expect("connect ack");
    assert_eq!(ack["sid"], json!(sid));
}

#[tokio::test]
async fn test_unsupported_protocol_version() {
    let server = TestServer::start().await;
    let response = server
        .client
        .get(server.url("EIO=3&transport=polling"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], json!(5));
}

#[tokio::test]
async fn test_unknown_transport() {
    let server = TestServer::start().await;
    let response = server
        .client
        .get(server.url("EIO=4&transport=flash"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], json!(0));
}

#[tokio::test]
async fn test_unknown_sid() {
    let server = TestServer::start().await;
    let response = server
        .client
        .get(server.poll_url("does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], json!(1));
}

#[tokio::test]
async fn test_disallowed_origin_is_forbidden() {
    let server = TestServer::start_with(
        Gateway::builder().allowed_origins(AllowedOrigins::parse("https://app.example.com")),
    )
    .await;

    let rejected = server
        .client
        .get(server.url("EIO=4&transport=polling"))
        .header("Origin", "https://evil.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["code"], json!(4));

    let accepted = server
        .client
        .get(server.url("EIO=4&transport=polling"))
        .header("Origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    assert!(accepted.status().is_success());
    assert_eq!(
        accepted.headers()["access-control-allow-origin"],
        "https://app.example.com"
    );
    assert!(accepted.text().await.unwrap().starts_with('0'));
}

// ============== Namespace Tests ==============

#[tokio::test]
async fn test_other_namespace_gets_connect_error() {
    let server = TestServer::start().await;
    let sid = server.handshake().await;
    server.post(&sid, "40/admin,").await;

    let packets = server.poll(&sid).await;
    assert!(
        packets.contains(&r#"44/admin,{"message":"Invalid namespace"}"#.to_string()),
        "expected connect_error, got {:?}",
        packets
    );
}

#[tokio::test]
async fn test_event_before_connect_is_dropped() {
    let server = TestServer::start().await;
    let sid = server.handshake().await;
    server.post(&sid, r#"42["join-project","p1"]"#).await;
    server.post(&sid, "40").await;

    assert_eq!(server.health().await["rooms"], json!(0));
}

#[tokio::test]
async fn test_socket_disconnect_removes_connection() {
    let server = TestServer::start().await;
    let sid = server.connect().await;
    server.post(&sid, r#"42["join-project","p1"]"#).await;
    assert_eq!(server.health().await["rooms"], json!(1));

    server.post(&sid, "41").await;

    let health = server.health().await;
    assert_eq!(health["connections"], json!(0));
    assert_eq!(health["rooms"], json!(0));
}

// ============== Relay Tests ==============

#[tokio::test]
async fn test_task_moved_reaches_other_member_only() {
    let server = TestServer::start().await;
    let a = server.connect().await;
    let b = server.connect().await;

    server.post(&a, r#"42["join-project","abc123"]"#).await;
    server.post(&b, r#"42["join-project","abc123"]"#).await;
    server
        .post(
            &a,
            r#"42["task-moved",{"projectId":"abc123","taskId":"t1","to":"done"}]"#,
        )
        .await;

    let packets = server.poll(&b).await;
    assert!(
        packets.contains(&r#"42["task-moved",{"projectId":"abc123","taskId":"t1","to":"done"}]"#.to_string()),
        "B did not receive the event: {:?}",
        packets
    );

    let health = server.health().await;
    assert_eq!(health["connections"], json!(2));
    assert_eq!(health["rooms"], json!(1));
}

#[tokio::test]
async fn test_chat_message_outside_room_not_delivered() {
    let server = TestServer::start().await;
    let a = server.connect().await;
    let b = server.connect().await;

    server.post(&a, r#"42["join-chat","room1"]"#).await;
    server.post(&b, r#"42["join-chat","room2"]"#).await;
    server
        .post(&a, r#"42["chat-message",{"chatId":"room1","text":"hi"}]"#)
        .await;
    server
        .post(&a, r#"42["chat-message",{"chatId":"room2","text":"hello"}]"#)
        .await;

    let packets = server.poll(&b).await;
    assert_eq!(
        packets,
        vec![r#"42["chat-message",{"chatId":"room2","text":"hello"}]"#.to_string()]
    );
}

#[tokio::test]
async fn test_client_close_removes_connection() {
    let server = TestServer::start().await;
    let sid = server.connect().await;
    server.post(&sid, r#"42["join-project","p1"]"#).await;
    server.post(&sid, "1").await;

    let health = server.health().await;
    assert_eq!(health["connections"], json!(0));
    assert_eq!(health["rooms"], json!(0));
}

// ============== Info Tests ==============

#[tokio::test]
async fn test_health_and_info() {
    let server = TestServer::start().await;

    let health = server.health().await;
    assert_eq!(health["status"], json!("ok"));
    assert_eq!(health["instance_id"], json!("it-instance"));
    assert_eq!(health["backbone"], json!("Noop (local-only)"));

    let info: Value = server
        .client
        .get(format!("http://{}/info", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["name"], json!("room-relay"));
    assert_eq!(info["socket_path"], json!("/socket.io"));
    assert_eq!(info["transports"], json!(["websocket", "polling"]));
}
