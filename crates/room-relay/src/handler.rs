//! HTTP handlers: Engine.IO polling and WebSocket transports, health and info

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::TransportKind;
use crate::error::Result;
use crate::manager::{ConnectionManager, DisconnectReason, Session};
use crate::options::SocketOptions;
use crate::protocol::{self, EnginePacket, Handshake, SocketPacket};
use crate::relay::EventRelay;

/// Path the socket endpoint is mounted at
pub const SOCKET_PATH: &str = "/socket.io";

/// Upper bound on packets returned by one poll
const MAX_PACKETS_PER_POLL: usize = 256;

/// Shared state for handlers
#[derive(Clone)]
pub struct RelayState {
    pub connection_manager: ConnectionManager,
    pub relay: EventRelay,
    pub options: Arc<SocketOptions>,
}

#[derive(Debug, Deserialize)]
pub struct EngineQuery {
    #[serde(rename = "EIO")]
    pub eio: Option<String>,
    pub transport: Option<String>,
    pub sid: Option<String>,
}

/// Engine.IO handshake failures, rejected before a connection exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    UnknownTransport,
    UnknownSid,
    BadHandshakeMethod,
    BadRequest,
    Forbidden,
    UnsupportedProtocolVersion,
}

impl HandshakeError {
    pub fn code(&self) -> u8 {
        match self {
            HandshakeError::UnknownTransport => 0,
            HandshakeError::UnknownSid => 1,
            HandshakeError::BadHandshakeMethod => 2,
            HandshakeError::BadRequest => 3,
            HandshakeError::Forbidden => 4,
            HandshakeError::UnsupportedProtocolVersion => 5,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            HandshakeError::UnknownTransport => "Transport unknown",
            HandshakeError::UnknownSid => "Session ID unknown",
            HandshakeError::BadHandshakeMethod => "Bad handshake method",
            HandshakeError::BadRequest => "Bad request",
            HandshakeError::Forbidden => "Forbidden",
            HandshakeError::UnsupportedProtocolVersion => "Unsupported protocol version",
        }
    }
}

#[derive(Serialize)]
struct HandshakeErrorBody {
    code: u8,
    message: &'static str,
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let status = match self {
            HandshakeError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(HandshakeErrorBody {
                code: self.code(),
                message: self.message(),
            }),
        )
            .into_response()
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Checks shared by every socket request
fn check_request(
    options: &SocketOptions,
    query: &EngineQuery,
    headers: &HeaderMap,
) -> std::result::Result<TransportKind, HandshakeError> {
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        if !options.allowed_origins.allows(origin) {
            return Err(HandshakeError::Forbidden);
        }
    }
    if query.eio.as_deref() != Some(protocol::ENGINE_IO_VERSION) {
        return Err(HandshakeError::UnsupportedProtocolVersion);
    }
    query
        .transport
        .as_deref()
        .and_then(TransportKind::parse)
        .filter(|t| options.allows_transport(*t))
        .ok_or(HandshakeError::UnknownTransport)
}

fn handshake(state: &RelayState, session: &Session) -> EnginePacket {
    let upgrades = if session.transport() == TransportKind::Polling
        && state.options.allows_transport(TransportKind::WebSocket)
    {
        vec![TransportKind::WebSocket.as_str().to_string()]
    } else {
        Vec::new()
    };
    Handshake {
        sid: session.id().to_string(),
        upgrades,
        ping_interval: state.options.ping_interval.as_millis() as u64,
        ping_timeout: state.options.ping_timeout.as_millis() as u64,
        max_payload: state.options.max_payload,
    }
    .to_packet()
}

fn text_response(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
        body,
    )
        .into_response()
}

/// `GET /socket.io/`: polling handshake, long-poll, or WebSocket
pub async fn socket_get(
    State(state): State<RelayState>,
    Query(query): Query<EngineQuery>,
    headers: HeaderMap,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let transport = match check_request(&state.options, &query, &headers) {
        Ok(t) => t,
        Err(e) => {
            debug!(code = e.code(), reason = e.message(), "Socket request rejected");
            return e.into_response();
        }
    };

    match (transport, query.sid) {
        (TransportKind::Polling, None) => {
            let session = state.connection_manager.register(
                TransportKind::Polling,
                client_ip(&headers),
                user_agent(&headers),
            );
            text_response(handshake(&state, &session).encode())
        }
        (TransportKind::Polling, Some(sid)) => {
            let Some(session) = state.connection_manager.get(&sid) else {
                return HandshakeError::UnknownSid.into_response();
            };
            if session.transport() != TransportKind::Polling {
                return HandshakeError::BadRequest.into_response();
            }
            poll(&state, &session).await
        }
        (TransportKind::WebSocket, sid) => {
            let Ok(ws) = ws else {
                return HandshakeError::BadRequest.into_response();
            };
            match sid {
                Some(sid) => {
                    let Some(session) = state.connection_manager.get(&sid) else {
                        return HandshakeError::UnknownSid.into_response();
                    };
                    if session.transport() != TransportKind::Polling {
                        return HandshakeError::BadRequest.into_response();
                    }
                    ws.on_upgrade(move |socket| upgrade_websocket(state, session, socket))
                }
                None => {
                    let ip = client_ip(&headers);
                    let agent = user_agent(&headers);
                    ws.on_upgrade(move |socket| async move {
                        let session = state.connection_manager.register(
                            TransportKind::WebSocket,
                            ip,
                            agent,
                        );
                        run_websocket(state, session, socket, true).await;
                    })
                }
            }
        }
    }
}

/// `POST /socket.io/`: packets sent by a polling client
pub async fn socket_post(
    State(state): State<RelayState>,
    Query(query): Query<EngineQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let transport = match check_request(&state.options, &query, &headers) {
        Ok(t) => t,
        Err(e) => return e.into_response(),
    };
    if transport != TransportKind::Polling {
        return HandshakeError::BadRequest.into_response();
    }
    let Some(sid) = query.sid else {
        return HandshakeError::BadHandshakeMethod.into_response();
    };
    let Some(session) = state.connection_manager.get(&sid) else {
        return HandshakeError::UnknownSid.into_response();
    };

    for packet in protocol::decode_payload(&body) {
        if session.is_closed() {
            break;
        }
        match packet {
            Ok(packet) => {
                if let Err(e) = process_packet(&state, &session, packet).await {
                    warn!(connection_id = %session.id(), error = %e, "Dropping packet");
                }
            }
            Err(e) => warn!(connection_id = %session.id(), error = %e, "Undecodable packet"),
        }
    }

    text_response("ok".to_string())
}

async fn poll(state: &RelayState, session: &Arc<Session>) -> Response {
    // One long-poll at a time per session
    let Ok(mut receiver) = session.receiver.try_lock() else {
        return HandshakeError::BadRequest.into_response();
    };

    let wait = state.options.liveness_timeout();
    let first = tokio::select! {
        _ = session.closed.cancelled() => EnginePacket::Close,
        received = tokio::time::timeout(wait, receiver.recv()) => match received {
            Ok(Some(packet)) => packet,
            Ok(None) => EnginePacket::Close,
            Err(_) => EnginePacket::Noop,
        },
    };

    let mut packets = vec![first];
    while packets.len() < MAX_PACKETS_PER_POLL {
        match receiver.try_recv() {
            Ok(packet) => packets.push(packet),
            Err(_) => break,
        }
    }
    session.touch();
    text_response(protocol::encode_payload(&packets))
}

/// Apply one inbound Engine.IO packet
pub async fn process_packet(
    state: &RelayState,
    session: &Arc<Session>,
    packet: EnginePacket,
) -> Result<()> {
    session.touch();
    match packet {
        EnginePacket::Message(text) => {
            let socket_packet = SocketPacket::decode(&text)?;
            handle_socket_packet(state, session, socket_packet).await;
        }
        EnginePacket::Ping(data) => {
            let _ = session.connection.try_send(EnginePacket::Pong(data));
        }
        EnginePacket::Close => {
            state
                .connection_manager
                .unregister(session.id(), DisconnectReason::ClientClose);
        }
        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop | EnginePacket::Open(_) => {}
    }
    Ok(())
}

async fn handle_socket_packet(state: &RelayState, session: &Arc<Session>, packet: SocketPacket) {
    if packet.namespace() != "/" {
        if matches!(packet, SocketPacket::Connect { .. }) {
            let error = SocketPacket::ConnectError {
                namespace: packet.namespace().to_string(),
                message: "Invalid namespace".to_string(),
            };
            let _ = session.connection.try_send(EnginePacket::Message(error.encode()));
        }
        debug!(connection_id = %session.id(), namespace = packet.namespace(), "Unsupported namespace");
        return;
    }

    match packet {
        SocketPacket::Connect { .. } => {
            if session.connect_socket() {
                info!(connection_id = %session.id(), transport = %session.transport(), "Socket connected");
            }
            let ack = SocketPacket::Connect {
                namespace: "/".to_string(),
                data: Some(serde_json::json!({ "sid": session.id() })),
            };
            let _ = session.connection.try_send(EnginePacket::Message(ack.encode()));
        }
        SocketPacket::Disconnect { .. } => {
            state
                .connection_manager
                .unregister(session.id(), DisconnectReason::ClientDisconnect);
        }
        SocketPacket::Event { name, payload, .. } => {
            if session.is_closed() {
                debug!(connection_id = %session.id(), event = %name, "Event after close, dropping");
                return;
            }
            if !session.is_socket_connected() {
                debug!(connection_id = %session.id(), event = %name, "Event before connect, dropping");
                return;
            }
            state.relay.handle_raw(&session.connection, &name, payload).await;
            // Unregister may have run while the event was handled
            if session.is_closed() {
                state.relay.registry().leave_all(session.id());
            }
        }
        SocketPacket::ConnectError { .. } => {}
    }
}

/// Probe and switch a polling session to WebSocket
async fn upgrade_websocket(state: RelayState, session: Arc<Session>, mut socket: WebSocket) {
    loop {
        let text = match socket.recv().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                debug!(connection_id = %session.id(), "Upgrade aborted by client");
                return;
            }
            Some(Err(e)) => {
                debug!(connection_id = %session.id(), error = %e, "Upgrade transport error");
                return;
            }
            Some(Ok(_)) => continue,
        };

        match EnginePacket::decode(text.as_str()) {
            Ok(packet) if packet.is_probe() => {
                let pong = EnginePacket::Pong(Some("probe".to_string())).encode();
                if socket.send(Message::Text(pong.into())).await.is_err() {
                    return;
                }
                // The client pauses polling and waits for its open poll to return before `5`
                release_pending_poll(&session);
            }
            Ok(EnginePacket::Upgrade) => {
                session.mark_upgraded();
                release_pending_poll(&session);
                info!(connection_id = %session.id(), "Transport upgraded to websocket");
                break;
            }
            Ok(packet) => {
                if let Err(e) = process_packet(&state, &session, packet).await {
                    warn!(connection_id = %session.id(), error = %e, "Dropping packet");
                }
            }
            Err(e) => warn!(connection_id = %session.id(), error = %e, "Undecodable packet"),
        }
    }

    run_websocket(state, session, socket, false).await;
}

/// Answer a long-poll still holding the receiver with a noop
fn release_pending_poll(session: &Session) {
    if session.receiver.try_lock().is_err() {
        let _ = session.connection.try_send(EnginePacket::Noop);
    }
}

/// Pump packets between a WebSocket and its session until either side closes
async fn run_websocket(state: RelayState, session: Arc<Session>, socket: WebSocket, send_open: bool) {
    let (mut tx, mut rx) = socket.split();

    if send_open {
        let open = handshake(&state, &session).encode();
        if tx.send(Message::Text(open.into())).await.is_err() {
            state
                .connection_manager
                .unregister(session.id(), DisconnectReason::TransportClose);
            return;
        }
    }

    let writer_session = session.clone();
    let writer = tokio::spawn(async move {
        let mut receiver = writer_session.receiver.lock().await;
        loop {
            tokio::select! {
                _ = writer_session.closed.cancelled() => {
                    // Flush a close packet queued just before the session ended
                    while let Ok(packet) = receiver.try_recv() {
                        if packet == EnginePacket::Close {
                            let _ = tx.send(Message::Text(packet.encode().into())).await;
                        }
                    }
                    let _ = tx.close().await;
                    break;
                }
                packet = receiver.recv() => {
                    let Some(packet) = packet else { break };
                    let is_close = packet == EnginePacket::Close;
                    if tx.send(Message::Text(packet.encode().into())).await.is_err() {
                        break;
                    }
                    if is_close {
                        break;
                    }
                }
            }
        }
    });

    let reason = loop {
        tokio::select! {
            _ = session.closed.cancelled() => break None,
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(text.as_str()) {
                    Ok(packet) => {
                        if let Err(e) = process_packet(&state, &session, packet).await {
                            warn!(connection_id = %session.id(), error = %e, "Dropping packet");
                        }
                    }
                    Err(e) => warn!(connection_id = %session.id(), error = %e, "Undecodable packet"),
                },
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection_id = %session.id(), "Received binary message, ignoring");
                }
                Some(Ok(Message::Close(_))) | None => break Some(DisconnectReason::TransportClose),
                Some(Ok(_)) => session.touch(),
                Some(Err(e)) => {
                    warn!(connection_id = %session.id(), error = %e, "WebSocket error");
                    break Some(DisconnectReason::TransportClose);
                }
            }
        }
    };

    if let Some(reason) = reason {
        state.connection_manager.unregister(session.id(), reason);
    }
    let _ = writer.await;
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub instance_id: String,
    pub backbone: &'static str,
    pub connections: usize,
    pub rooms: usize,
    pub timestamp: String,
}

/// Liveness endpoint
pub async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        instance_id: state.relay.instance_id().to_string(),
        backbone: state.relay.backbone().name(),
        connections: state.connection_manager.connection_count(),
        rooms: state.relay.registry().room_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct InfoResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub socket_path: &'static str,
    pub transports: Vec<&'static str>,
}

/// Service description endpoint
pub async fn info(State(state): State<RelayState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        socket_path: SOCKET_PATH,
        transports: state.options.transports.iter().map(|t| t.as_str()).collect(),
    })
}
