//! Engine.IO v4 and Socket.IO v5 text codec
//!
//! Only the text subset is supported: no binary attachments and no namespaces
//! other than `/`.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Engine.IO protocol revision accepted by the gateway
pub const ENGINE_IO_VERSION: &str = "4";

/// Separator between packets of a polling payload
pub const RECORD_SEPARATOR: char = '\x1e';

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type `{0}`")]
    UnknownType(char),

    #[error("binary packets are not supported")]
    Binary,

    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// Handshake, carries the JSON encoded [`Handshake`]
    Open(String),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    /// Socket.IO packet text
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(data) => format!("0{}", data),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data.as_deref().unwrap_or("")),
            EnginePacket::Pong(data) => format!("3{}", data.as_deref().unwrap_or("")),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();
        let optional = || (!rest.is_empty()).then(|| rest.to_string());
        match kind {
            '0' => Ok(EnginePacket::Open(rest.to_string())),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(optional())),
            '3' => Ok(EnginePacket::Pong(optional())),
            '4' => Ok(EnginePacket::Message(rest.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(ProtocolError::Binary),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    /// `2probe` / `3probe` exchanged during a WebSocket upgrade
    pub fn is_probe(&self) -> bool {
        matches!(self, EnginePacket::Ping(Some(d)) | EnginePacket::Pong(Some(d)) if d == "probe")
    }
}

/// Encode packets as one polling response body
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}

/// Decode a polling request body. Undecodable packets are returned as errors
/// in place so callers can log them individually.
pub fn decode_payload(body: &str) -> Vec<Result<EnginePacket, ProtocolError>> {
    body.split(RECORD_SEPARATOR)
        .filter(|p| !p.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

/// Body of the Engine.IO open packet
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

impl Handshake {
    pub fn to_packet(&self) -> EnginePacket {
        EnginePacket::Open(serde_json::to_string(self).unwrap_or_default())
    }
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        name: String,
        payload: Value,
        ack_id: Option<u64>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    /// Event on the default namespace
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: "/".to_string(),
            name: name.into(),
            payload,
            ack_id: None,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        let (kind, namespace) = match self {
            SocketPacket::Connect { namespace, .. } => ('0', namespace),
            SocketPacket::Disconnect { namespace } => ('1', namespace),
            SocketPacket::Event { namespace, .. } => ('2', namespace),
            SocketPacket::ConnectError { namespace, .. } => ('4', namespace),
        };
        out.push(kind);
        if namespace != "/" {
            out.push_str(namespace);
            out.push(',');
        }
        match self {
            SocketPacket::Connect { data: Some(data), .. } => out.push_str(&data.to_string()),
            SocketPacket::Connect { data: None, .. } | SocketPacket::Disconnect { .. } => {}
            SocketPacket::Event {
                name,
                payload,
                ack_id,
                ..
            } => {
                if let Some(id) = ack_id {
                    out.push_str(&id.to_string());
                }
                let args = match payload {
                    Value::Null => Value::Array(vec![Value::String(name.clone())]),
                    other => Value::Array(vec![Value::String(name.clone()), other.clone()]),
                };
                out.push_str(&args.to_string());
            }
            SocketPacket::ConnectError { message, .. } => {
                out.push_str(&serde_json::json!({ "message": message }).to_string());
            }
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(ProtocolError::Binary);
        }

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let ns = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
            ns
        } else {
            "/".to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        rest = &rest[digits..];

        match kind {
            '0' => {
                let data = if rest.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::from_str(rest)
                            .map_err(|e| ProtocolError::MalformedEvent(e.to_string()))?,
                    )
                };
                Ok(SocketPacket::Connect { namespace, data })
            }
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let args: Vec<Value> = serde_json::from_str(rest)
                    .map_err(|e| ProtocolError::MalformedEvent(e.to_string()))?;
                let mut args = args.into_iter();
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => {
                        return Err(ProtocolError::MalformedEvent(
                            "first argument must be the event name".to_string(),
                        ))
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    name,
                    payload: args.next().unwrap_or(Value::Null),
                    ack_id,
                })
            }
            '4' => {
                let message = serde_json::from_str::<Value>(rest)
                    .ok()
                    .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                    .unwrap_or_default();
                Ok(SocketPacket::ConnectError { namespace, message })
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn engine_packet_decode() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(None));
        assert_eq!(
            EnginePacket::decode("2probe").unwrap(),
            EnginePacket::Ping(Some("probe".into()))
        );
        assert_eq!(EnginePacket::decode("3").unwrap(), EnginePacket::Pong(None));
        assert_eq!(
            EnginePacket::decode("440").unwrap(),
            EnginePacket::Message("40".into())
        );
        assert_eq!(EnginePacket::decode("5").unwrap(), EnginePacket::Upgrade);
        assert_eq!(EnginePacket::decode(""), Err(ProtocolError::Empty));
        assert_eq!(EnginePacket::decode("9"), Err(ProtocolError::UnknownType('9')));
        assert_eq!(EnginePacket::decode("bAQID"), Err(ProtocolError::Binary));
    }

    #[test]
    fn probe_detection() {
        assert!(EnginePacket::Ping(Some("probe".into())).is_probe());
        assert!(EnginePacket::Pong(Some("probe".into())).is_probe());
        assert!(!EnginePacket::Ping(None).is_probe());
    }

    #[test]
    fn polling_payload_split() {
        let body = format!("440{}442[\"a\",1]{}3", RECORD_SEPARATOR, RECORD_SEPARATOR);
        let packets: Vec<_> = decode_payload(&body).into_iter().map(Result::unwrap).collect();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2], EnginePacket::Pong(None));

        let encoded = encode_payload(&[EnginePacket::Noop, EnginePacket::Ping(None)]);
        assert_eq!(encoded, "6\u{1e}2");
    }

    #[test]
    fn handshake_packet_uses_camel_case() {
        let packet = Handshake {
            sid: "abc".into(),
            upgrades: vec!["websocket".into()],
            ping_interval: 25000,
            ping_timeout: 60000,
            max_payload: 1_000_000,
        }
        .to_packet()
        .encode();
        assert!(packet.starts_with("0{"));
        let body: Value = serde_json::from_str(&packet[1..]).unwrap();
        assert_eq!(body["pingInterval"], 25000);
        assert_eq!(body["pingTimeout"], 60000);
        assert_eq!(body["upgrades"][0], "websocket");
    }

    #[test]
    fn socket_event_decode() {
        let packet = SocketPacket::decode(r#"2["task-moved",{"projectId":"abc123"}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/".into(),
                name: "task-moved".into(),
                payload: json!({"projectId": "abc123"}),
                ack_id: None,
            }
        );
    }

    #[test]
    fn socket_event_with_ack_and_namespace() {
        let packet = SocketPacket::decode(r#"2/admin,13["join-chat","x"]"#).unwrap();
        match packet {
            SocketPacket::Event {
                namespace,
                ack_id,
                payload,
                ..
            } => {
                assert_eq!(namespace, "/admin");
                assert_eq!(ack_id, Some(13));
                assert_eq!(payload, json!("x"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn socket_event_without_args_has_null_payload() {
        let packet = SocketPacket::decode(r#"2["ping-me"]"#).unwrap();
        assert!(matches!(packet, SocketPacket::Event { payload: Value::Null, .. }));
    }

    #[test]
    fn socket_event_rejects_bad_shapes() {
        assert!(matches!(
            SocketPacket::decode("2{}"),
            Err(ProtocolError::MalformedEvent(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[1,2]"),
            Err(ProtocolError::MalformedEvent(_))
        ));
        assert_eq!(
            SocketPacket::decode(r#"51-["a",{"_placeholder":true,"num":0}]"#),
            Err(ProtocolError::Binary)
        );
    }

    #[test]
    fn socket_connect_and_disconnect() {
        assert_eq!(
            SocketPacket::decode("0").unwrap(),
            SocketPacket::Connect {
                namespace: "/".into(),
                data: None
            }
        );
        assert_eq!(
            SocketPacket::decode("0/chat,").unwrap().namespace(),
            "/chat"
        );
        assert_eq!(
            SocketPacket::decode("1").unwrap(),
            SocketPacket::Disconnect {
                namespace: "/".into()
            }
        );
    }

    #[test]
    fn socket_encode() {
        let connect = SocketPacket::Connect {
            namespace: "/".into(),
            data: Some(json!({"sid": "s1"})),
        };
        assert_eq!(connect.encode(), r#"0{"sid":"s1"}"#);

        let event = SocketPacket::event("chat-message", json!({"chatId": "room1"}));
        assert_eq!(event.encode(), r#"2["chat-message",{"chatId":"room1"}]"#);

        let error = SocketPacket::ConnectError {
            namespace: "/admin".into(),
            message: "Invalid namespace".into(),
        };
        assert_eq!(error.encode(), r#"4/admin,{"message":"Invalid namespace"}"#);
    }
}
