//! Shared HTTP harness for the end-to-end tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use room_relay::{CancellationToken, Gateway, GatewayBuilder};
use serde_json::Value;
use tokio::net::TcpListener;

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    cancel: CancellationToken,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Gateway::builder()).await
    }

    pub async fn start_with(builder: GatewayBuilder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gateway = builder.instance_id("it-instance").build().unwrap();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            gateway
                .serve(listener, async move { token.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            cancel,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        }
    }

    pub fn url(&self, query: &str) -> String {
        format!("http://{}/socket.io/?{}", self.addr, query)
    }

    pub fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/socket.io/?{}", self.addr, query)
    }

    pub fn poll_url(&self, sid: &str) -> String {
        self.url(&format!("EIO=4&transport=polling&sid={}", sid))
    }

    /// Polling handshake; returns the session id
    pub async fn handshake(&self) -> String {
        let body = self
            .client
            .get(self.url("EIO=4&transport=polling"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.starts_with('0'), "unexpected open packet: {}", body);
        let open: Value = serde_json::from_str(&body[1..]).unwrap();
        open["sid"].as_str().unwrap().to_string()
    }

    pub async fn post(&self, sid: &str, body: &str) {
        let response = self
            .client
            .post(self.poll_url(sid))
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    pub async fn poll(&self, sid: &str) -> Vec<String> {
        let body = self
            .client
            .get(self.poll_url(sid))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        split_payload(&body)
    }

    /// Handshake and Socket.IO connect
    pub async fn connect(&self) -> String {
        let sid = self.handshake().await;
        self.post(&sid, "40").await;
        let packets = self.poll(&sid).await;
        assert!(
            connect_ack(&packets).is_some(),
            "expected connect ack, got {:?}",
            packets
        );
        sid
    }

    pub async fn health(&self) -> Value {
        self.client
            .get(format!("http://{}/health", self.addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Split a polling response body into packets
pub fn split_payload(body: &str) -> Vec<String> {
    body.split('\x1e').map(|s| s.to_string()).collect()
}

/// Body of the `40{...}` packet, wherever heartbeats put it
pub fn connect_ack(packets: &[String]) -> Option<Value> {
    packets
        .iter()
        .find(|p| p.starts_with("40{"))
        .and_then(|p| serde_json::from_str(&p[2..]).ok())
}
