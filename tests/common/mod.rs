//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ws_rpc_server::{MethodRegistry, RpcError, RpcHandler, RpcRequest, ServerConfig, WebSocketServer};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Standard methods plus a call counter.
#[derive(Default)]
pub struct CountingHandler {
    calls: AtomicUsize,
    registry: MethodRegistry,
}

impl CountingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            registry: MethodRegistry::standard(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RpcHandler for CountingHandler {
    fn handle(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.registry.handle(request)
    }
}

/// Ephemeral port, one-second idle timeout, short grace period.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind_port: 0,
        idle_timeout_secs: 1,
        max_message_bytes: 64 * 1024,
        worker_threads: Some(2),
        shutdown_grace_secs: 2,
        ..ServerConfig::default()
    }
}

/// Start a server and return it with its bound address.
pub fn start_server(config: ServerConfig, handler: Arc<dyn RpcHandler>) -> (WebSocketServer, SocketAddr) {
    let mut server = WebSocketServer::new(config, handler);
    let addr = server.start().unwrap().local_addr();
    (server, addr)
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (client, response) = connect_async(format!("ws://{}/websocket", addr)).await.unwrap();
    assert_eq!(response.status(), 101);
    client
}

/// Send one request and wait for its response.
pub async fn call(client: &mut Client, method: &str, id: u64) -> Value {
    let request = json!({"jsonrpc": "2.0", "id": id, "method": method});
    client.send(Message::text(request.to_string())).await.unwrap();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("response timed out")
            .expect("connection closed")
            .unwrap();
        if message.is_text() || message.is_binary() {
            return serde_json::from_slice(&message.into_data()).unwrap();
        }
    }
}

/// Read until the server closes the connection. Returns the close frame's
/// code, if the server sent one. Panics if the connection is still open after `within`.
pub async fn wait_closed(client: &mut Client, within: Duration) -> Option<u16> {
    tokio::time::timeout(within, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("connection still open")
}

/// Whether the connection is still open after `window` has elapsed.
pub async fn still_open_after(client: &mut Client, window: Duration) -> bool {
    match tokio::time::timeout(window, client.next()).await {
        Err(_elapsed) => true,
        Ok(Some(Ok(message))) => !message.is_close(),
        Ok(_) => false,
    }
}
