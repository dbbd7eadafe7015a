// Shared helpers for the in-process server tests
#![allow(dead_code)]

use futures_util::StreamExt;
use socket_hub::core::{ConnectionManager, Event};
use socket_hub::ServerConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(300);

pub fn local_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0)
}

// Forward every event of `kind` into a channel
pub fn collect(manager: &ConnectionManager, kind: &str) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on(kind, move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    rx
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

pub async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<Event>) {
    if let Ok(Some(event)) = tokio::time::timeout(QUIET, rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}

pub async fn connect(addr: SocketAddr) -> Client {
    let url = format!("ws://{}/", addr);
    let (ws, _) = tokio::time::timeout(WAIT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("Failed to establish WebSocket connection");
    ws
}

// Connect and wait for the server to announce the new id
pub async fn connect_and_wait(
    addr: SocketAddr,
    connections: &mut mpsc::UnboundedReceiver<Event>,
) -> (Client, String) {
    let ws = connect(addr).await;
    match next_event(connections).await {
        Event::Connection(e) => (ws, e.client_id),
        other => panic!("expected connection event, got {:?}", other),
    }
}

pub async fn next_text(ws: &mut Client) -> String {
    match tokio::time::timeout(WAIT, ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        other => panic!("expected text frame, got {:?}", other),
    }
}

pub async fn expect_close(ws: &mut Client) -> (u16, String) {
    loop {
        match tokio::time::timeout(WAIT, ws.next()).await {
            Ok(Some(Ok(Message::Close(Some(frame))))) => {
                let received = (u16::from(frame.code), frame.reason.into_owned());
                // Keep polling so the close reply is flushed and the handshake completes
                while let Ok(Some(Ok(_))) = tokio::time::timeout(WAIT, ws.next()).await {}
                return received;
            }
            Ok(Some(Ok(Message::Close(None)))) => panic!("close frame without status"),
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    }
}

pub async fn assert_silent(ws: &mut Client) {
    if let Ok(frame) = tokio::time::timeout(QUIET, ws.next()).await {
        panic!("unexpected frame: {:?}", frame);
    }
}
