//! The browser-facing WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use relay_core::{link::Downstream, protocol::client::ServerMessage};
use std::fmt::Display;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a downstream link. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One inbound frame, as far as the session cares.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    /// The client went away, cleanly or not.
    Disconnected,
}

struct Outbound {
    state: LinkState,
    sink: SplitSink<WebSocket, Message>,
}

/// Wraps an upgraded axum socket. Writes are serialized through one lock that
/// also guards the link state, so no frame can slip out after `close`.
pub struct DownstreamLink {
    outbound: Mutex<Outbound>,
    inbound: Mutex<SplitStream<WebSocket>>,
    log_payloads: bool,
}

/// Logs and discards the error of a send nobody can act on.
fn best_effort<E: Display>(result: Result<(), E>, what: &'static str) {
    if let Err(e) = result {
        debug!(error = %e, what, "Best-effort send to client failed");
    }
}

/// Serializes a [`ServerMessage`] to a WebSocket text message.
fn encode(message: &ServerMessage) -> Result<Message, serde_json::Error> {
    let serialized = serde_json::to_string(message)?;
    Ok(Message::Text(serialized.into()))
}

impl DownstreamLink {
    pub fn new(socket: WebSocket, log_payloads: bool) -> Self {
        let (sink, stream) = socket.split();
        Self {
            outbound: Mutex::new(Outbound {
                state: LinkState::Connecting,
                sink,
            }),
            inbound: Mutex::new(stream),
            log_payloads,
        }
    }

    pub async fn state(&self) -> LinkState {
        self.outbound.lock().await.state
    }

    /// Opens the link and greets the client. No-op unless still connecting.
    pub async fn accept(&self) {
        let mut outbound = self.outbound.lock().await;
        if outbound.state != LinkState::Connecting {
            return;
        }
        outbound.state = LinkState::Open;
        match encode(&ServerMessage::connected()) {
            Ok(message) => best_effort(outbound.sink.send(message).await, "connected"),
            Err(e) => warn!(error = %e, "Failed to encode connected message"),
        }
        info!("Client connection accepted");
    }

    /// Waits for the next text or binary frame from the client.
    pub async fn receive_frame(&self) -> Frame {
        let mut inbound = self.inbound.lock().await;
        loop {
            match inbound.next().await {
                Some(Ok(Message::Text(text))) => return Frame::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => return Frame::Binary(data),
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Client closed the connection");
                    return Frame::Disconnected;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "Error receiving from client");
                    return Frame::Disconnected;
                }
                None => return Frame::Disconnected,
            }
        }
    }

    async fn send_message(&self, message: Message) {
        let mut outbound = self.outbound.lock().await;
        if outbound.state != LinkState::Open {
            trace!(state = ?outbound.state, "Dropping message for client: link not open");
            return;
        }
        if let Err(e) = outbound.sink.send(message).await {
            warn!(error = %e, "Error sending message to client");
        }
    }
}

#[async_trait]
impl Downstream for DownstreamLink {
    async fn send_json(&self, message: ServerMessage) {
        let encoded = match encode(&message) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Failed to encode message for client");
                return;
            }
        };
        if self.log_payloads {
            debug!(?message, "Sending message to client");
        } else {
            debug!(kind = message.kind(), "Sending message to client");
        }
        self.send_message(encoded).await;
    }

    async fn send_binary(&self, data: Bytes) {
        trace!(bytes = data.len(), "Sending audio to client");
        self.send_message(Message::Binary(data)).await;
    }

    async fn close(&self, code: u16, reason: &str) {
        let mut outbound = self.outbound.lock().await;
        if matches!(outbound.state, LinkState::Closing | LinkState::Closed) {
            return;
        }
        let was_open = outbound.state == LinkState::Open;
        outbound.state = LinkState::Closing;

        if was_open {
            if let Ok(message) = encode(&ServerMessage::disconnected()) {
                best_effort(outbound.sink.send(message).await, "disconnected");
            }
        }
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        best_effort(
            outbound.sink.send(Message::Close(Some(frame))).await,
            "close frame",
        );

        outbound.state = LinkState::Closed;
        info!(code, reason, "Client connection closed");
    }
}
