//! The two sockets a session talks through, seen from the translator.
//!
//! The concrete links live in the service crate; the translator only needs
//! these traits, which keeps it testable with in-memory fakes.

use crate::protocol::{client::ServerMessage, realtime::ClientEvent};
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Failures when writing to a link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link is not connected")]
    NotConnected,
    #[error("Link was closed by the remote end")]
    Closed,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The browser-facing socket.
///
/// Every write is best-effort: messages sent while the link is not open are
/// dropped, and transport failures are logged rather than returned, so the
/// translator's hot path never fails on a slow or vanished client.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Sends one JSON message to the client.
    async fn send_json(&self, message: ServerMessage);

    /// Sends one binary (PCM16 audio) frame to the client.
    async fn send_binary(&self, data: Bytes);

    /// Sends the farewell control frame and closes the socket. Idempotent.
    async fn close(&self, code: u16, reason: &str);
}

/// The realtime API socket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Serializes and sends one event, reporting transport failures.
    async fn send(&self, event: ClientEvent) -> Result<(), LinkError>;
}
