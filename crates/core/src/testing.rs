//! In-memory link fakes shared by the unit tests of this crate.

use crate::{
    link::{Downstream, LinkError, Upstream},
    protocol::{client::ServerMessage, realtime::ClientEvent},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;

/// One frame written to a [`RecordingDownstream`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Json(ServerMessage),
    Binary(Bytes),
    Closed { code: u16, reason: String },
}

#[derive(Default)]
pub struct RecordingDownstream {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingDownstream {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn json(&self) -> Vec<ServerMessage> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Json(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Downstream for RecordingDownstream {
    async fn send_json(&self, message: ServerMessage) {
        self.sent.lock().unwrap().push(Sent::Json(message));
    }

    async fn send_binary(&self, data: Bytes) {
        self.sent.lock().unwrap().push(Sent::Binary(data));
    }

    async fn close(&self, code: u16, reason: &str) {
        self.sent.lock().unwrap().push(Sent::Closed {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Records every event; optionally rejects events of one wire type.
#[derive(Default)]
pub struct RecordingUpstream {
    events: Mutex<Vec<ClientEvent>>,
    reject_kind: Option<&'static str>,
}

impl RecordingUpstream {
    pub fn rejecting(kind: &'static str) -> Self {
        Self {
            events: Mutex::default(),
            reject_kind: Some(kind),
        }
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ClientEvent::kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    async fn send(&self, event: ClientEvent) -> Result<(), LinkError> {
        if self.reject_kind == Some(event.kind()) {
            return Err(LinkError::NotConnected);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
