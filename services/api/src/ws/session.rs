//! Manages the lifecycle of one realtime session: a browser socket paired
//! with a realtime API socket.

use super::{
    downstream::{DownstreamLink, Frame},
    upstream::{UpstreamError, UpstreamLink},
};
use crate::state::{AppState, SessionHandle, SessionRegistry};
use anyhow::{Context, Result};
use axum::{
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use relay_core::{
    defaults::SessionDefaults,
    link::{Downstream, Upstream},
    translator::{Flow, Translator},
};
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Close code sent to the client when a session ends.
const NORMAL_CLOSURE: u16 = 1000;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs one session to completion inside its own span.
#[instrument(name = "realtime_session", skip_all, fields(connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("connection_id", connection_id.as_str());
    info!("New WebSocket connection");

    RealtimeSession::new(connection_id, socket, &state)
        .run(&state.sessions)
        .await;
}

/// Where a session is in its life. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    Accepting,
    Active,
    Closing,
    Closed,
}

impl Phase {
    /// Moves to `next` if that is a step forward. Returns false, leaving the
    /// phase untouched, for a repeated or backward transition.
    pub fn advance(&mut self, next: Phase) -> bool {
        if next <= *self {
            debug!(from = ?self, to = ?next, "Ignoring session phase transition");
            return false;
        }
        debug!(from = ?self, to = ?next, "Session phase transition");
        *self = next;
        true
    }
}

/// Why the receive loops stopped.
#[derive(Debug)]
enum Ended {
    ClientDisconnected,
    ClientRequested,
    UpstreamClosed,
    UpstreamFailed,
}

pub struct RealtimeSession {
    id: String,
    phase: Phase,
    defaults: Arc<SessionDefaults>,
    downstream: Arc<DownstreamLink>,
    upstream: Arc<UpstreamLink>,
    translator: Translator,
}

impl RealtimeSession {
    pub fn new(id: String, socket: WebSocket, state: &AppState) -> Self {
        let config = &state.config;
        let downstream = Arc::new(DownstreamLink::new(socket, config.log_payloads));
        let upstream = Arc::new(UpstreamLink::new(
            config.realtime_endpoint(),
            config.openai_api_key.clone(),
            config.log_payloads,
        ));
        let translator = Translator::new(
            state.defaults.clone(),
            downstream.clone(),
            upstream.clone(),
            state.weather.clone(),
        );
        Self {
            id,
            phase: Phase::Init,
            defaults: state.defaults.clone(),
            downstream,
            upstream,
            translator,
        }
    }

    /// Drives the session from accept to teardown. Registers the session for
    /// its whole lifetime.
    pub async fn run(mut self, registry: &SessionRegistry) {
        registry
            .insert(
                self.id.clone(),
                SessionHandle {
                    connected_at: Instant::now(),
                },
            )
            .await;

        match self.start().await {
            Ok(()) => {
                self.phase.advance(Phase::Active);
                let ended = self.pump().await;
                info!(reason = ?ended, "Session ending");
            }
            Err(e) => error!(error = ?e, "Session failed to start"),
        }

        self.teardown().await;
        if let Some(handle) = registry.remove(&self.id).await {
            info!(
                duration_ms = handle.connected_at.elapsed().as_millis() as u64,
                "Session removed"
            );
        }
    }

    /// Accepts the client, connects upstream and configures the API session.
    async fn start(&mut self) -> Result<()> {
        self.phase.advance(Phase::Accepting);
        self.downstream.accept().await;

        self.upstream
            .connect()
            .await
            .context("Failed to connect to the realtime API")?;
        self.upstream
            .send(self.defaults.session_update())
            .await
            .context("Failed to configure the realtime session")?;
        info!(voice = %self.defaults.voice, "Realtime session configured");

        if let Some(greeting) = self.defaults.greeting() {
            self.upstream
                .send(greeting)
                .await
                .context("Failed to request the greeting")?;
        }
        Ok(())
    }

    /// Runs both receive loops until the first one stops; the other is dropped.
    async fn pump(&self) -> Ended {
        tokio::select! {
            ended = self.pump_downstream() => ended,
            ended = self.pump_upstream() => ended,
        }
    }

    async fn pump_downstream(&self) -> Ended {
        loop {
            match self.downstream.receive_frame().await {
                Frame::Text(text) => {
                    if self.translator.handle_client_text(&text).await == Flow::Disconnect {
                        return Ended::ClientRequested;
                    }
                }
                Frame::Binary(chunk) => self.translator.handle_client_audio(chunk).await,
                Frame::Disconnected => return Ended::ClientDisconnected,
            }
        }
    }

    async fn pump_upstream(&self) -> Ended {
        loop {
            match self.upstream.receive().await {
                Ok(text) => self.translator.handle_server_text(&text).await,
                Err(UpstreamError::Closed) => return Ended::UpstreamClosed,
                Err(e) => {
                    error!(error = %e, "Error receiving from the realtime API");
                    return Ended::UpstreamFailed;
                }
            }
        }
    }

    /// Closes upstream, then downstream, then forgets translator state. Runs
    /// at most once.
    async fn teardown(&mut self) {
        if !self.phase.advance(Phase::Closing) {
            return;
        }

        self.upstream.close().await;
        self.downstream.close(NORMAL_CLOSURE, "Session ended").await;
        self.translator.reset().await;

        self.phase.advance(Phase::Closed);
        info!("Session closed");
    }
}
