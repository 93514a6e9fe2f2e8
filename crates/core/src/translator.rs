//! Event translation between the browser protocol and the realtime API.
//!
//! A [`Translator`] belongs to exactly one session. The session's two receive
//! loops call into it concurrently: the downstream loop through
//! [`Translator::handle_client_text`] / [`Translator::handle_client_audio`],
//! the upstream loop through [`Translator::handle_server_text`]. All mutable
//! state sits behind one async mutex that is only held for short sections and
//! never across a send, so the two directions never block each other on I/O.

use crate::{
    defaults::{SessionDefaults, WEATHER_TOOL_NAME},
    link::{Downstream, LinkError, Upstream},
    protocol::{
        client::{ClientMessage, ControlAction, ServerMessage},
        realtime::{ClientEvent, ContentType, Item, ItemType, ResponseResource, Role, ServerEvent},
    },
    weather::{WeatherQuery, WeatherTool},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Close code used when the client asks to disconnect.
const NORMAL_CLOSURE: u16 = 1000;

/// Per-session translation state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslatorState {
    /// Id of the last user item this relay created; ordering hint for the next.
    pub last_item_id: Option<String>,
    /// The response currently streaming. Events for any other id are stale.
    pub current_response_id: Option<String>,
    /// Audio transcript deltas of the current response, joined.
    pub accumulated_transcript: String,
    /// Set from the first audio chunk of an utterance until it is committed.
    pub speech_active: bool,
    /// Placeholder message id of the utterance in progress.
    pub current_audio_item_id: Option<String>,
}

/// What the downstream loop should do after a client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

/// Translates client frames into API events and API events into client frames.
pub struct Translator {
    defaults: Arc<SessionDefaults>,
    downstream: Arc<dyn Downstream>,
    upstream: Arc<dyn Upstream>,
    weather: Arc<dyn WeatherTool>,
    state: Mutex<TranslatorState>,
}

/// Generates a session-unique identifier such as `msg_3f2a...`.
fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

impl Translator {
    pub fn new(
        defaults: Arc<SessionDefaults>,
        downstream: Arc<dyn Downstream>,
        upstream: Arc<dyn Upstream>,
        weather: Arc<dyn WeatherTool>,
    ) -> Self {
        Self {
            defaults,
            downstream,
            upstream,
            weather,
            state: Mutex::new(TranslatorState::default()),
        }
    }

    /// A snapshot of the current translation state.
    pub async fn state(&self) -> TranslatorState {
        self.state.lock().await.clone()
    }

    /// Forgets everything; used during session teardown.
    pub async fn reset(&self) {
        *self.state.lock().await = TranslatorState::default();
    }

    // --- Client -> API ---

    /// Handles one JSON text frame from the client.
    pub async fn handle_client_text(&self, text: &str) -> Flow {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Invalid JSON message received from client");
                return Flow::Continue;
            }
        };
        let message = match ClientMessage::deserialize(&value) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Malformed client message");
                return Flow::Continue;
            }
        };

        match message {
            ClientMessage::Disconnect => {
                info!("Received disconnect request from client");
                self.downstream
                    .close(NORMAL_CLOSURE, "Client requested disconnect")
                    .await;
                Flow::Disconnect
            }
            ClientMessage::UserMessage { text } => {
                self.forward_user_text(text.unwrap_or_default()).await;
                Flow::Continue
            }
            ClientMessage::Unknown => {
                let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
                warn!(kind, "Unhandled client message type");
                Flow::Continue
            }
        }
    }

    async fn forward_user_text(&self, text: String) {
        if text.is_empty() {
            warn!("Received empty user message");
            return;
        }

        let item_id = new_id("msg");
        let previous_item_id = self.state.lock().await.last_item_id.clone();
        let events = [
            ClientEvent::ConversationItemCreate {
                event_id: Some(new_id("event")),
                previous_item_id,
                item: Item::user_text(Some(item_id.clone()), text),
            },
            ClientEvent::ResponseCreate {
                event_id: Some(new_id("event")),
                response: Some(self.defaults.text_response()),
            },
        ];

        match self.send_all(events).await {
            Ok(()) => {
                debug!(%item_id, "User message forwarded");
                self.state.lock().await.last_item_id = Some(item_id);
            }
            Err(e) => error!(error = %e, "Failed to forward user message to the realtime API"),
        }
    }

    /// Handles one binary (PCM16) frame from the client.
    pub async fn handle_client_audio(&self, chunk: Bytes) {
        let new_utterance = {
            let mut state = self.state.lock().await;
            if state.speech_active {
                None
            } else {
                let id = new_id("audio");
                state.speech_active = true;
                state.current_audio_item_id = Some(id.clone());
                state.accumulated_transcript.clear();
                Some(id)
            }
        };

        if let Some(id) = new_utterance {
            info!(item_id = %id, "Speech started - new utterance detected");
            self.downstream
                .send_json(ServerMessage::transcribing_placeholder(Some(id)))
                .await;
        }

        trace!(bytes = chunk.len(), "Forwarding audio chunk");
        let append = ClientEvent::InputAudioBufferAppend {
            event_id: None,
            audio: BASE64.encode(&chunk),
        };
        if let Err(e) = self.upstream.send(append).await {
            error!(error = %e, "Error sending audio to the realtime API");
            let item_id = {
                let mut state = self.state.lock().await;
                state.speech_active = false;
                state.current_audio_item_id.clone()
            };
            self.downstream
                .send_json(ServerMessage::audio_error(
                    item_id,
                    "Failed to send audio",
                    "Failed to send audio to API",
                ))
                .await;
        }
    }

    async fn send_all(
        &self,
        events: impl IntoIterator<Item = ClientEvent>,
    ) -> Result<(), LinkError> {
        for event in events {
            self.upstream.send(event).await?;
        }
        Ok(())
    }

    // --- API -> Client ---

    /// Handles one JSON text frame from the realtime API.
    pub async fn handle_server_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Invalid JSON message received from the realtime API");
                return;
            }
        };
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let event = match ServerEvent::deserialize(&value) {
            Ok(event) => event,
            Err(e) => {
                error!(%kind, error = %e, "Malformed realtime API event");
                return;
            }
        };

        match &event {
            ServerEvent::ResponseAudioDelta { .. } => trace!(%kind, "Received API audio event"),
            ServerEvent::ResponseTextDelta { delta, .. }
            | ServerEvent::ResponseAudioTranscriptDelta { delta, .. }
            | ServerEvent::FunctionCallArgumentsDelta { delta, .. } => {
                debug!(%kind, %delta, "Received API delta event")
            }
            _ => debug!(%kind, "Received API event"),
        }

        self.dispatch(&kind, event).await;
    }

    async fn dispatch(&self, kind: &str, event: ServerEvent) {
        if let Some(response_id) = event.response_id() {
            let current = self.state.lock().await.current_response_id.clone();
            if current.as_deref() != Some(response_id) {
                warn!(
                    %kind,
                    response_id,
                    current = ?current,
                    "Discarding event for a response that is not in progress"
                );
                return;
            }
        }

        match event {
            ServerEvent::Error { error } => {
                error!(
                    code = ?error.code,
                    message = %error.message,
                    "Realtime API reported an error"
                );
            }
            ServerEvent::ConversationItemCreated { item, .. } => self.on_item_created(item).await,
            ServerEvent::InputAudioTranscriptionCompleted {
                item_id,
                transcript,
            } => {
                info!(%transcript, "Audio transcription completed");
                self.downstream
                    .send_json(ServerMessage::Transcription {
                        id: item_id,
                        text: transcript,
                    })
                    .await;
            }
            ServerEvent::InputAudioTranscriptionFailed { item_id, error } => {
                let message = error
                    .map(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Transcription failed".to_string());
                error!(%message, "Audio transcription failed");
                self.downstream
                    .send_json(ServerMessage::audio_error(
                        item_id,
                        "Could not transcribe audio",
                        message,
                    ))
                    .await;
            }
            ServerEvent::ResponseCreated { response } => {
                info!(response_id = ?response.id, "Response created");
                let mut state = self.state.lock().await;
                state.current_response_id = response.id;
                state.accumulated_transcript.clear();
            }
            ServerEvent::ResponseTextDelta {
                response_id,
                item_id,
                delta,
            } => {
                self.downstream
                    .send_json(ServerMessage::TextDelta {
                        id: item_id,
                        response_id,
                        delta,
                        is_audio_transcript: false,
                    })
                    .await;
            }
            ServerEvent::ResponseAudioDelta { delta, .. } => match BASE64.decode(delta) {
                Ok(audio) => {
                    trace!(bytes = audio.len(), "Audio delta received");
                    self.downstream.send_binary(Bytes::from(audio)).await;
                }
                Err(e) => error!(error = %e, "Error decoding audio delta"),
            },
            ServerEvent::ResponseAudioTranscriptDelta {
                response_id,
                item_id,
                delta,
            } => {
                self.state
                    .lock()
                    .await
                    .accumulated_transcript
                    .push_str(&delta);
                self.downstream
                    .send_json(ServerMessage::TextDelta {
                        id: item_id,
                        response_id,
                        delta,
                        is_audio_transcript: true,
                    })
                    .await;
            }
            ServerEvent::ResponseAudioTranscriptDone { item_id, .. } => {
                let transcript =
                    std::mem::take(&mut self.state.lock().await.accumulated_transcript);
                info!(%transcript, "Audio transcript complete");
                self.downstream
                    .send_json(ServerMessage::AssistantMessage {
                        id: item_id,
                        text: transcript,
                        in_progress: false,
                        is_final: true,
                        is_audio_transcript: true,
                    })
                    .await;
            }
            ServerEvent::FunctionCallArgumentsDelta { .. } => {
                // Arguments are accumulated by the API and delivered whole with `.done`.
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => self.on_function_call(call_id, name, arguments).await,
            ServerEvent::ResponseDone { response } => self.on_response_done(response).await,
            ServerEvent::InputAudioBufferCommitted { item_id } => {
                info!("Audio buffer committed");
                self.downstream
                    .send_json(ServerMessage::control_with(
                        ControlAction::ProcessingSpeech,
                        item_id,
                        None,
                    ))
                    .await;
            }
            ServerEvent::InputAudioBufferCleared => {
                info!("Audio buffer cleared");
                self.downstream
                    .send_json(ServerMessage::control(ControlAction::AudioCleared))
                    .await;
            }
            ServerEvent::InputAudioBufferSpeechStarted {
                item_id,
                audio_start_ms,
            } => {
                info!("API detected speech start");
                self.downstream
                    .send_json(ServerMessage::control_with(
                        ControlAction::SpeechStarted,
                        item_id,
                        audio_start_ms,
                    ))
                    .await;
            }
            ServerEvent::InputAudioBufferSpeechStopped {
                item_id,
                audio_end_ms,
            } => {
                info!("API detected speech end");
                self.downstream
                    .send_json(ServerMessage::control_with(
                        ControlAction::SpeechStopped,
                        item_id,
                        audio_end_ms,
                    ))
                    .await;
                self.state.lock().await.speech_active = false;
                let commit = ClientEvent::InputAudioBufferCommit { event_id: None };
                if let Err(e) = self.upstream.send(commit).await {
                    error!(error = %e, "Failed to commit the input audio buffer");
                }
            }
            ServerEvent::Other => debug!(%kind, "Unhandled realtime API event"),
        }
    }

    async fn on_item_created(&self, item: Item) {
        let Item {
            id, role, content, ..
        } = item;
        let first = content.into_iter().next();

        match (role, first) {
            (Some(Role::User), None) => info!(item_id = ?id, "Created empty user message"),
            (Some(Role::User), Some(part)) if part.kind == ContentType::InputAudio => {
                info!("Audio message created, waiting for transcription");
                self.downstream
                    .send_json(ServerMessage::transcribing_placeholder(id))
                    .await;
                if let Some(audio) = part.audio {
                    match BASE64.decode(audio) {
                        Ok(bytes) => self.downstream.send_binary(Bytes::from(bytes)).await,
                        Err(e) => error!(error = %e, "Error decoding user audio"),
                    }
                }
            }
            (Some(Role::User), Some(part)) => {
                let text = part.text.unwrap_or_default();
                info!(%text, "User text message created");
                self.downstream
                    .send_json(ServerMessage::UserMessage {
                        id,
                        text,
                        has_audio: false,
                        is_transcribing: None,
                        error: None,
                    })
                    .await;
            }
            (Some(Role::Assistant), Some(part)) => {
                let text = part.text.unwrap_or_default();
                info!(%text, "Assistant message created");
                self.downstream
                    .send_json(ServerMessage::AssistantMessage {
                        id,
                        text,
                        in_progress: false,
                        is_final: false,
                        is_audio_transcript: false,
                    })
                    .await;
            }
            (Some(Role::Assistant), None) => {
                info!(item_id = ?id, "Created empty assistant message");
                self.downstream
                    .send_json(ServerMessage::AssistantMessage {
                        id,
                        text: String::new(),
                        in_progress: true,
                        is_final: false,
                        is_audio_transcript: false,
                    })
                    .await;
            }
            (role, _) => debug!(item_id = ?id, ?role, "Ignoring conversation item"),
        }
    }

    async fn on_function_call(
        &self,
        call_id: Option<String>,
        name: Option<String>,
        arguments: String,
    ) {
        if let Some(name) = name.as_deref().filter(|n| *n != WEATHER_TOOL_NAME) {
            warn!(function = name, ?call_id, "Model called an unknown function");
            return;
        }
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments.as_str()
        };
        let query: WeatherQuery = match serde_json::from_str(arguments) {
            Ok(query) => query,
            Err(e) => {
                error!(error = %e, %arguments, "Error parsing function arguments");
                return;
            }
        };
        info!(?call_id, ?query, "Function call complete");
        self.weather.lookup(query, self.upstream.as_ref()).await;
    }

    async fn on_response_done(&self, response: ResponseResource) {
        for item in &response.output {
            if item.kind != Some(ItemType::Message) || item.role != Some(Role::Assistant) {
                continue;
            }
            let Some(part) = item.first_content() else {
                continue;
            };
            if part.kind == ContentType::Text {
                self.downstream
                    .send_json(ServerMessage::AssistantMessage {
                        id: item.id.clone(),
                        text: part.text.clone().unwrap_or_default(),
                        in_progress: false,
                        is_final: true,
                        is_audio_transcript: false,
                    })
                    .await;
            }
        }

        if let Some(usage) = &response.usage {
            info!(%usage, "Response complete");
        }
        self.downstream
            .send_json(ServerMessage::control_with(
                ControlAction::ResponseComplete,
                response.id,
                None,
            ))
            .await;

        let mut state = self.state.lock().await;
        state.current_response_id = None;
        state.accumulated_transcript.clear();
    }
}
