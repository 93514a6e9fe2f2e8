//! Defines the JSON message protocol between the browser client and the relay.
//!
//! Inbound text frames are decoded into [`ClientMessage`]; everything the relay
//! pushes back to the browser is a [`ServerMessage`]. Binary frames carry raw
//! PCM16 audio in both directions and have no representation here.

use serde::{Deserialize, Serialize};

/// Placeholder text shown while an utterance is being transcribed.
pub const TRANSCRIBING_PLACEHOLDER: &str = "...";

/// Messages sent from the client (browser) to the relay.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The client asks the relay to end the session.
    Disconnect,
    /// A typed message from the user. A missing or null `text` reads as empty.
    UserMessage {
        #[serde(default)]
        text: Option<String>,
    },
    /// Any message type this relay does not understand yet.
    #[serde(other)]
    Unknown,
}

/// The `action` carried by a [`ServerMessage::Control`] frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Connected,
    Disconnected,
    ResponseComplete,
    ProcessingSpeech,
    AudioCleared,
    SpeechStarted,
    SpeechStopped,
}

/// Messages sent from the relay to the client (browser).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session and speech lifecycle notifications.
    Control {
        action: ControlAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        greeting: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    /// A user turn, either typed or spoken.
    UserMessage {
        id: Option<String>,
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        has_audio: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_transcribing: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An assistant turn, possibly still in progress.
    AssistantMessage {
        id: Option<String>,
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        in_progress: bool,
        #[serde(default, rename = "final", skip_serializing_if = "is_false")]
        is_final: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        is_audio_transcript: bool,
    },
    /// A streamed fragment of assistant text.
    TextDelta {
        id: Option<String>,
        response_id: String,
        delta: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_audio_transcript: bool,
    },
    /// The final transcript of a spoken user turn.
    Transcription { id: Option<String>, text: String },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ServerMessage {
    /// A bare control frame with no optional fields.
    pub fn control(action: ControlAction) -> Self {
        Self::Control {
            action,
            id: None,
            message: None,
            greeting: None,
            timestamp: None,
        }
    }

    /// A control frame tied to an upstream item and/or audio offset.
    pub fn control_with(action: ControlAction, id: Option<String>, timestamp: Option<u64>) -> Self {
        Self::Control {
            action,
            id,
            message: None,
            greeting: None,
            timestamp,
        }
    }

    /// Sent once when the downstream link is accepted.
    pub fn connected() -> Self {
        Self::Control {
            action: ControlAction::Connected,
            id: None,
            message: None,
            greeting: Some("Connected to realtime server".to_string()),
            timestamp: None,
        }
    }

    /// The best-effort farewell sent before the downstream link closes.
    pub fn disconnected() -> Self {
        Self::Control {
            action: ControlAction::Disconnected,
            id: None,
            message: Some("Disconnected from server".to_string()),
            greeting: None,
            timestamp: None,
        }
    }

    /// The bubble shown while a spoken utterance is waiting for its transcript.
    pub fn transcribing_placeholder(id: Option<String>) -> Self {
        Self::UserMessage {
            id,
            text: TRANSCRIBING_PLACEHOLDER.to_string(),
            has_audio: true,
            is_transcribing: Some(true),
            error: None,
        }
    }

    /// Replaces an audio placeholder with an error.
    pub fn audio_error(id: Option<String>, text: &str, error: impl Into<String>) -> Self {
        Self::UserMessage {
            id,
            text: text.to_string(),
            has_audio: true,
            is_transcribing: Some(false),
            error: Some(error.into()),
        }
    }

    /// The wire name of this message, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Control { .. } => "control",
            Self::UserMessage { .. } => "user_message",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::TextDelta { .. } => "text_delta",
            Self::Transcription { .. } => "transcription",
        }
    }
}
