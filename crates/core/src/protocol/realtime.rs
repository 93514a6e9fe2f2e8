//! Event schema of the upstream realtime voice/text API.
//!
//! Only the subset the relay sends or reacts to is modelled. Unknown fields are
//! ignored and unknown server event types decode to [`ServerEvent::Other`], so a
//! newer API revision never breaks the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output channels a response may use.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm16,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    FunctionCall,
    FunctionCallOutput,
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    InputText,
    InputAudio,
    Text,
    Audio,
    #[serde(other)]
    Other,
}

/// One content part of a conversation item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 encoded PCM16 audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    pub fn input_text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentType::InputText,
            text: Some(text.into()),
            audio: None,
            transcript: None,
        }
    }
}

/// A conversation item: one user or assistant turn, or a function call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl Item {
    /// A user message holding a single `input_text` part.
    pub fn user_text(id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            kind: Some(ItemType::Message),
            role: Some(Role::User),
            content: vec![ContentPart::input_text(text)],
            status: None,
            call_id: None,
            name: None,
            arguments: None,
        }
    }

    /// The first content part, which is the only one the relay reads.
    pub fn first_content(&self) -> Option<&ContentPart> {
        self.content.first()
    }
}

/// Per-response overrides sent with `response.create`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    /// Voice activity detection performed by the API.
    ServerVad {
        threshold: f64,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        create_response: bool,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Function,
}

/// A function tool advertised to the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Session-wide settings sent with `session.update`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    pub tool_choice: String,
    pub temperature: f64,
    pub max_response_output_tokens: u32,
}

/// Events the relay sends to the realtime API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Box<SessionConfig>,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        /// Base64 encoded PCM16 audio.
        audio: String,
    },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
}

impl ClientEvent {
    /// The wire `type` of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            Self::InputAudioBufferCommit { .. } => "input_audio_buffer.commit",
            Self::InputAudioBufferClear { .. } => "input_audio_buffer.clear",
        }
    }

    /// Whether the event carries audio, which is too noisy to log in full.
    pub fn carries_audio(&self) -> bool {
        matches!(self, Self::InputAudioBufferAppend { .. })
    }
}

/// The error object attached to `error` and transcription failure events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ApiError {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// The response object carried by `response.created` and `response.done`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ResponseResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// Events the realtime API sends to the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        previous_item_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        error: Option<ApiError>,
    },
    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseResource },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseResource },
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta {
        response_id: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        response_id: String,
        #[serde(default)]
        item_id: Option<String>,
        /// Base64 encoded PCM16 audio.
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        response_id: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        response_id: String,
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        response_id: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        response_id: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared,
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },
    /// Anything else: session acknowledgements, rate limits, newer event types.
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// The response this event belongs to, for events that stream one.
    pub fn response_id(&self) -> Option<&str> {
        match self {
            Self::ResponseTextDelta { response_id, .. }
            | Self::ResponseAudioDelta { response_id, .. }
            | Self::ResponseAudioTranscriptDelta { response_id, .. }
            | Self::ResponseAudioTranscriptDone { response_id, .. }
            | Self::FunctionCallArgumentsDelta { response_id, .. }
            | Self::FunctionCallArgumentsDone { response_id, .. } => Some(response_id),
            Self::ResponseDone { response } => response.id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversation_item_create_shape() {
        let event = ClientEvent::ConversationItemCreate {
            event_id: Some("event_1".into()),
            previous_item_id: None,
            item: Item::user_text(Some("msg_1".into()), "Hello"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "conversation.item.create",
                "event_id": "event_1",
                "item": {
                    "id": "msg_1",
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": "Hello"}]
                }
            })
        );
        assert_eq!(event.kind(), "conversation.item.create");
    }

    #[test]
    fn test_commit_has_only_type() {
        let event = ClientEvent::InputAudioBufferCommit { event_id: None };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"input_audio_buffer.commit"}"#
        );
    }

    #[test]
    fn test_server_vad_shape() {
        let vad = TurnDetection::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        };
        assert_eq!(
            serde_json::to_value(&vad).unwrap(),
            json!({
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500,
                "create_response": true
            })
        );
    }

    #[test]
    fn test_response_created_decodes_with_extra_fields() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "response.created",
            "event_id": "evt_1",
            "response": {"object": "realtime.response", "id": "r1", "status": "in_progress", "output": []}
        }))
        .unwrap();
        match event {
            ServerEvent::ResponseCreated { response } => {
                assert_eq!(response.id.as_deref(), Some("r1"));
                assert!(response.output.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_server_event_falls_through() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "rate_limits.updated",
            "rate_limits": []
        }))
        .unwrap();
        assert_eq!(event, ServerEvent::Other);
    }

    #[test]
    fn test_unknown_content_type_is_tolerated() {
        let item: Item = serde_json::from_value(json!({
            "id": "item_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "refusal", "refusal": "no"}]
        }))
        .unwrap();
        assert_eq!(item.first_content().unwrap().kind, ContentType::Other);
    }

    #[test]
    fn test_response_id_accessor() {
        let delta: ServerEvent = serde_json::from_value(json!({
            "type": "response.text.delta",
            "response_id": "r9",
            "item_id": "i1",
            "delta": "x"
        }))
        .unwrap();
        assert_eq!(delta.response_id(), Some("r9"));
        assert_eq!(ServerEvent::InputAudioBufferCleared.response_id(), None);
    }
}
