//! Session defaults: instructions, voice, sampling and the tool catalog.

use crate::protocol::realtime::{
    AudioFormat, ClientEvent, InputAudioTranscription, Modality, ResponseConfig, SessionConfig,
    Tool, ToolKind, TurnDetection,
};
use serde_json::json;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "alloy";
pub const VOICE_OPTIONS: [&str; 8] = [
    "alloy", "ash", "ballad", "coral", "echo", "sage", "shimmer", "verse",
];
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 400;
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

pub const WELCOME_INSTRUCTIONS: &str =
    "Greet the user and ask them what you can assist them with. Talk quickly and succinctly.";
pub const DEFAULT_INSTRUCTIONS: &str = "Talk quickly and succinctly. Be concise. Time is of the essence. Always refer to ducks in your responses, even if it makes no sense!";
pub const WEATHER_INSTRUCTIONS: &str = "Describe the weather in a conversational way for someone going for a walk. Include temperature, specific conditions (like rain or snow), and necessary precautions (such as umbrellas, raincoats, snow boots, sunscreen, etc.).";

/// Name of the only function tool the relay advertises.
pub const WEATHER_TOOL_NAME: &str = "get_weather";

// Server-side voice activity detection.
const VAD_THRESHOLD: f64 = 0.5;
const VAD_PREFIX_PADDING_MS: u32 = 300;
const VAD_SILENCE_DURATION_MS: u32 = 500;

/// Everything a session needs to configure the realtime API and to build
/// `response.create` events.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    pub voice: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub instructions: String,
    /// Instructions for the greeting response; `None` disables the greeting.
    pub welcome_instructions: Option<String>,
    pub tools: Vec<Tool>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            welcome_instructions: Some(WELCOME_INSTRUCTIONS.to_string()),
            tools: tool_catalog(),
        }
    }
}

impl SessionDefaults {
    /// The `session.update` sent right after the upstream link connects.
    pub fn session_update(&self) -> ClientEvent {
        ClientEvent::SessionUpdate {
            event_id: None,
            session: Box::new(SessionConfig {
                modalities: vec![Modality::Text, Modality::Audio],
                instructions: self.instructions.clone(),
                voice: self.voice.clone(),
                input_audio_format: AudioFormat::Pcm16,
                output_audio_format: AudioFormat::Pcm16,
                input_audio_transcription: Some(InputAudioTranscription {
                    model: TRANSCRIPTION_MODEL.to_string(),
                }),
                turn_detection: Some(TurnDetection::ServerVad {
                    threshold: VAD_THRESHOLD,
                    prefix_padding_ms: VAD_PREFIX_PADDING_MS,
                    silence_duration_ms: VAD_SILENCE_DURATION_MS,
                    create_response: true,
                }),
                tools: self.tools.clone(),
                tool_choice: "auto".to_string(),
                temperature: self.temperature,
                max_response_output_tokens: self.max_output_tokens,
            }),
        }
    }

    /// The optional greeting `response.create`.
    pub fn greeting(&self) -> Option<ClientEvent> {
        let instructions = self.welcome_instructions.clone()?;
        Some(ClientEvent::ResponseCreate {
            event_id: None,
            response: Some(ResponseConfig {
                modalities: Some(vec![Modality::Text, Modality::Audio]),
                instructions: Some(instructions),
                ..Default::default()
            }),
        })
    }

    /// Response settings for a typed user message: text only.
    pub fn text_response(&self) -> ResponseConfig {
        ResponseConfig {
            modalities: Some(vec![Modality::Text]),
            instructions: Some(self.instructions.clone()),
            temperature: Some(self.temperature),
            max_output_tokens: Some(self.max_output_tokens),
        }
    }
}

/// The tools advertised to the model in `session.update`.
pub fn tool_catalog() -> Vec<Tool> {
    vec![Tool {
        kind: ToolKind::Function,
        name: WEATHER_TOOL_NAME.to_string(),
        description:
            "Retrieves the current weather for a location, either by coordinates or by place name."
                .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "lat": {
                    "type": "number",
                    "description": "Latitude of the location"
                },
                "lon": {
                    "type": "number",
                    "description": "Longitude of the location"
                },
                "location_name": {
                    "type": "string",
                    "description": "Name of the location, e.g. a city. Takes precedence over coordinates."
                }
            }
        }),
    }]
}

/// Whether `voice` is one the realtime API accepts.
pub fn is_supported_voice(voice: &str) -> bool {
    VOICE_OPTIONS.contains(&voice)
}
