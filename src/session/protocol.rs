//! Gemini Live (BidiGenerateContent) wire messages.
//!
//! Client -> server: one `setup` message, then `realtimeInput` media chunks.
//! Server -> client: `setupComplete`, then `serverContent` carrying model
//! audio as base64 `inlineData` parts and an `interrupted` flag.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{InboundEvent, SessionConfig, TransportEnvelope};
use crate::audio::codec::text_safe_decode;

/// Build the setup message sent right after the socket opens.
pub fn setup_message(config: &SessionConfig) -> String {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": [config.response_modality],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_instruction }]
            }
        }
    })
    .to_string()
}

/// Wrap one envelope as a `realtimeInput` message.
pub fn realtime_input_message(envelope: &TransportEnvelope) -> String {
    json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": envelope.mime_type,
                "data": envelope.data,
            }]
        }
    })
    .to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Reduce this message to inbound events, audio first.
    ///
    /// Parts whose base64 payload does not decode are logged and skipped.
    pub fn into_events(self) -> Vec<InboundEvent> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(inline) = part.inline_data else {
                    continue;
                };
                match text_safe_decode(&inline.data) {
                    Ok(bytes) => events.push(InboundEvent::AudioChunk(bytes)),
                    Err(e) => warn!(
                        mime_type = ?inline.mime_type,
                        error = %e,
                        "Skipping undecodable audio part"
                    ),
                }
            }
        }
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if content.turn_complete {
            debug!("Model turn complete");
        }
        events
    }
}
