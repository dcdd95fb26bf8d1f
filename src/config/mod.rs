//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::gemini::DEFAULT_LIVE_ENDPOINT;
use crate::session::SessionConfig;
use paths::get_data_dir;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// live_voice_config.json shape (camelCase, every field optional).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Falls back to `GEMINI_API_KEY`, then `API_KEY`.
    pub api_key: Option<String>,
    pub api_base: String,
    pub live_endpoint: String,
    pub video_poll_secs: u64,
    pub models: ModelConfig,
    pub voice: VoiceSettings,
    pub audio: AudioSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            video_poll_secs: 8,
            models: ModelConfig::default(),
            voice: VoiceSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

/// Model id per feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    pub chat: String,
    pub vision_fast: String,
    pub vision_pro: String,
    pub motion: String,
    pub voice: String,
    pub maps: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            chat: "gemini-3-pro-preview".into(),
            vision_fast: "gemini-2.5-flash-image".into(),
            vision_pro: "gemini-3-pro-image-preview".into(),
            motion: "veo-3.1-fast-generate-preview".into(),
            voice: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            maps: "gemini-2.5-flash".into(),
        }
    }
}

/// Live session persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceSettings {
    pub voice_name: String,
    pub system_instruction: String,
    pub connect_timeout_secs: u64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_name: "Zephyr".into(),
            system_instruction: "You are a helpful and charismatic AI assistant named Nitram. \
                                 Keep responses concise for natural conversation."
                .into(),
            connect_timeout_secs: 15,
        }
    }
}

/// Device selection. `None` means the system default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub volume: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            volume: 1.0,
        }
    }
}

impl AppConfig {
    /// Options for a live voice session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.models.voice.clone(),
            response_modality: "AUDIO".into(),
            voice_name: self.voice.voice_name.clone(),
            system_instruction: self.voice.system_instruction.clone(),
            api_key: self.resolve_api_key().unwrap_or_default(),
            endpoint: self.live_endpoint.clone(),
            connect_timeout: Duration::from_secs(self.voice.connect_timeout_secs.max(1)),
        }
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_api_key_with(self.api_key.as_deref(), |name| std::env::var(name).ok())
    }
}

fn resolve_api_key_with(configured: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Option<String> {
    let usable = |key: Option<String>| key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
    usable(configured.map(str::to_string))
        .or_else(|| usable(env("GEMINI_API_KEY")))
        .or_else(|| usable(env("API_KEY")))
}

/// Read live_voice_config.json from the data directory.
pub fn read_app_config() -> AppConfig {
    let path = get_config_path();
    read_json_file(&path).unwrap_or_default()
}

/// Path to live_voice_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("live_voice_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"apiKey":"abc","voice":{"voiceName":"Puck"},"audio":{"volume":0.5}}"#,
        )
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.voice.voice_name, "Puck");
        assert_eq!(config.voice.connect_timeout_secs, 15);
        assert_eq!(config.audio.volume, 0.5);
        assert_eq!(config.models.chat, "gemini-3-pro-preview");
        assert_eq!(config.video_poll_secs, 8);
    }

    #[test]
    fn test_session_config_from_defaults() {
        let config = AppConfig {
            api_key: Some("k".into()),
            ..AppConfig::default()
        };
        let session = config.session_config();
        assert_eq!(session.model, "gemini-2.5-flash-native-audio-preview-09-2025");
        assert_eq!(session.response_modality, "AUDIO");
        assert_eq!(session.voice_name, "Zephyr");
        assert!(session.system_instruction.contains("Nitram"));
        assert_eq!(session.connect_timeout, Duration::from_secs(15));
        assert_eq!(session.endpoint, DEFAULT_LIVE_ENDPOINT);
        assert_eq!(session.api_key, "k");
    }

    #[test]
    fn test_zero_connect_timeout_clamped() {
        let config: AppConfig =
            serde_json::from_str(r#"{"voice":{"connectTimeoutSecs":0}}"#).unwrap();
        assert_eq!(config.session_config().connect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_api_key_fallback_order() {
        let env = |name: &str| match name {
            "GEMINI_API_KEY" => Some("gemini".to_string()),
            "API_KEY" => Some("generic".to_string()),
            _ => None,
        };
        assert_eq!(resolve_api_key_with(Some("cfg"), env).as_deref(), Some("cfg"));
        assert_eq!(resolve_api_key_with(None, env).as_deref(), Some("gemini"));

        let only_generic = |name: &str| (name == "API_KEY").then(|| "generic".to_string());
        assert_eq!(resolve_api_key_with(None, only_generic).as_deref(), Some("generic"));
        assert_eq!(resolve_api_key_with(Some("  "), |_| None), None);
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let path = std::env::temp_dir().join("live-voice-does-not-exist.json");
        assert!(read_json_file::<AppConfig>(&path).is_none());
    }

    #[test]
    fn test_invalid_file_reads_as_none() {
        let path = std::env::temp_dir().join(format!("live-voice-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_json_file::<AppConfig>(&path).is_none());
        let _ = std::fs::remove_file(&path);
    }
}
