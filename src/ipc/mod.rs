//! IPC protocol types for communication with the host UI.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::oplog::OperationLogEntry;
use crate::provider::GroundingSource;

// ---------------------------------------------------------------------------
// Events: core -> host (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the host via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum VoiceEvent {
    Starting {},
    Ready {},
    Pong {},
    Stopping {},
    Error { message: String },
    AudioDevices {
        input: Vec<AudioDeviceInfo>,
        output: Vec<AudioDeviceInfo>,
    },
    SessionState { state: String },
    ChatResponse {
        text: String,
        sources: Vec<GroundingSource>,
    },
    ImageGenerated {
        #[serde(rename = "dataUrl")]
        data_url: String,
        pro: bool,
    },
    VideoGenerated { path: String },
    MapResponse {
        text: String,
        sources: Vec<GroundingSource>,
    },
    OperationLogs { entries: Vec<OperationLogEntry> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: i32,
    pub name: String,
}

impl AudioDeviceInfo {
    /// Number device names in enumeration order.
    pub fn from_names(names: Vec<String>) -> Vec<Self> {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Self { id: i as i32, name })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Commands: host -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the host via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum VoiceCommand {
    Ping {},
    Stop {},
    ListAudioDevices {},
    StartSession {},
    StopSession {},
    Chat {
        message: String,
    },
    GenerateImage {
        prompt: String,
        #[serde(default)]
        pro: bool,
    },
    GenerateVideo {
        prompt: String,
        #[serde(default = "default_aspect_ratio")]
        aspect_ratio: String,
    },
    MapSearch {
        query: String,
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lng: Option<f64>,
    },
    GetLogs {},
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}
