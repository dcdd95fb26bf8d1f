//! Request/response calls to the Gemini REST API: grounded chat, image and
//! video generation, and maps-grounded search.
//!
//! The response helpers work on `serde_json::Value` so that partially
//! populated responses degrade to defaults instead of failing.

pub mod gemini;

use serde::Serialize;
use serde_json::Value;

pub use gemini::GeminiClient;

/// A citation attached to a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

/// Generated text plus the sources it was grounded on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

/// Which grounding chunk kinds to read, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `web` chunks only (search grounding).
    Web,
    /// `maps` chunks, falling back to `web`.
    MapsThenWeb,
}

fn first_candidate(response: &Value) -> &Value {
    &response["candidates"][0]
}

/// Concatenated text parts of the first candidate, if any.
pub fn response_text(response: &Value) -> Option<String> {
    let parts = first_candidate(response)["content"]["parts"].as_array()?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Grounding sources of the first candidate. Chunks without a URI are dropped.
pub fn grounding_sources(response: &Value, kind: SourceKind, default_title: &str) -> Vec<GroundingSource> {
    let Some(chunks) = first_candidate(response)["groundingMetadata"]["groundingChunks"].as_array() else {
        return Vec::new();
    };

    chunks
        .iter()
        .filter_map(|chunk| {
            let pick = |field: &str| -> Option<String> {
                let from_maps = match kind {
                    SourceKind::MapsThenWeb => chunk["maps"][field].as_str().filter(|s| !s.is_empty()),
                    SourceKind::Web => None,
                };
                from_maps
                    .or_else(|| chunk["web"][field].as_str().filter(|s| !s.is_empty()))
                    .map(str::to_string)
            };
            let uri = pick("uri")?;
            Some(GroundingSource {
                uri,
                title: pick("title").unwrap_or_else(|| default_title.to_string()),
            })
        })
        .collect()
}

/// First inline image of the first candidate as a PNG data URL.
pub fn inline_image_data_url(response: &Value) -> Option<String> {
    let parts = first_candidate(response)["content"]["parts"].as_array()?;
    parts
        .iter()
        .find_map(|p| p["inlineData"]["data"].as_str())
        .map(|data| format!("data:image/png;base64,{}", data))
}

/// Download URI of the first generated video in a finished operation.
pub fn generated_video_uri(operation: &Value) -> Option<String> {
    operation["response"]["generateVideoResponse"]["generatedSamples"][0]["video"]["uri"]
        .as_str()
        .map(str::to_string)
}

/// Error message of a finished operation, if it failed.
pub fn operation_error(operation: &Value) -> Option<String> {
    let error = operation.get("error")?;
    Some(
        error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}
