//! Gemini REST client.
//!
//! POST `{api_base}/models/{model}:generateContent` for text, image and maps
//! calls. Video generation goes through `:predictLongRunning` and is polled
//! until the operation reports `done`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{
    generated_video_uri, grounding_sources, inline_image_data_url, operation_error, response_text,
    GroundedAnswer, SourceKind,
};
use crate::config::{AppConfig, ModelConfig};

const NO_RESPONSE: &str = "No response received.";

pub struct GeminiClient {
    api_key: String,
    api_base: String,
    models: ModelConfig,
    poll_interval: Duration,
    assets_dir: PathBuf,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &AppConfig, assets_dir: PathBuf) -> Self {
        Self {
            api_key: config.resolve_api_key().unwrap_or_default(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            models: config.models.clone(),
            poll_interval: Duration::from_secs(config.video_poll_secs.max(1)),
            assets_dir,
            client: reqwest::Client::new(),
        }
    }

    /// Web-search grounded chat.
    pub async fn chat_with_grounding(&self, message: &str) -> anyhow::Result<GroundedAnswer> {
        info!(model = %self.models.chat, len = message.len(), "Grounded chat request");
        let response = self
            .generate_content(&self.models.chat, &chat_body(message))
            .await?;
        Ok(chat_answer(&response))
    }

    /// Square image as a `data:image/png;base64,...` URL. Empty if the model
    /// returned no image.
    pub async fn generate_image(&self, prompt: &str, pro: bool) -> anyhow::Result<String> {
        let model = if pro {
            &self.models.vision_pro
        } else {
            &self.models.vision_fast
        };
        info!(model = %model, "Image generation request");
        let response = self.generate_content(model, &image_body(prompt)).await?;
        Ok(inline_image_data_url(&response).unwrap_or_default())
    }

    /// Generate a video and download it into the assets directory.
    pub async fn generate_video(&self, prompt: &str, aspect_ratio: &str) -> anyhow::Result<PathBuf> {
        self.require_key()?;
        let url = format!(
            "{}/models/{}:predictLongRunning",
            self.api_base, self.models.motion
        );
        info!(model = %self.models.motion, aspect_ratio, "Video generation request");
        let mut operation = self.post_json(&url, &video_body(prompt, aspect_ratio)).await?;

        let name = operation["name"]
            .as_str()
            .map(str::to_string)
            .context("Video operation has no name")?;

        while !operation["done"].as_bool().unwrap_or(false) {
            tokio::time::sleep(self.poll_interval).await;
            debug!(operation = %name, "Polling video operation");
            operation = self.get_json(&format!("{}/{}", self.api_base, name)).await?;
        }

        if let Some(message) = operation_error(&operation) {
            anyhow::bail!("Video generation failed: {}", message);
        }
        let uri = generated_video_uri(&operation).context("Video generation failed: no video URI")?;

        let path = self
            .assets_dir
            .join(format!("{}.mp4", uuid::Uuid::new_v4()));
        self.download(&with_key(&uri, &self.api_key), &path).await?;
        info!(path = %path.display(), "Video saved");
        Ok(path)
    }

    /// Maps and search grounded answer, optionally biased to a location.
    pub async fn map_grounding(
        &self,
        query: &str,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> anyhow::Result<GroundedAnswer> {
        info!(model = %self.models.maps, has_location = lat.is_some() && lng.is_some(), "Maps grounding request");
        let response = self
            .generate_content(&self.models.maps, &maps_body(query, lat, lng))
            .await?;
        Ok(maps_answer(&response))
    }

    fn require_key(&self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("No API key configured (set apiKey or GEMINI_API_KEY)");
        }
        Ok(())
    }

    async fn generate_content(&self, model: &str, body: &Value) -> anyhow::Result<Value> {
        self.require_key()?;
        let url = format!("{}/models/{}:generateContent", self.api_base, model);
        self.post_json(&url, body).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> anyhow::Result<Value> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Gemini request failed: {}", e))?;
        read_json(resp).await
    }

    async fn get_json(&self, url: &str) -> anyhow::Result<Value> {
        let resp = self
            .client
            .get(url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Gemini request failed: {}", e))?;
        read_json(resp).await
    }

    async fn download(&self, url: &str, path: &Path) -> anyhow::Result<()> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Video download failed: {}", e))?;
        if !resp.status().is_success() {
            anyhow::bail!("Video download failed: {}", resp.status());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut body = resp.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| anyhow::anyhow!("Video download interrupted: {}", e))?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        debug!(bytes = written, "Video download complete");
        Ok(())
    }
}

async fn read_json(resp: reqwest::Response) -> anyhow::Result<Value> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Gemini API error {}: {}", status, body);
    }
    resp.json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse Gemini response: {}", e))
}

/// Chat shows a placeholder when the model returned no text.
fn chat_answer(response: &Value) -> GroundedAnswer {
    GroundedAnswer {
        text: response_text(response).unwrap_or_else(|| NO_RESPONSE.to_string()),
        sources: grounding_sources(response, SourceKind::Web, "Source"),
    }
}

/// Maps results may be sources only, so missing text stays empty.
fn maps_answer(response: &Value) -> GroundedAnswer {
    GroundedAnswer {
        text: response_text(response).unwrap_or_default(),
        sources: grounding_sources(response, SourceKind::MapsThenWeb, "Location"),
    }
}

fn user_text(text: &str) -> Value {
    json!([{ "role": "user", "parts": [{ "text": text }] }])
}

fn chat_body(message: &str) -> Value {
    json!({
        "contents": user_text(message),
        "tools": [{ "googleSearch": {} }],
    })
}

fn image_body(prompt: &str) -> Value {
    json!({
        "contents": user_text(prompt),
        "generationConfig": {
            "imageConfig": { "aspectRatio": "1:1" },
        },
    })
}

fn video_body(prompt: &str, aspect_ratio: &str) -> Value {
    json!({
        "instances": [{ "prompt": prompt }],
        "parameters": {
            "numberOfVideos": 1,
            "resolution": "720p",
            "aspectRatio": aspect_ratio,
        },
    })
}

fn maps_body(query: &str, lat: Option<f64>, lng: Option<f64>) -> Value {
    let mut body = json!({
        "contents": user_text(query),
        "tools": [{ "googleMaps": {} }, { "googleSearch": {} }],
    });
    if let (Some(latitude), Some(longitude)) = (lat, lng) {
        body["toolConfig"] = json!({
            "retrievalConfig": {
                "latLng": { "latitude": latitude, "longitude": longitude },
            },
        });
    }
    body
}

/// Download URIs need the key as a query parameter.
fn with_key(uri: &str, key: &str) -> String {
    let sep = if uri.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", uri, sep, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body_uses_search_tool() {
        let body = chat_body("who won?");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "who won?");
        assert!(body["tools"][0].get("googleSearch").is_some());
    }

    #[test]
    fn test_image_body_is_square() {
        assert_eq!(image_body("a fox")["generationConfig"]["imageConfig"]["aspectRatio"], "1:1");
    }

    #[test]
    fn test_video_body_parameters() {
        let body = video_body("waves", "9:16");
        assert_eq!(body["instances"][0]["prompt"], "waves");
        assert_eq!(body["parameters"]["numberOfVideos"], 1);
        assert_eq!(body["parameters"]["resolution"], "720p");
        assert_eq!(body["parameters"]["aspectRatio"], "9:16");
    }

    #[test]
    fn test_maps_body_location_requires_both_coordinates() {
        let with = maps_body("coffee", Some(0.0), Some(-0.1278));
        assert_eq!(with["toolConfig"]["retrievalConfig"]["latLng"]["latitude"], 0.0);
        assert_eq!(with["toolConfig"]["retrievalConfig"]["latLng"]["longitude"], -0.1278);
        assert_eq!(with["tools"].as_array().unwrap().len(), 2);

        assert!(maps_body("coffee", Some(51.5), None).get("toolConfig").is_none());
        assert!(maps_body("coffee", None, None).get("toolConfig").is_none());
    }

    #[test]
    fn test_missing_text_fallbacks() {
        let sources_only = json!({
            "candidates": [{"groundingMetadata": {"groundingChunks": [
                {"maps": {"uri": "https://maps.google.com/?cid=7", "title": "Bakery"}}
            ]}}]
        });
        let maps = maps_answer(&sources_only);
        assert_eq!(maps.text, "");
        assert_eq!(maps.sources.len(), 1);

        let chat = chat_answer(&sources_only);
        assert_eq!(chat.text, "No response received.");
        assert!(chat.sources.is_empty());
    }

    #[test]
    fn test_with_key_separator() {
        assert_eq!(
            with_key("https://x/files/a:download?alt=media", "k"),
            "https://x/files/a:download?alt=media&key=k"
        );
        assert_eq!(with_key("https://x/files/a", "k"), "https://x/files/a?key=k");
    }

    #[tokio::test]
    async fn test_calls_fail_without_key() {
        let mut client = GeminiClient::new(&AppConfig::default(), std::env::temp_dir());
        client.api_key.clear();
        assert!(client.chat_with_grounding("hi").await.is_err());
        assert!(client.generate_video("waves", "16:9").await.is_err());
    }
}
