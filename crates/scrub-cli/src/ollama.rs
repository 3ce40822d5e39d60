//! Ollama discovery helpers.
//!
//! Pings the configured Ollama instance and, if responsive, fetches the
//! list of locally downloaded models from the `/api/tags` endpoint.

use std::time::Duration;

use serde::Deserialize;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<OllamaModel>,
}

/// Return the models available on the Ollama server at `base_url`.
///
/// `Err(reason)` when the server is offline or answers with something
/// other than a tag list.
pub async fn fetch_models(base_url: &str) -> Result<Vec<OllamaModel>, String> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("Ollama unreachable at {url}: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }

    let tags: TagsResponse = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse Ollama response: {e}"))?;
    Ok(tags.models)
}

/// `true` when `model` (with or without a `:tag`) is among `models`.
pub fn has_model(models: &[OllamaModel], model: &str) -> bool {
    models
        .iter()
        .any(|m| m.name == model || m.name.split(':').next() == Some(model))
}
