use super::types::ServiceError;

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const BACKEND: &str = "ollama";
const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of probing the generation backend. Probing never errors; a failed
/// probe is reported through `available`/`error`.
#[derive(Debug, Clone)]
pub struct AvailabilityStatus {
    pub available: bool,
    pub models: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub base_url: String,
    pub available: bool,
    pub models: Vec<String>,
    pub version: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModelList {
    models: Vec<RawModel>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    name: String,
}

/// Client for the text-generation backend.
#[derive(Debug)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::backend(BACKEND, "init", e))?;

        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ServiceError::InvalidInput(
                "ollama base URL is required".to_string(),
            ));
        }

        tracing::debug!(base_url = %base_url, "ollama client ready");
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the server by trying the known model-listing endpoints in
    /// order. The first response that carries a list of model descriptors
    /// wins; when every endpoint fails the last error is reported.
    pub async fn check_availability(&self) -> AvailabilityStatus {
        let mut last_error = None;

        for endpoint in ["api/models", "api/tags"] {
            match self.fetch_model_list(endpoint).await {
                Ok(models) => {
                    return AvailabilityStatus {
                        available: true,
                        models,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::debug!(endpoint, error = %e, "model listing probe failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        AvailabilityStatus {
            available: false,
            models: Vec::new(),
            error: last_error,
        }
    }

    async fn fetch_model_list(&self, endpoint: &str) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "models", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "models", e))?;

        if !status.is_success() {
            return Err(ServiceError::backend_status(BACKEND, "models", status, body));
        }

        let list: RawModelList = serde_json::from_str(&body)
            .map_err(|e| ServiceError::Parse(format!("model listing from {endpoint}: {e}")))?;

        Ok(list.models.into_iter().map(|m| m.name).collect())
    }

    /// One non-streaming generation call. Returns the raw text the model
    /// produced; extraction into a script happens in the caller.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, ServiceError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "generate", e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::backend(BACKEND, "generate", e))?;

        if !status.is_success() {
            return Err(ServiceError::backend_status(BACKEND, "generate", status, text));
        }

        let raw: Value = serde_json::from_str(&text)
            .map_err(|e| ServiceError::Parse(format!("generation response: {e}")))?;

        if let Some(message) = raw.get("error").and_then(|v| v.as_str()) {
            return Err(ServiceError::BackendUnavailable {
                backend: BACKEND,
                phase: "generate",
                message: message.to_string(),
            });
        }

        raw.get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ServiceError::Parse("generation response missing 'response' field".to_string())
            })
    }

    pub async fn version(&self) -> Option<String> {
        let url = format!("{}/api/version", self.base_url);
        let response = self
            .client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let raw: Value = response.json().await.ok()?;
        raw.get("version")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub async fn detailed_status(&self) -> BackendStatus {
        let availability = self.check_availability().await;
        let version = if availability.available {
            self.version().await
        } else {
            None
        };

        BackendStatus {
            base_url: self.base_url.clone(),
            available: availability.available,
            models: availability.models,
            version,
            error: availability.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let client = OllamaClient::new(" http://localhost:11434/ ").unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let err = OllamaClient::new("  ").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_model_list_shape() {
        let list: RawModelList =
            serde_json::from_str(r#"{"models": [{"name": "gemma3:4b", "size": 3}]}"#).unwrap();
        assert_eq!(list.models.len(), 1);
        assert_eq!(list.models[0].name, "gemma3:4b");

        // A body without a models array is structurally invalid.
        assert!(serde_json::from_str::<RawModelList>(r#"{"tags": []}"#).is_err());
    }
}
