use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::GenerationError;
use crate::config::ServiceConfig;
use crate::pipeline::research::GenerationClient;

/// Ollama HTTP client for local JSON-mode generation.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaGenerator {
    /// Create a generator pointing at an Ollama instance.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, GenerationError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(GenerationError::NotConfigured("no generation model set".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::Connection(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, GenerationError> {
        Self::new(
            &config.ollama_base_url,
            &config.model,
            config.generation_timeout.as_secs().max(1),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl GenerationClient for OllamaGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: user_prompt,
            system: system_prompt,
            stream: false,
            format: "json",
            options: GenerateOptions { temperature },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GenerationError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    GenerationError::Connection(format!(
                        "{} (timed out after {}s)",
                        self.base_url, self.timeout_secs
                    ))
                } else {
                    GenerationError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::ResponseParsing(e.to_string()))?;

        tracing::debug!(
            model = %self.model,
            temperature,
            response_chars = parsed.response.len(),
            "Generation call completed"
        );

        Ok(response_text(parsed, &self.model))
    }
}

/// Text of a completed generation. A blank answer is passed through so the
/// caller's validator rejects it like any other unusable output.
fn response_text(parsed: OllamaGenerateResponse, model: &str) -> String {
    if parsed.response.trim().is_empty() {
        tracing::warn!(%model, "Generation server returned a blank response");
    }
    parsed.response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = OllamaGenerator::new("http://localhost:11434/", "llama3.1:8b", 60).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.timeout_secs, 60);
        assert_eq!(client.model(), "llama3.1:8b");
    }

    #[test]
    fn blank_response_is_passed_through_for_validation() {
        let parsed: OllamaGenerateResponse =
            serde_json::from_str(r#"{"response": "  \n ", "done": true}"#).unwrap();
        let text = response_text(parsed, "llama3.1:8b");
        assert_eq!(text, "  \n ");
        assert!(matches!(
            crate::pipeline::research::parser::validate_output(&text),
            crate::pipeline::research::parser::ValidationOutcome::Invalid(_)
        ));
    }

    #[test]
    fn blank_model_is_not_configured() {
        let result = OllamaGenerator::new("http://localhost:11434", "  ", 60);
        assert!(matches!(result, Err(GenerationError::NotConfigured(_))));
    }

    #[test]
    fn from_config_uses_generation_timeout() {
        let config = ServiceConfig::default();
        let client = OllamaGenerator::from_config(&config).unwrap();
        assert_eq!(client.timeout_secs, config.generation_timeout.as_secs());
        assert_eq!(client.model(), crate::config::DEFAULT_MODEL);
    }

    #[test]
    fn request_body_is_json_mode_with_temperature() {
        let body = OllamaGenerateRequest {
            model: "m",
            prompt: "p",
            system: "s",
            stream: false,
            format: "json",
            options: GenerateOptions { temperature: 0.0 },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["temperature"], 0.0);
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        // Port 9 (discard) is closed on test hosts
        let client = OllamaGenerator::new("http://127.0.0.1:9", "m", 2).unwrap();
        let result = client.generate("s", "p", 0.2).await;
        assert!(matches!(result, Err(GenerationError::Connection(_))));
    }
}
