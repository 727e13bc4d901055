//! Local LLM backend over the Ollama generate endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::translate::batch::{build_batch_prompt, parse_numbered_response};
use crate::translate::types::{BatchRequest, TranslateError, TranslationBackend};

const NAME: &str = "ollama";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub model: String,
    #[serde(default = "default_base")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,
}

fn default_base() -> String {
    "http://localhost:11434".to_string()
}

fn default_batch_size() -> usize {
    15
}

pub struct OllamaBackend {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl TranslationBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    async fn translate_batch(
        &self,
        batch: &BatchRequest,
    ) -> Result<Vec<String>, TranslateError> {
        let (system, prompt) = build_batch_prompt(batch);
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt,
            system,
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::Transient {
                backend: NAME.to_string(),
                message: format!("status {status}: {body}"),
            });
        }

        let generated: GenerateResponse =
            response.json().await.map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: format!("bad response: {e}"),
            })?;

        parse_numbered_response(&generated.response, batch.lines.len())
    }

    async fn health_check(&self) -> Result<(), TranslateError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .send()
            .await
            .map_err(|_| TranslateError::BackendUnavailable(NAME.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TranslateError::BackendUnavailable(NAME.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: OllamaConfig =
            serde_json::from_str(r#"{"model": "qwen2.5:14b"}"#).unwrap();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.max_batch_size, 15);
    }

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            model: "llama3".into(),
            prompt: "1. Hello".into(),
            system: "translate".into(),
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"stream\":false"));
        assert!(json.contains("\"temperature\":0.0"));
    }
}
