//! OpenAI-compatible chat-completions backend.
//!
//! Works against api.openai.com or any server speaking the same protocol
//! (LM Studio, vLLM, llama.cpp server).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::translate::batch::{build_batch_prompt, parse_numbered_response};
use crate::translate::types::{BatchRequest, TranslateError, TranslationBackend};

const NAME: &str = "openai";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_base")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,
}

fn default_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_batch_size() -> usize {
    15
}

pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl TranslationBackend for OpenAiBackend {
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
        let (system, user) = build_batch_prompt(batch);
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(TranslateError::BackendAuthInvalid(NAME.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(TranslateError::Transient {
                    backend: NAME.to_string(),
                    message: format!("status {status}: {body}"),
                });
            }
        }

        let chat: ChatResponse =
            response.json().await.map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: format!("bad response: {e}"),
            })?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        parse_numbered_response(content, batch.lines.len())
    }

    async fn health_check(&self) -> Result<(), TranslateError> {
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|_| TranslateError::BackendUnavailable(NAME.to_string()))?;
        match response.status().as_u16() {
            200 => Ok(()),
            401 | 403 => Err(TranslateError::BackendAuthInvalid(NAME.to_string())),
            _ => Err(TranslateError::BackendUnavailable(NAME.to_string())),
        }
    }
}
