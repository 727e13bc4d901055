//! Google Cloud Translation v2 backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::translate::glossary::apply_substitutions;
use crate::translate::types::{BatchRequest, TranslateError, TranslationBackend};

const NAME: &str = "google";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTranslateConfig {
    pub api_key: String,
    #[serde(default = "default_base")]
    pub base_url: String,
}

fn default_base() -> String {
    "https://translation.googleapis.com/language/translate/v2".to_string()
}

pub struct GoogleTranslateBackend {
    config: GoogleTranslateConfig,
    client: reqwest::Client,
}

impl GoogleTranslateBackend {
    pub fn new(config: GoogleTranslateConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TranslateBody {
    q: Vec<String>,
    source: String,
    target: String,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    data: ApiData,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    translations: Vec<ApiTranslation>,
}

#[derive(Debug, Deserialize)]
struct ApiTranslation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[async_trait]
impl TranslationBackend for GoogleTranslateBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        100
    }

    async fn translate_batch(
        &self,
        batch: &BatchRequest,
    ) -> Result<Vec<String>, TranslateError> {
        let q: Vec<String> = batch
            .lines
            .iter()
            .map(|line| apply_substitutions(line, &batch.glossary))
            .collect();
        let expected = q.len();

        let body = TranslateBody {
            q,
            source: batch.source_language.clone(),
            target: batch.target_language.clone(),
            format: "text",
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .query(&[("key", &self.config.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            200 => {}
            400 | 401 | 403 => return Err(TranslateError::BackendAuthInvalid(NAME.to_string())),
            status => {
                return Err(TranslateError::Transient {
                    backend: NAME.to_string(),
                    message: format!("status {status}"),
                })
            }
        }

        let parsed: ApiResponse =
            response.json().await.map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: format!("bad response: {e}"),
            })?;

        if parsed.data.translations.len() != expected {
            return Err(TranslateError::LineCountMismatch {
                expected,
                actual: parsed.data.translations.len(),
            });
        }
        Ok(parsed
            .data
            .translations
            .into_iter()
            .map(|t| t.translated_text)
            .collect())
    }

    async fn health_check(&self) -> Result<(), TranslateError> {
        let body = TranslateBody {
            q: vec!["ping".to_string()],
            source: "en".to_string(),
            target: "de".to_string(),
            format: "text",
        };
        let response = self
            .client
            .post(&self.config.base_url)
            .query(&[("key", &self.config.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|_| TranslateError::BackendUnavailable(NAME.to_string()))?;
        match response.status().as_u16() {
            200 => Ok(()),
            400 | 401 | 403 => Err(TranslateError::BackendAuthInvalid(NAME.to_string())),
            _ => Err(TranslateError::BackendUnavailable(NAME.to_string())),
        }
    }
}
