//! DeepL sentence-translation backend (character metered).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::translate::glossary::apply_substitutions;
use crate::translate::types::{BatchRequest, TranslateError, TranslationBackend};

const NAME: &str = "deepl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepLConfig {
    pub api_key: String,
    /// Free-tier keys use api-free.deepl.com, paid keys api.deepl.com.
    #[serde(default = "default_base")]
    pub base_url: String,
}

fn default_base() -> String {
    "https://api-free.deepl.com/v2".to_string()
}

pub struct DeepLBackend {
    config: DeepLConfig,
    client: reqwest::Client,
}

impl DeepLBackend {
    pub fn new(config: DeepLConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TranslateBody {
    text: Vec<String>,
    source_lang: String,
    target_lang: String,
    /// Subtitles are plain text; markup handling off.
    preserve_formatting: bool,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

#[async_trait]
impl TranslationBackend for DeepLBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        50
    }

    async fn translate_batch(
        &self,
        batch: &BatchRequest,
    ) -> Result<Vec<String>, TranslateError> {
        // Sentence backend: glossary terms are substituted up front.
        let text: Vec<String> = batch
            .lines
            .iter()
            .map(|line| apply_substitutions(line, &batch.glossary))
            .collect();
        let expected = text.len();

        let body = TranslateBody {
            text,
            source_lang: batch.source_language.to_uppercase(),
            target_lang: batch.target_language.to_uppercase(),
            preserve_formatting: true,
        };

        let response = self
            .client
            .post(format!("{}/translate", self.config.base_url))
            .header(
                "Authorization",
                format!("DeepL-Auth-Key {}", self.config.api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(TranslateError::BackendAuthInvalid(NAME.to_string())),
            456 => {
                // Quota exhausted; not retryable until the meter resets.
                return Err(TranslateError::BackendAuthInvalid(NAME.to_string()));
            }
            status => {
                return Err(TranslateError::Transient {
                    backend: NAME.to_string(),
                    message: format!("status {status}"),
                })
            }
        }

        let parsed: TranslateResponse =
            response.json().await.map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: format!("bad response: {e}"),
            })?;

        if parsed.translations.len() != expected {
            return Err(TranslateError::LineCountMismatch {
                expected,
                actual: parsed.translations.len(),
            });
        }
        Ok(parsed.translations.into_iter().map(|t| t.text).collect())
    }

    async fn health_check(&self) -> Result<(), TranslateError> {
        let response = self
            .client
            .get(format!("{}/usage", self.config.base_url))
            .header(
                "Authorization",
                format!("DeepL-Auth-Key {}", self.config.api_key),
            )
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let body = r#"{"translations": [{"detected_source_language": "EN", "text": "Hallo"}]}"#;
        let parsed: TranslateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.translations[0].text, "Hallo");
    }

    #[test]
    fn test_free_tier_default_base() {
        let config: DeepLConfig = serde_json::from_str(r#"{"api_key": "x:fx"}"#).unwrap();
        assert!(config.base_url.contains("api-free"));
    }
}
