//! LibreTranslate backend — self-hostable, translates one line per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::translate::glossary::apply_substitutions;
use crate::translate::types::{BatchRequest, TranslateError, TranslationBackend};

const NAME: &str = "libretranslate";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibreTranslateConfig {
    #[serde(default = "default_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base() -> String {
    "http://localhost:5000".to_string()
}

pub struct LibreTranslateBackend {
    config: LibreTranslateConfig,
    client: reqwest::Client,
}

impl LibreTranslateBackend {
    pub fn new(config: LibreTranslateConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn translate_one(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError> {
        let mut body = serde_json::json!({
            "q": text,
            "source": source,
            "target": target,
            "format": "text",
        });
        if let Some(key) = &self.config.api_key {
            body["api_key"] = serde_json::Value::String(key.clone());
        }

        let response = self
            .client
            .post(format!("{}/translate", self.config.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            200 => {}
            403 => return Err(TranslateError::BackendAuthInvalid(NAME.to_string())),
            status => {
                return Err(TranslateError::Transient {
                    backend: NAME.to_string(),
                    message: format!("status {status}"),
                })
            }
        }

        #[derive(Deserialize)]
        struct Translated {
            #[serde(rename = "translatedText")]
            translated_text: String,
        }
        let parsed: Translated =
            response.json().await.map_err(|e| TranslateError::Transient {
                backend: NAME.to_string(),
                message: format!("bad response: {e}"),
            })?;
        Ok(parsed.translated_text)
    }
}

#[async_trait]
impl TranslationBackend for LibreTranslateBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports_batch(&self) -> bool {
        false
    }

    fn max_batch_size(&self) -> usize {
        1
    }

    async fn translate_batch(
        &self,
        batch: &BatchRequest,
    ) -> Result<Vec<String>, TranslateError> {
        let mut out = Vec::with_capacity(batch.lines.len());
        for line in &batch.lines {
            let prepared = apply_substitutions(line, &batch.glossary);
            out.push(
                self.translate_one(&prepared, &batch.source_language, &batch.target_language)
                    .await?,
            );
        }
        Ok(out)
    }

    async fn health_check(&self) -> Result<(), TranslateError> {
        let response = self
            .client
            .get(format!("{}/languages", self.config.base_url))
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
    fn test_per_line_backend_shape() {
        let backend = LibreTranslateBackend::new(LibreTranslateConfig {
            base_url: default_base(),
            api_key: None,
        });
        assert!(!backend.supports_batch());
        assert_eq!(backend.max_batch_size(), 1);
    }

    #[test]
    fn test_config_defaults() {
        let config: LibreTranslateConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.base_url, "http://localhost:5000");
        assert!(config.api_key.is_none());
    }
}
