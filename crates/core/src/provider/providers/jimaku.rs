//! Jimaku provider (jimaku.cc) — anime subtitle archive keyed by AniList id.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::provider::types::{
    ConfigField, ConfigFieldKind, ProviderError, ProviderResult, RateLimit, SubtitleProvider,
    VideoQuery,
};
use crate::subtitle::SubtitleFormat;

const NAME: &str = "jimaku";
const DEFAULT_API_BASE: &str = "https://jimaku.cc/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JimakuConfig {
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

pub struct JimakuProvider {
    config: JimakuConfig,
    client: reqwest::Client,
}

impl JimakuProvider {
    pub fn new(config: JimakuConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn transient(e: impl std::fmt::Display) -> ProviderError {
        ProviderError::Transient {
            provider: NAME.to_string(),
            message: e.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        params: &[(String, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", &self.config.api_key)
            .query(params)
            .send()
            .await
            .map_err(Self::transient)?;

        match response.status().as_u16() {
            200 => response.json().await.map_err(|e| ProviderError::Format {
                provider: NAME.to_string(),
                message: format!("bad response: {e}"),
            }),
            401 | 403 => Err(ProviderError::Auth {
                provider: NAME.to_string(),
                message: "API key rejected".to_string(),
            }),
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs);
                Err(ProviderError::RateLimited {
                    provider: NAME.to_string(),
                    retry_after,
                })
            }
            status => Err(Self::transient(format!("status {status}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct EntryFile {
    url: String,
    name: String,
}

/// Turn an entry's file list into results. Jimaku files carry no language
/// metadata; the filename is the only signal, defaulting to Japanese.
fn files_to_results(query: &VideoQuery, entry_id: u64, files: &[EntryFile]) -> Vec<ProviderResult> {
    let lang_re = Regex::new(r"\.([a-z]{2})\.(ass|srt|ssa|vtt)$").unwrap();
    files
        .iter()
        .filter_map(|file| {
            let ext = file.name.rsplit('.').next()?;
            let format = SubtitleFormat::from_extension(ext);
            if format == SubtitleFormat::Unknown {
                return None;
            }
            let language = lang_re
                .captures(&file.name.to_ascii_lowercase())
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "ja".to_string());

            let mut matches = HashSet::new();
            // Entries resolve through AniList ids, so the series identity is
            // verified; episode matching relies on the file name.
            if query.ids.anilist.is_some() {
                matches.insert("series".to_string());
            }
            if let Some(episode) = query.episode {
                if episode_in_name(&file.name, episode) {
                    matches.insert("episode".to_string());
                    if query.season.is_some() {
                        matches.insert("season".to_string());
                    }
                } else {
                    return None;
                }
            }

            Some(ProviderResult {
                provider: NAME.to_string(),
                id: format!("{entry_id}/{}", file.name),
                language,
                format,
                filename: Some(file.name.clone()),
                download_ref: file.url.clone(),
                release_info: None,
                hearing_impaired: false,
                forced: file.name.to_ascii_lowercase().contains("forced"),
                machine_translated: false,
                matches,
            })
        })
        .collect()
}

fn episode_in_name(name: &str, episode: u32) -> bool {
    let re = Regex::new(r"(?i)(?:e|ep|episode[ ._-]?|- ?)(\d{1,4})").unwrap();
    for caps in re.captures_iter(name) {
        if let Ok(number) = caps[1].parse::<u32>() {
            if number == episode {
                return true;
            }
        }
    }
    false
}

#[async_trait]
impl SubtitleProvider for JimakuProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn languages(&self) -> Vec<String> {
        vec!["ja".into(), "en".into()]
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests: 60,
            window_seconds: 60,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    fn priority(&self) -> u8 {
        20
    }

    fn config_fields(&self) -> Vec<ConfigField> {
        vec![ConfigField {
            name: "api_key",
            kind: ConfigFieldKind::Password,
            required: true,
        }]
    }

    async fn search(&self, query: &VideoQuery) -> Result<Vec<ProviderResult>, ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(NAME.to_string()));
        }

        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(anilist) = query.ids.anilist {
            params.push(("anilist_id".into(), anilist.to_string()));
        } else if let Some(title) = &query.title {
            params.push(("query".into(), title.clone()));
        } else {
            return Ok(Vec::new());
        }

        let entries: Vec<Entry> = self
            .get_json(format!("{}/entries/search", self.config.api_base), &params)
            .await?;
        let Some(entry) = entries.first() else {
            return Ok(Vec::new());
        };
        tracing::debug!(provider = NAME, entry = %entry.name, "matched entry");

        let mut file_params: Vec<(String, String)> = Vec::new();
        if let Some(episode) = query.episode {
            file_params.push(("episode".into(), episode.to_string()));
        }
        let files: Vec<EntryFile> = self
            .get_json(
                format!("{}/entries/{}/files", self.config.api_base, entry.id),
                &file_params,
            )
            .await?;

        Ok(files_to_results(query, entry.id, &files))
    }

    async fn download(&self, result: &ProviderResult) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(&result.download_ref)
            .header("Authorization", &self.config.api_key)
            .send()
            .await
            .map_err(Self::transient)?;
        if response.status().as_u16() != 200 {
            return Err(Self::transient(format!(
                "download status {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(Self::transient)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(NAME.to_string()));
        }
        let _: Vec<Entry> = self
            .get_json(
                format!("{}/entries/search", self.config.api_base),
                &[("query".into(), "health".into())],
            )
            .await?;
        Ok(())
    }
}
