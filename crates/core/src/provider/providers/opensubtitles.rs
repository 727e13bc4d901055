//! OpenSubtitles REST provider (api.opensubtitles.com).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::types::{
    ConfigField, ConfigFieldKind, ProviderError, ProviderResult, RateLimit, SubtitleProvider,
    VideoQuery,
};
use crate::subtitle::SubtitleFormat;

const NAME: &str = "opensubtitles";
const DEFAULT_API_BASE: &str = "https://api.opensubtitles.com/api/v1";
const USER_AGENT: &str = concat!("Sublarr v", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSubtitlesConfig {
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

pub struct OpenSubtitlesProvider {
    config: OpenSubtitlesConfig,
    client: reqwest::Client,
}

impl OpenSubtitlesProvider {
    pub fn new(config: OpenSubtitlesConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn map_status(status: u16, body: &str, retry_after: Option<u64>) -> ProviderError {
        match status {
            401 | 403 => ProviderError::Auth {
                provider: NAME.to_string(),
                message: body.to_string(),
            },
            429 => ProviderError::RateLimited {
                provider: NAME.to_string(),
                retry_after: retry_after.map(Duration::from_secs),
            },
            _ => ProviderError::Transient {
                provider: NAME.to_string(),
                message: format!("status {status}: {body}"),
            },
        }
    }

    async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        Err(Self::map_status(status, &body, retry_after))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    attributes: SearchAttributes,
}

#[derive(Debug, Deserialize)]
struct SearchAttributes {
    language: Option<String>,
    #[serde(default)]
    hearing_impaired: bool,
    #[serde(default)]
    machine_translated: bool,
    #[serde(default)]
    foreign_parts_only: bool,
    #[serde(default)]
    moviehash_match: bool,
    release: Option<String>,
    #[serde(default)]
    files: Vec<SearchFile>,
}

#[derive(Debug, Deserialize)]
struct SearchFile {
    file_id: u64,
    file_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadRequest {
    file_id: u64,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    link: String,
}

fn parse_search(query: &VideoQuery, body: &str) -> Result<Vec<ProviderResult>, ProviderError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Format {
            provider: NAME.to_string(),
            message: format!("bad search response: {e}"),
        })?;

    let mut results = Vec::new();
    for entry in parsed.data {
        let attrs = entry.attributes;
        let Some(file) = attrs.files.first() else {
            continue;
        };
        let language = attrs.language.unwrap_or_default().to_ascii_lowercase();

        let mut matches = HashSet::new();
        if attrs.moviehash_match {
            matches.insert("hash".to_string());
        }
        // Attributes we searched by are provider-verified on return.
        if query.ids.imdb.is_some() || query.title.is_some() {
            matches.insert(if query.is_episode() { "series" } else { "title" }.to_string());
        }
        if query.year.is_some() {
            matches.insert("year".to_string());
        }
        if query.season.is_some() {
            matches.insert("season".to_string());
        }
        if query.episode.is_some() {
            matches.insert("episode".to_string());
        }
        if attrs.hearing_impaired {
            matches.insert("hearing_impaired".to_string());
        }

        let format = file
            .file_name
            .as_deref()
            .and_then(|name| name.rsplit('.').next())
            .map(SubtitleFormat::from_extension)
            .filter(|f| *f != SubtitleFormat::Unknown)
            .unwrap_or(SubtitleFormat::Srt);

        results.push(ProviderResult {
            provider: NAME.to_string(),
            id: file.file_id.to_string(),
            language,
            format,
            filename: file.file_name.clone(),
            download_ref: file.file_id.to_string(),
            release_info: attrs.release,
            hearing_impaired: attrs.hearing_impaired,
            forced: attrs.foreign_parts_only,
            machine_translated: attrs.machine_translated,
            matches,
        });
    }
    Ok(results)
}

#[async_trait]
impl SubtitleProvider for OpenSubtitlesProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn languages(&self) -> Vec<String> {
        // OpenSubtitles covers effectively every ISO 639-1 language.
        vec!["*".to_string()]
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests: 40,
            window_seconds: 10,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    fn priority(&self) -> u8 {
        10
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
        params.push(("languages".into(), query.languages.join(",")));
        if let Some(hash) = &query.file_hash {
            params.push(("moviehash".into(), hash.clone()));
        }
        if let Some(imdb) = &query.ids.imdb {
            params.push(("imdb_id".into(), imdb.trim_start_matches("tt").to_string()));
        } else if let Some(title) = &query.title {
            params.push(("query".into(), title.clone()));
        }
        if let Some(season) = query.season {
            params.push(("season_number".into(), season.to_string()));
        }
        if let Some(episode) = query.episode {
            params.push(("episode_number".into(), episode.to_string()));
        }
        if let Some(year) = query.year {
            params.push(("year".into(), year.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/subtitles", self.config.api_base))
            .header("Api-Key", &self.config.api_key)
            .header("User-Agent", USER_AGENT)
            .query(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Transient {
                provider: NAME.to_string(),
                message: e.to_string(),
            })?;

        let body = Self::check_response(response)
            .await?
            .text()
            .await
            .map_err(|e| ProviderError::Transient {
                provider: NAME.to_string(),
                message: e.to_string(),
            })?;

        parse_search(query, &body)
    }

    async fn download(&self, result: &ProviderResult) -> Result<Vec<u8>, ProviderError> {
        let file_id: u64 = result.download_ref.parse().map_err(|_| ProviderError::Format {
            provider: NAME.to_string(),
            message: format!("bad download ref {}", result.download_ref),
        })?;

        let response = self
            .client
            .post(format!("{}/download", self.config.api_base))
            .header("Api-Key", &self.config.api_key)
            .header("User-Agent", USER_AGENT)
            .json(&DownloadRequest { file_id })
            .send()
            .await
            .map_err(|e| ProviderError::Transient {
                provider: NAME.to_string(),
                message: e.to_string(),
            })?;
        let grant: DownloadResponse = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Format {
                provider: NAME.to_string(),
                message: format!("bad download grant: {e}"),
            })?;

        let file = self
            .client
            .get(&grant.link)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| ProviderError::Transient {
                provider: NAME.to_string(),
                message: e.to_string(),
            })?;
        let file = Self::check_response(file).await?;
        file.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ProviderError::Transient {
                provider: NAME.to_string(),
                message: e.to_string(),
            })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(NAME.to_string()));
        }
        let response = self
            .client
            .get(format!("{}/infos/languages", self.config.api_base))
            .header("Api-Key", &self.config.api_key)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| ProviderError::Transient {
                provider: NAME.to_string(),
                message: e.to_string(),
            })?;
        Self::check_response(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "data": [
            {
                "attributes": {
                    "language": "de",
                    "hearing_impaired": false,
                    "machine_translated": false,
                    "moviehash_match": true,
                    "release": "Show.S01E02.1080p.WEB",
                    "files": [{"file_id": 123, "file_name": "Show.S01E02.de.ass"}]
                }
            },
            {
                "attributes": {
                    "language": "de",
                    "hearing_impaired": true,
                    "moviehash_match": false,
                    "files": [{"file_id": 456, "file_name": "Show.S01E02.de.srt"}]
                }
            },
            {
                "attributes": {
                    "language": "de",
                    "files": []
                }
            }
        ]
    }"#;

    fn query() -> VideoQuery {
        let mut query = VideoQuery::new("/m/a.mkv", vec!["de".into()]);
        query.title = Some("Show".into());
        query.season = Some(1);
        query.episode = Some(2);
        query.file_hash = Some("abcd".into());
        query
    }

    #[test]
    fn test_parse_search_results() {
        let results = parse_search(&query(), SAMPLE).unwrap();
        // The entry without files is dropped.
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.download_ref, "123");
        assert_eq!(first.format, SubtitleFormat::Ass);
        assert!(first.matches.contains("hash"));
        assert!(first.matches.contains("series"));
        assert!(first.matches.contains("season"));
        assert!(first.matches.contains("episode"));

        let second = &results[1];
        assert_eq!(second.format, SubtitleFormat::Srt);
        assert!(!second.matches.contains("hash"));
        assert!(second.matches.contains("hearing_impaired"));
        assert!(second.hearing_impaired);
    }

    #[test]
    fn test_parse_search_movie_uses_title_match() {
        let mut movie = VideoQuery::new("/m/film.mkv", vec!["de".into()]);
        movie.title = Some("Film".into());
        let results = parse_search(&movie, SAMPLE).unwrap();
        assert!(results[0].matches.contains("title"));
        assert!(!results[0].matches.contains("series"));
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_search(&query(), "nope"),
            Err(ProviderError::Format { .. })
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            OpenSubtitlesProvider::map_status(401, "bad key", None),
            ProviderError::Auth { .. }
        ));
        let rate_limited = OpenSubtitlesProvider::map_status(429, "slow down", Some(12));
        match rate_limited {
            ProviderError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert!(matches!(
            OpenSubtitlesProvider::map_status(502, "oops", None),
            ProviderError::Transient { .. }
        ));
    }

    #[test]
    fn test_empty_api_key_is_not_configured() {
        let provider = OpenSubtitlesProvider::new(OpenSubtitlesConfig {
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
        });
        let err = tokio_test::block_on(provider.search(&query())).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
