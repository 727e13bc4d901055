//! Podnapisi.NET provider (JSON advanced search, zip downloads).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::types::{
    ConfigField, ProviderError, ProviderResult, RateLimit, SubtitleProvider, VideoQuery,
};
use crate::subtitle::SubtitleFormat;

const NAME: &str = "podnapisi";
const DEFAULT_BASE: &str = "https://www.podnapisi.net";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodnapisiConfig {
    #[serde(default = "default_base")]
    pub base_url: String,
}

fn default_base() -> String {
    DEFAULT_BASE.to_string()
}

impl Default for PodnapisiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base(),
        }
    }
}

pub struct PodnapisiProvider {
    config: PodnapisiConfig,
    client: reqwest::Client,
}

impl PodnapisiProvider {
    pub fn new(config: PodnapisiConfig) -> Self {
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
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: serde_json::Value,
    language: Option<String>,
    download: Option<String>,
    #[serde(default)]
    releases: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
}

fn parse_search(
    query: &VideoQuery,
    base_url: &str,
    body: &str,
) -> Result<Vec<ProviderResult>, ProviderError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Format {
            provider: NAME.to_string(),
            message: format!("bad search response: {e}"),
        })?;

    let mut results = Vec::new();
    for entry in parsed.data {
        let Some(download) = entry.download else {
            continue;
        };
        let id = match &entry.id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => continue,
        };
        let language = entry.language.unwrap_or_default().to_ascii_lowercase();

        let mut matches = HashSet::new();
        if query.title.is_some() {
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
        if let (Some(group), Some(first_release)) =
            (&query.release_group, entry.releases.first())
        {
            if first_release
                .to_ascii_lowercase()
                .contains(&group.to_ascii_lowercase())
            {
                matches.insert("release_group".to_string());
            }
        }
        if entry.flags.iter().any(|f| f == "hearing_impaired") {
            matches.insert("hearing_impaired".to_string());
        }

        let download_url = if download.starts_with("http") {
            download
        } else {
            format!("{base_url}{download}")
        };

        results.push(ProviderResult {
            provider: NAME.to_string(),
            id,
            language,
            // Podnapisi serves zips; the real format is known after unpack.
            format: SubtitleFormat::Unknown,
            filename: None,
            download_ref: download_url,
            release_info: entry.releases.first().cloned(),
            hearing_impaired: entry.flags.iter().any(|f| f == "hearing_impaired"),
            forced: entry.flags.iter().any(|f| f == "foreign_only"),
            machine_translated: false,
            matches,
        });
    }
    Ok(results)
}

#[async_trait]
impl SubtitleProvider for PodnapisiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn languages(&self) -> Vec<String> {
        vec!["*".to_string()]
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests: 30,
            window_seconds: 60,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn priority(&self) -> u8 {
        30
    }

    fn config_fields(&self) -> Vec<ConfigField> {
        Vec::new()
    }

    async fn search(&self, query: &VideoQuery) -> Result<Vec<ProviderResult>, ProviderError> {
        let Some(title) = &query.title else {
            return Ok(Vec::new());
        };

        let mut params: Vec<(String, String)> = vec![
            ("keywords".into(), title.clone()),
            ("language".into(), query.languages.join(",")),
        ];
        if let Some(season) = query.season {
            params.push(("seasons".into(), season.to_string()));
        }
        if let Some(episode) = query.episode {
            params.push(("episodes".into(), episode.to_string()));
        }
        if let Some(year) = query.year {
            params.push(("year".into(), year.to_string()));
        }

        let response = self
            .client
            .get(format!(
                "{}/subtitles/search/advanced",
                self.config.base_url
            ))
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await
            .map_err(Self::transient)?;

        match response.status().as_u16() {
            200 => {}
            429 => {
                return Err(ProviderError::RateLimited {
                    provider: NAME.to_string(),
                    retry_after: None,
                })
            }
            status => return Err(Self::transient(format!("status {status}"))),
        }

        let body = response.text().await.map_err(Self::transient)?;
        parse_search(query, &self.config.base_url, &body)
    }

    async fn download(&self, result: &ProviderResult) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(&result.download_ref)
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
        let response = self
            .client
            .get(format!("{}/subtitles/search/advanced", self.config.base_url))
            .header("Accept", "application/json")
            .query(&[("keywords", "health")])
            .send()
            .await
            .map_err(Self::transient)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::transient(format!("status {}", response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "data": [
            {
                "id": 991,
                "language": "de",
                "download": "/subtitles/de-show-s01e02/download",
                "releases": ["Show.S01E02.1080p.WEB-GROUP"],
                "flags": []
            },
            {
                "id": "992",
                "language": "de",
                "download": "https://cdn.podnapisi.net/s/992.zip",
                "releases": [],
                "flags": ["hearing_impaired"]
            },
            {
                "id": 993,
                "language": "de"
            }
        ]
    }"#;

    fn query() -> VideoQuery {
        let mut query = VideoQuery::new("/m/a.mkv", vec!["de".into()]);
        query.title = Some("Show".into());
        query.season = Some(1);
        query.episode = Some(2);
        query.release_group = Some("GROUP".into());
        query
    }

    #[test]
    fn test_parse_search() {
        let results = parse_search(&query(), DEFAULT_BASE, SAMPLE).unwrap();
        // Entry without a download link is dropped.
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(
            first.download_ref,
            "https://www.podnapisi.net/subtitles/de-show-s01e02/download"
        );
        assert!(first.matches.contains("series"));
        assert!(first.matches.contains("release_group"));

        let second = &results[1];
        assert_eq!(second.download_ref, "https://cdn.podnapisi.net/s/992.zip");
        assert!(second.hearing_impaired);
        assert!(second.matches.contains("hearing_impaired"));
    }

    #[test]
    fn test_numeric_and_string_ids() {
        let results = parse_search(&query(), DEFAULT_BASE, SAMPLE).unwrap();
        assert_eq!(results[0].id, "991");
        assert_eq!(results[1].id, "992");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_search(&query(), DEFAULT_BASE, "<html>").is_err());
    }
}
