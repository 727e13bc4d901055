//! Result scoring.
//!
//! Weights are summed over `result.matches`; ASS/SSA results get a flat
//! format bonus so styled subtitles win against otherwise-equal SRTs.
//! Operators may override single weights at runtime; the resolved table is
//! cached for 60 seconds keyed by the config fingerprint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::types::{ProviderResult, VideoQuery};

/// Bonus for results already in a styled format.
pub const FORMAT_BONUS: u32 = 50;

const CACHE_TTL: Duration = Duration::from_secs(60);

/// A resolved weight table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreWeights {
    weights: HashMap<String, u32>,
}

impl ScoreWeights {
    pub fn episode_defaults() -> Self {
        Self {
            weights: [
                ("hash", 359),
                ("series", 180),
                ("year", 90),
                ("season", 30),
                ("episode", 30),
                ("release_group", 14),
                ("source", 7),
                ("audio_codec", 3),
                ("resolution", 2),
                ("hearing_impaired", 1),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        }
    }

    pub fn movie_defaults() -> Self {
        Self {
            weights: [
                ("hash", 119),
                ("title", 60),
                ("year", 30),
                ("release_group", 13),
                ("source", 7),
                ("audio_codec", 3),
                ("resolution", 2),
                ("hearing_impaired", 1),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        }
    }

    /// Apply operator overrides on top of the defaults.
    pub fn with_overrides(mut self, overrides: &HashMap<String, u32>) -> Self {
        for (key, value) in overrides {
            self.weights.insert(key.clone(), *value);
        }
        self
    }

    pub fn weight(&self, attr: &str) -> u32 {
        self.weights.get(attr).copied().unwrap_or(0)
    }

    /// Score a result: matched-attribute weights plus the format bonus.
    pub fn score(&self, result: &ProviderResult) -> u32 {
        let base: u32 = result.matches.iter().map(|m| self.weight(m)).sum();
        if result.format.is_styled() {
            base + FORMAT_BONUS
        } else {
            base
        }
    }
}

/// The weight table pair resolved for one config fingerprint.
#[derive(Debug, Clone)]
pub struct ResolvedWeights {
    pub episode: ScoreWeights,
    pub movie: ScoreWeights,
}

impl ResolvedWeights {
    pub fn for_query(&self, query: &VideoQuery) -> &ScoreWeights {
        if query.is_episode() {
            &self.episode
        } else {
            &self.movie
        }
    }
}

/// 60-second cache of the resolved tables, keyed by config fingerprint.
pub struct WeightCache {
    inner: Mutex<Option<CachedEntry>>,
}

struct CachedEntry {
    fingerprint: String,
    resolved_at: Instant,
    weights: ResolvedWeights,
}

impl WeightCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Get the tables for `fingerprint`, resolving through `load_overrides`
    /// on a miss or after the TTL.
    pub fn resolve(
        &self,
        fingerprint: &str,
        load_overrides: impl FnOnce() -> (HashMap<String, u32>, HashMap<String, u32>),
    ) -> ResolvedWeights {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.as_ref() {
            if entry.fingerprint == fingerprint && entry.resolved_at.elapsed() < CACHE_TTL {
                return entry.weights.clone();
            }
        }
        let (episode_overrides, movie_overrides) = load_overrides();
        let weights = ResolvedWeights {
            episode: ScoreWeights::episode_defaults().with_overrides(&episode_overrides),
            movie: ScoreWeights::movie_defaults().with_overrides(&movie_overrides),
        };
        *inner = Some(CachedEntry {
            fingerprint: fingerprint.to_string(),
            resolved_at: Instant::now(),
            weights: weights.clone(),
        });
        weights
    }

    pub fn invalidate(&self) {
        *self.inner.lock().unwrap() = None;
    }
}

impl Default for WeightCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::subtitle::SubtitleFormat;

    fn result_with(matches: &[&str], format: SubtitleFormat) -> ProviderResult {
        ProviderResult {
            provider: "test".into(),
            id: "1".into(),
            language: "de".into(),
            format,
            filename: None,
            download_ref: "ref".into(),
            release_info: None,
            hearing_impaired: false,
            forced: false,
            machine_translated: false,
            matches: matches.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        }
    }

    #[test]
    fn test_episode_weights() {
        let weights = ScoreWeights::episode_defaults();
        let result = result_with(&["hash", "series", "season", "episode"], SubtitleFormat::Srt);
        assert_eq!(weights.score(&result), 359 + 180 + 30 + 30);
    }

    #[test]
    fn test_movie_weights() {
        let weights = ScoreWeights::movie_defaults();
        let result = result_with(&["hash", "title", "year"], SubtitleFormat::Srt);
        assert_eq!(weights.score(&result), 119 + 60 + 30);
    }

    #[test]
    fn test_format_bonus() {
        let weights = ScoreWeights::episode_defaults();
        let srt = result_with(&["series"], SubtitleFormat::Srt);
        let ass = result_with(&["series"], SubtitleFormat::Ass);
        let ssa = result_with(&["series"], SubtitleFormat::Ssa);
        assert_eq!(weights.score(&ass), weights.score(&srt) + FORMAT_BONUS);
        assert_eq!(weights.score(&ssa), weights.score(&srt) + FORMAT_BONUS);
    }

    #[test]
    fn test_unknown_match_scores_zero() {
        let weights = ScoreWeights::episode_defaults();
        let result = result_with(&["made_up_attr"], SubtitleFormat::Srt);
        assert_eq!(weights.score(&result), 0);
    }

    #[test]
    fn test_adding_a_match_never_decreases_score() {
        let weights = ScoreWeights::episode_defaults();
        let mut matches: Vec<&str> = Vec::new();
        let mut last = 0;
        for attr in [
            "hash",
            "series",
            "year",
            "season",
            "episode",
            "release_group",
            "source",
            "audio_codec",
            "resolution",
            "hearing_impaired",
        ] {
            matches.push(attr);
            let score = weights.score(&result_with(&matches, SubtitleFormat::Srt));
            assert!(score >= last);
            last = score;
        }
    }

    #[test]
    fn test_overrides_replace_single_weights() {
        let overrides: HashMap<String, u32> = [("hash".to_string(), 1000)].into_iter().collect();
        let weights = ScoreWeights::episode_defaults().with_overrides(&overrides);
        assert_eq!(weights.weight("hash"), 1000);
        assert_eq!(weights.weight("series"), 180);
    }

    #[test]
    fn test_cache_resolves_once_per_fingerprint() {
        let cache = WeightCache::new();
        let mut loads = 0;
        for _ in 0..3 {
            cache.resolve("fp1", || {
                loads += 1;
                (HashMap::new(), HashMap::new())
            });
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_cache_reloads_on_fingerprint_change() {
        let cache = WeightCache::new();
        let mut loads = 0;
        cache.resolve("fp1", || {
            loads += 1;
            (HashMap::new(), HashMap::new())
        });
        cache.resolve("fp2", || {
            loads += 1;
            (HashMap::new(), HashMap::new())
        });
        assert_eq!(loads, 2);
    }

    #[test]
    fn test_for_query_picks_table() {
        let resolved = ResolvedWeights {
            episode: ScoreWeights::episode_defaults(),
            movie: ScoreWeights::movie_defaults(),
        };
        let mut query = VideoQuery::new("/m/a.mkv", vec![]);
        assert_eq!(resolved.for_query(&query).weight("title"), 60);
        query.episode = Some(3);
        assert_eq!(resolved.for_query(&query).weight("series"), 180);
    }
}
