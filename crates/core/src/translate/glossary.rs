//! Term glossaries.
//!
//! A glossary maps source terms to fixed target terms, globally and per
//! series. LLM backends receive the pairs in their prompt; sentence backends
//! get a word-boundary pre-substitution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Glossary {
    #[serde(default)]
    global: HashMap<String, String>,
    /// Per-series overrides, keyed by series id.
    #[serde(default)]
    per_series: HashMap<i64, HashMap<String, String>>,
}

impl Glossary {
    pub fn new(global: HashMap<String, String>) -> Self {
        Self {
            global,
            per_series: HashMap::new(),
        }
    }

    pub fn insert_global(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.global.insert(source.into(), target.into());
    }

    pub fn insert_series(
        &mut self,
        series_id: i64,
        source: impl Into<String>,
        target: impl Into<String>,
    ) {
        self.per_series
            .entry(series_id)
            .or_default()
            .insert(source.into(), target.into());
    }

    /// Effective pairs for a series: series entries override global ones.
    pub fn resolve(&self, series_id: Option<i64>) -> Vec<(String, String)> {
        let mut merged = self.global.clone();
        if let Some(series_id) = series_id {
            if let Some(overrides) = self.per_series.get(&series_id) {
                for (k, v) in overrides {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        let mut pairs: Vec<(String, String)> = merged.into_iter().collect();
        pairs.sort();
        pairs
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.per_series.is_empty()
    }
}

/// Substitute glossary source terms in a line, on word boundaries only.
pub fn apply_substitutions(line: &str, pairs: &[(String, String)]) -> String {
    let mut result = line.to_string();
    for (source, target) in pairs {
        result = replace_word(&result, source, target);
    }
    result
}

fn replace_word(text: &str, word: &str, replacement: &str) -> String {
    if word.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let word_lower = word.to_lowercase();
    loop {
        let rest_lower = rest.to_lowercase();
        let Some(pos) = rest_lower.find(&word_lower) else {
            out.push_str(rest);
            return out;
        };
        let end = pos + word.len();
        let before_ok = pos == 0
            || !rest[..pos]
                .chars()
                .next_back()
                .map(char::is_alphanumeric)
                .unwrap_or(false);
        let after_ok = end >= rest.len()
            || !rest[end..]
                .chars()
                .next()
                .map(char::is_alphanumeric)
                .unwrap_or(false);
        out.push_str(&rest[..pos]);
        if before_ok && after_ok {
            out.push_str(replacement);
        } else {
            out.push_str(&rest[pos..end]);
        }
        rest = &rest[end..];
    }
}
