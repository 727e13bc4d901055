//! Dialog vs signs/songs style classification.
//!
//! Dialog styles get translated; signs/songs (typesetting, karaoke) are
//! copied verbatim. Style names give a strong hint; for everything else the
//! fraction of positioned events decides.

use std::collections::HashMap;

use regex_lite::Regex;

use super::ass::AssFile;

/// Classification of an ASS style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleClass {
    Dialog,
    SignsSongs,
}

/// Fraction of positioned events above which an unnamed style counts as
/// signs/songs.
const POSITION_THRESHOLD: f64 = 0.8;

/// Classify every declared style of the file.
///
/// Every style gets exactly one class; styles referenced by events but not
/// declared are classified too, so the partition covers all event styles.
pub fn classify_styles(file: &AssFile) -> HashMap<String, StyleClass> {
    let dialog_names = Regex::new(r"(?i)^(default|main|dialog|alt)").unwrap();
    let signs_names = Regex::new(r"(?i)^(sign|song|op\b|op[_ -]|ed\b|ed[_ -]|karaoke)").unwrap();

    // Count positioned events per style.
    let mut totals: HashMap<&str, (usize, usize)> = HashMap::new();
    for event in file.dialogue_events() {
        let entry = totals.entry(event.style.as_str()).or_default();
        entry.0 += 1;
        if has_positioning(&event.text) {
            entry.1 += 1;
        }
    }

    let mut names: Vec<String> = file.style_names().iter().map(|s| s.to_string()).collect();
    for event in file.dialogue_events() {
        if !names.iter().any(|n| n == &event.style) {
            names.push(event.style.clone());
        }
    }

    let mut classes = HashMap::new();
    for name in names {
        let class = if dialog_names.is_match(&name) {
            StyleClass::Dialog
        } else if signs_names.is_match(&name) {
            StyleClass::SignsSongs
        } else {
            match totals.get(name.as_str()) {
                Some((total, positioned)) if *total > 0 => {
                    if *positioned as f64 / *total as f64 > POSITION_THRESHOLD {
                        StyleClass::SignsSongs
                    } else {
                        StyleClass::Dialog
                    }
                }
                _ => StyleClass::Dialog,
            }
        };
        classes.insert(name, class);
    }
    classes
}

fn has_positioning(text: &str) -> bool {
    text.contains("\\pos") || text.contains("\\move")
}
