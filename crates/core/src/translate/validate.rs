//! Output validation.
//!
//! Catches the two failure shapes LLM backends actually produce: script-level
//! hallucination (e.g. CJK output for a Latin-script target) and untranslated
//! passthrough. Length-ratio outliers are only warned about.

/// Verdict on one translated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineIssue {
    /// Characters outside the target language's script set.
    Hallucination,
    /// Output equals the source and the source reads like the wrong language.
    Passthrough,
    /// Length ratio outside `[0.3, 3.0]`; advisory only.
    SuspiciousLength,
}

const RATIO_MIN: f64 = 0.3;
const RATIO_MAX: f64 = 3.0;

/// English stopwords that betray an untranslated line in a non-English
/// target.
const EN_STOPWORDS: [&str; 12] = [
    "the", "and", "you", "this", "that", "with", "have", "what", "your", "they", "would", "there",
];

/// Validate one translated line against its source.
pub fn validate_line(source: &str, translated: &str, target_language: &str) -> Option<LineIssue> {
    if translated.trim().is_empty() && !source.trim().is_empty() {
        return Some(LineIssue::Hallucination);
    }
    if contains_foreign_script(translated, target_language) {
        return Some(LineIssue::Hallucination);
    }
    if translated == source && looks_untranslated(source, target_language) {
        return Some(LineIssue::Passthrough);
    }
    let source_len = source.chars().count();
    if source_len >= 10 {
        let ratio = translated.chars().count() as f64 / source_len as f64;
        if !(RATIO_MIN..=RATIO_MAX).contains(&ratio) {
            return Some(LineIssue::SuspiciousLength);
        }
    }
    None
}

/// True if the text contains codepoints no subtitle in `target_language`
/// should carry.
fn contains_foreign_script(text: &str, target_language: &str) -> bool {
    let latin_target = is_latin_script(target_language);
    for c in text.chars() {
        let code = c as u32;
        let cjk = (0x4E00..=0x9FFF).contains(&code)     // CJK unified
            || (0x3400..=0x4DBF).contains(&code)        // CJK ext A
            || (0x3040..=0x30FF).contains(&code)        // hiragana/katakana
            || (0xAC00..=0xD7AF).contains(&code); // hangul
        let cyrillic = (0x0400..=0x04FF).contains(&code);
        let arabic = (0x0600..=0x06FF).contains(&code);
        match target_language {
            "ja" | "zh" | "ko" => {
                if cyrillic || arabic {
                    return true;
                }
            }
            "ru" | "uk" | "bg" | "sr" => {
                if cjk || arabic {
                    return true;
                }
            }
            "ar" | "fa" => {
                if cjk || cyrillic {
                    return true;
                }
            }
            _ if latin_target => {
                if cjk || cyrillic || arabic {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn is_latin_script(language: &str) -> bool {
    !matches!(
        language,
        "ja" | "zh" | "ko" | "ru" | "uk" | "bg" | "sr" | "ar" | "fa" | "he" | "el" | "th"
    )
}

/// True when a line left as-is is probably untranslated English.
fn looks_untranslated(source: &str, target_language: &str) -> bool {
    if target_language == "en" {
        return false;
    }
    let words: Vec<String> = source
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();
    if words.len() < 3 {
        return false;
    }
    words
        .iter()
        .filter(|w| EN_STOPWORDS.contains(&w.as_str()))
        .count()
        >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cjk_in_german_target_is_hallucination() {
        assert_eq!(
            validate_line("Hello there", "こんにちは", "de"),
            Some(LineIssue::Hallucination)
        );
        assert_eq!(
            validate_line("Hello there", "Hallo 世界", "de"),
            Some(LineIssue::Hallucination)
        );
    }

    #[test]
    fn test_cjk_fine_for_japanese_target() {
        assert_eq!(validate_line("Hello", "こんにちは", "ja"), None);
    }

    #[test]
    fn test_cyrillic_in_latin_target_is_hallucination() {
        assert_eq!(
            validate_line("Hello", "Привет", "de"),
            Some(LineIssue::Hallucination)
        );
        assert_eq!(validate_line("Hello", "Привет", "ru"), None);
    }

    #[test]
    fn test_empty_output_for_nonempty_source() {
        assert_eq!(
            validate_line("Hello there", "", "de"),
            Some(LineIssue::Hallucination)
        );
        assert_eq!(validate_line("", "", "de"), None);
    }

    #[test]
    fn test_passthrough_detection() {
        let line = "What would you do with the money";
        assert_eq!(
            validate_line(line, line, "de"),
            Some(LineIssue::Passthrough)
        );
        // Identity output is fine for an English target.
        assert_eq!(validate_line(line, line, "en"), None);
        // Short identity lines (names, interjections) pass.
        assert_eq!(validate_line("Hm.", "Hm.", "de"), None);
    }

    #[test]
    fn test_length_ratio_warning() {
        let source = "a sentence of reasonable length";
        let bloated = source.repeat(5);
        assert_eq!(
            validate_line(source, &bloated, "de"),
            Some(LineIssue::SuspiciousLength)
        );
        assert_eq!(
            validate_line(source, "kurz", "de"),
            Some(LineIssue::SuspiciousLength)
        );
    }

    #[test]
    fn test_good_translation_passes() {
        assert_eq!(
            validate_line("Where are we going?", "Wohin gehen wir?", "de"),
            None
        );
    }
}
