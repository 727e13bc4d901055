//! Numbered-batch prompt construction and response parsing for LLM backends.

use super::types::{BatchRequest, TranslateError};

/// Build the (system, user) prompt pair for a numbered batch.
///
/// Hard line breaks arrive as `\n` and are rendered as the `\N` sentinel the
/// model is told to preserve.
pub fn build_batch_prompt(batch: &BatchRequest) -> (String, String) {
    let mut system = format!(
        "You are a professional subtitle translator. Translate each numbered line from {} to {}. \
         Return exactly one numbered line per input line, in the same order, with no commentary. \
         Preserve the literal token \\N wherever it appears.",
        batch.source_language, batch.target_language
    );
    if !batch.glossary.is_empty() {
        system.push_str("\nUse these translations for specific terms:");
        for (source, target) in &batch.glossary {
            system.push_str(&format!("\n- {source} -> {target}"));
        }
    }
    if let Some(hints) = &batch.style_hints {
        system.push_str(&format!("\nStyle: {hints}"));
    }

    let user = batch
        .lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}", i + 1, line.replace('\n', "\\N")))
        .collect::<Vec<_>>()
        .join("\n");

    (system, user)
}

/// Parse a numbered response back into `expected` lines.
///
/// Unnumbered continuation lines are merged into the preceding entry; an
/// overshoot is truncated. Anything else is a count mismatch the caller
/// retries.
pub fn parse_numbered_response(
    text: &str,
    expected: usize,
) -> Result<Vec<String>, TranslateError> {
    let mut entries: Vec<String> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match split_numbered(line) {
            Some(content) => entries.push(content.to_string()),
            None => {
                // Continuation of the previous entry (model wrapped a line).
                if let Some(last) = entries.last_mut() {
                    last.push(' ');
                    last.push_str(line);
                }
                // A leading unnumbered line is dropped (preamble).
            }
        }
    }

    if entries.len() > expected {
        entries.truncate(expected);
    }
    if entries.len() != expected {
        return Err(TranslateError::LineCountMismatch {
            expected,
            actual: entries.len(),
        });
    }

    Ok(entries
        .into_iter()
        .map(|line| line.replace("\\N", "\n"))
        .collect())
}

/// Strip a `12. ` / `12) ` / `12: ` prefix.
fn split_numbered(line: &str) -> Option<&str> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let rest = &line[digits_end..];
    let rest = rest
        .strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .or_else(|| rest.strip_prefix(": "))
        .or_else(|| rest.strip_prefix('.'))
        .or_else(|| rest.strip_prefix(')'))?;
    Some(rest.trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(lines: &[&str]) -> BatchRequest {
        BatchRequest {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            source_language: "en".into(),
            target_language: "de".into(),
            glossary: Vec::new(),
            style_hints: None,
        }
    }

    #[test]
    fn test_prompt_numbers_lines() {
        let (_, user) = build_batch_prompt(&batch(&["Hello", "World"]));
        assert_eq!(user, "1. Hello\n2. World");
    }

    #[test]
    fn test_prompt_renders_break_sentinel() {
        let (system, user) = build_batch_prompt(&batch(&["first\nsecond"]));
        assert_eq!(user, "1. first\\Nsecond");
        assert!(system.contains("\\N"));
    }

    #[test]
    fn test_prompt_includes_glossary() {
        let mut b = batch(&["the Captain"]);
        b.glossary = vec![("Captain".into(), "Kapitän".into())];
        let (system, _) = build_batch_prompt(&b);
        assert!(system.contains("Captain -> Kapitän"));
    }

    #[test]
    fn test_parse_exact_response() {
        let lines = parse_numbered_response("1. Hallo\n2. Welt", 2).unwrap();
        assert_eq!(lines, vec!["Hallo", "Welt"]);
    }

    #[test]
    fn test_parse_alternative_numbering() {
        let lines = parse_numbered_response("1) Hallo\n2: Welt", 2).unwrap();
        assert_eq!(lines, vec!["Hallo", "Welt"]);
    }

    #[test]
    fn test_parse_merges_wrapped_lines() {
        let text = "1. Hallo\nzusammen\n2. Welt";
        let lines = parse_numbered_response(text, 2).unwrap();
        assert_eq!(lines, vec!["Hallo zusammen", "Welt"]);
    }

    #[test]
    fn test_parse_truncates_overshoot() {
        let text = "1. a\n2. b\n3. extra";
        let lines = parse_numbered_response(text, 2).unwrap();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_undershoot_is_mismatch() {
        let err = parse_numbered_response("1. only one", 3).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::LineCountMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_parse_restores_break_sentinel() {
        let lines = parse_numbered_response("1. erste\\Nzweite", 1).unwrap();
        assert_eq!(lines, vec!["erste\nzweite"]);
    }

    #[test]
    fn test_parse_drops_preamble() {
        let text = "Here are the translations:\n1. Hallo\n2. Welt";
        let lines = parse_numbered_response(text, 2).unwrap();
        assert_eq!(lines, vec!["Hallo", "Welt"]);
    }
}
