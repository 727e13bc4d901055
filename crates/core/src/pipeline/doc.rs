//! Whole-document translation.
//!
//! Drives the translation engine over a parsed subtitle file: ASS dialog
//! lines are stripped of override tags, translated in order, and re-tagged;
//! signs/songs events pass through verbatim. The event/cue count never
//! changes.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::subtitle::{
    classify_styles, extract_tags, restore_tags, AssFile, SrtFile, StyleClass,
};
use crate::translate::{Glossary, TranslationEngine, TranslationRequest};

use super::types::PipelineError;

/// Translate an ASS document. Returns the serialized target-language file
/// and the number of translated lines.
pub async fn translate_ass(
    engine: &TranslationEngine,
    content: &str,
    source_language: &str,
    target_language: &str,
    glossary: Option<Glossary>,
    series_id: Option<i64>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(String, usize, String), PipelineError> {
    let mut file = AssFile::parse(content)?;
    let classes = classify_styles(&file);

    // Collect dialog events in document order; signs/songs stay untouched.
    let mut dialog_indices = Vec::new();
    let mut plain_lines = Vec::new();
    let mut tag_spans = Vec::new();
    for (i, event) in file.events.iter().enumerate() {
        if event.kind != crate::subtitle::AssEventKind::Dialogue {
            continue;
        }
        if classes.get(&event.style) == Some(&StyleClass::SignsSongs) {
            continue;
        }
        let (plain, spans) = extract_tags(&event.text);
        dialog_indices.push(i);
        plain_lines.push(plain);
        tag_spans.push(spans);
    }

    if plain_lines.is_empty() {
        return Ok((file.serialize(), 0, "none".to_string()));
    }

    let mut request =
        TranslationRequest::new(plain_lines.clone(), source_language, target_language);
    request.glossary = glossary;
    request.series_id = series_id;
    request.cancel = cancel;
    let result = engine.translate(&request).await?;

    for ((index, translated), (plain, spans)) in dialog_indices
        .iter()
        .zip(result.translated_lines.iter())
        .zip(plain_lines.iter().zip(tag_spans.iter()))
    {
        file.events[*index].text = restore_tags(translated, spans, plain.chars().count());
    }

    let translated_count = result.translated_lines.len();
    Ok((file.serialize(), translated_count, result.backend_used))
}

/// Translate an SRT document.
pub async fn translate_srt(
    engine: &TranslationEngine,
    content: &str,
    source_language: &str,
    target_language: &str,
    glossary: Option<Glossary>,
    series_id: Option<i64>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(String, usize, String), PipelineError> {
    let mut file = SrtFile::parse(content)?;
    if file.cues.is_empty() {
        return Ok((file.serialize(), 0, "none".to_string()));
    }

    let lines: Vec<String> = file.cues.iter().map(|c| c.text.clone()).collect();
    let count = lines.len();
    let mut request = TranslationRequest::new(lines, source_language, target_language);
    request.glossary = glossary;
    request.series_id = series_id;
    request.cancel = cancel;
    let result = engine.translate(&request).await?;

    for (cue, translated) in file.cues.iter_mut().zip(result.translated_lines.into_iter()) {
        cue.text = translated;
    }
    Ok((file.serialize(), count, result.backend_used))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::store::{Db, SqliteHealthStore};
    use crate::translate::{
        BatchRequest, TranslateError, TranslationBackend, TranslationEngineConfig,
    };

    /// Backend that prefixes every line, preserving embedded breaks.
    struct PrefixBackend;

    #[async_trait]
    impl TranslationBackend for PrefixBackend {
        fn name(&self) -> &'static str {
            "prefix"
        }

        fn supports_batch(&self) -> bool {
            true
        }

        fn max_batch_size(&self) -> usize {
            15
        }

        async fn translate_batch(
            &self,
            batch: &BatchRequest,
        ) -> Result<Vec<String>, TranslateError> {
            Ok(batch.lines.iter().map(|l| format!("DE {l}")).collect())
        }

        async fn health_check(&self) -> Result<(), TranslateError> {
            Ok(())
        }
    }

    fn engine() -> TranslationEngine {
        TranslationEngine::new(
            TranslationEngineConfig::default(),
            vec![Arc::new(PrefixBackend)],
            Arc::new(SqliteHealthStore::new(Db::in_memory().unwrap())),
        )
    }

    const ASS: &str = "[Script Info]\nTitle: T\n\n[V4+ Styles]\nFormat: Name, Fontname\nStyle: Default,Arial\nStyle: Signs,Arial\n\n[Events]\nFormat: Layer, Start, End, Style, Text\nDialogue: 0,0:00:01.00,0:00:02.00,Default,{\\i1}Hello{\\i0} there\nDialogue: 0,0:00:03.00,0:00:04.00,Signs,{\\pos(1,2)}STATION\nDialogue: 0,0:00:05.00,0:00:06.00,Default,Second line\n";

    #[tokio::test]
    async fn test_ass_event_count_preserved() {
        let engine = engine();
        let (out, translated, backend) =
            translate_ass(&engine, ASS, "en", "de", None, None, None)
                .await
                .unwrap();
        let parsed = AssFile::parse(&out).unwrap();
        assert_eq!(parsed.events.len(), 3);
        assert_eq!(translated, 2);
        assert_eq!(backend, "prefix");
    }

    #[tokio::test]
    async fn test_signs_copied_verbatim() {
        let engine = engine();
        let (out, _, _) = translate_ass(&engine, ASS, "en", "de", None, None, None)
            .await
            .unwrap();
        let parsed = AssFile::parse(&out).unwrap();
        assert_eq!(parsed.events[1].text, "{\\pos(1,2)}STATION");
    }

    #[tokio::test]
    async fn test_dialog_tags_restored() {
        let engine = engine();
        let (out, _, _) = translate_ass(&engine, ASS, "en", "de", None, None, None)
            .await
            .unwrap();
        let parsed = AssFile::parse(&out).unwrap();
        let first = &parsed.events[0].text;
        assert!(first.contains("{\\i1}"), "lost italics open: {first}");
        assert!(first.contains("{\\i0}"), "lost italics close: {first}");
        assert!(first.contains("DE "));
    }

    #[tokio::test]
    async fn test_empty_ass_translates_zero_lines() {
        let engine = engine();
        let empty = "[Events]\nFormat: Layer, Start, End, Style, Text\n";
        let (_, translated, backend) =
            translate_ass(&engine, empty, "en", "de", None, None, None)
                .await
                .unwrap();
        assert_eq!(translated, 0);
        assert_eq!(backend, "none");
    }

    #[tokio::test]
    async fn test_srt_cue_count_preserved() {
        let engine = engine();
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nWorld\nagain\n\n";
        let (out, translated, _) = translate_srt(&engine, srt, "en", "de", None, None, None)
            .await
            .unwrap();
        let parsed = SrtFile::parse(&out).unwrap();
        assert_eq!(parsed.cues.len(), 2);
        assert_eq!(translated, 2);
        assert!(parsed.cues[0].text.starts_with("DE "));
        // The multi-line cue keeps its break.
        assert!(parsed.cues[1].text.contains('\n'));
    }

    #[tokio::test]
    async fn test_empty_srt_succeeds() {
        let engine = engine();
        let (_, translated, _) = translate_srt(&engine, "", "en", "de", None, None, None)
            .await
            .unwrap();
        assert_eq!(translated, 0);
    }
}
