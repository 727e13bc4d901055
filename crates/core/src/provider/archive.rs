//! Provider download payload handling.
//!
//! Providers may hand back a bare subtitle file, a gzip stream, or a zip
//! archive. This module selects the single subtitle entry, enforces a
//! decompressed size cap against decompression bombs, and sanity-checks the
//! result actually looks like a subtitle.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::subtitle::SubtitleFormat;

use super::types::ProviderError;

const SUBTITLE_EXTENSIONS: [&str; 4] = ["ass", "srt", "ssa", "vtt"];

/// Extract the subtitle body from a raw download.
///
/// `filename_hint` helps format detection for bare payloads. `max_bytes`
/// caps the decompressed size.
pub fn extract_subtitle_payload(
    provider: &str,
    data: &[u8],
    filename_hint: Option<&str>,
    max_bytes: u64,
) -> Result<(Vec<u8>, SubtitleFormat), ProviderError> {
    if data.len() as u64 > max_bytes {
        return Err(ProviderError::ArchiveSuspicious(format!(
            "payload of {} bytes exceeds the {} byte cap",
            data.len(),
            max_bytes
        )));
    }

    if data.starts_with(b"PK\x03\x04") {
        return extract_from_zip(provider, data, max_bytes);
    }
    if data.starts_with(&[0x1f, 0x8b]) {
        let body = read_capped(GzDecoder::new(data), max_bytes)?;
        let format = detect_format(&body, filename_hint);
        return validate(provider, body, format);
    }
    if data.starts_with(b"Rar!") || data.starts_with(&[0xfd, b'7', b'z', b'X', b'Z']) {
        // No safe in-process extractor for these; treat as unusable rather
        // than shelling out.
        return Err(ProviderError::Format {
            provider: provider.to_string(),
            message: "rar/xz archives are not supported".to_string(),
        });
    }

    let format = detect_format(data, filename_hint);
    validate(provider, data.to_vec(), format)
}

fn extract_from_zip(
    provider: &str,
    data: &[u8],
    max_bytes: u64,
) -> Result<(Vec<u8>, SubtitleFormat), ProviderError> {
    let reader = std::io::Cursor::new(data);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| ProviderError::Format {
        provider: provider.to_string(),
        message: format!("broken zip archive: {e}"),
    })?;

    let mut subtitle_entries: Vec<(usize, String, SubtitleFormat)> = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| ProviderError::Format {
            provider: provider.to_string(),
            message: format!("unreadable zip entry: {e}"),
        })?;
        let name = entry.name().to_string();
        if let Some(ext) = name.rsplit('.').next() {
            if SUBTITLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                let format = SubtitleFormat::from_extension(ext);
                subtitle_entries.push((i, name, format));
            }
        }
    }

    let (index, _, format) = match subtitle_entries.len() {
        0 => {
            return Err(ProviderError::ArchiveSuspicious(
                "archive contains no subtitle file".to_string(),
            ))
        }
        1 => subtitle_entries.remove(0),
        n => {
            return Err(ProviderError::ArchiveSuspicious(format!(
                "archive contains {n} subtitle files, cannot pick one"
            )))
        }
    };

    let entry = archive.by_index(index).map_err(|e| ProviderError::Format {
        provider: provider.to_string(),
        message: format!("unreadable zip entry: {e}"),
    })?;
    let body = read_capped(entry, max_bytes)?;
    validate(provider, body, format)
}

/// Read at most `max_bytes`; one extra byte proves an overrun.
fn read_capped(reader: impl Read, max_bytes: u64) -> Result<Vec<u8>, ProviderError> {
    let mut body = Vec::new();
    let mut limited = reader.take(max_bytes + 1);
    limited
        .read_to_end(&mut body)
        .map_err(|e| ProviderError::ArchiveSuspicious(format!("decompression failed: {e}")))?;
    if body.len() as u64 > max_bytes {
        return Err(ProviderError::ArchiveSuspicious(format!(
            "decompressed payload exceeds the {max_bytes} byte cap"
        )));
    }
    Ok(body)
}

fn detect_format(body: &[u8], filename_hint: Option<&str>) -> SubtitleFormat {
    if let Some(hint) = filename_hint {
        if let Some(ext) = hint.rsplit('.').next() {
            let format = SubtitleFormat::from_extension(ext);
            if format != SubtitleFormat::Unknown {
                return format;
            }
        }
    }
    let text = String::from_utf8_lossy(&body[..body.len().min(4096)]);
    if text.contains("[Script Info]") || text.contains("Dialogue:") {
        SubtitleFormat::Ass
    } else if text.starts_with("WEBVTT") {
        SubtitleFormat::Vtt
    } else if text.contains("-->") {
        SubtitleFormat::Srt
    } else {
        SubtitleFormat::Unknown
    }
}

fn validate(
    provider: &str,
    body: Vec<u8>,
    format: SubtitleFormat,
) -> Result<(Vec<u8>, SubtitleFormat), ProviderError> {
    if format == SubtitleFormat::Unknown || !looks_like_subtitle(&body) {
        return Err(ProviderError::Format {
            provider: provider.to_string(),
            message: "payload does not look like a subtitle file".to_string(),
        });
    }
    Ok((body, format))
}

fn looks_like_subtitle(body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    let text = String::from_utf8_lossy(&body[..body.len().min(4096)]);
    text.contains("-->")
        || text.contains("[Script Info]")
        || text.contains("Dialogue:")
        || text.starts_with("WEBVTT")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use zip::write::SimpleFileOptions;

    use super::*;

    const SRT_BODY: &[u8] = b"1\n00:00:01,000 --> 00:00:02,000\nHello\n\n";
    const ASS_BODY: &[u8] =
        b"[Script Info]\n\n[Events]\nFormat: Layer, Start, End, Style, Text\nDialogue: 0,0:00:01.00,0:00:02.00,Default,Hi\n";
    const CAP: u64 = 10 * 1024 * 1024;

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(body).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_bare_srt_passthrough() {
        let (body, format) =
            extract_subtitle_payload("p", SRT_BODY, Some("episode.srt"), CAP).unwrap();
        assert_eq!(body, SRT_BODY);
        assert_eq!(format, SubtitleFormat::Srt);
    }

    #[test]
    fn test_bare_ass_detected_without_hint() {
        let (_, format) = extract_subtitle_payload("p", ASS_BODY, None, CAP).unwrap();
        assert_eq!(format, SubtitleFormat::Ass);
    }

    #[test]
    fn test_gzip_payload() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SRT_BODY).unwrap();
        let gz = encoder.finish().unwrap();

        let (body, format) = extract_subtitle_payload("p", &gz, Some("a.srt"), CAP).unwrap();
        assert_eq!(body, SRT_BODY);
        assert_eq!(format, SubtitleFormat::Srt);
    }

    #[test]
    fn test_zip_single_subtitle() {
        let zip = zip_with(&[("sub.ass", ASS_BODY), ("readme.txt", b"hi")]);
        let (body, format) = extract_subtitle_payload("p", &zip, None, CAP).unwrap();
        assert_eq!(body, ASS_BODY);
        assert_eq!(format, SubtitleFormat::Ass);
    }

    #[test]
    fn test_zip_multiple_subtitles_rejected() {
        let zip = zip_with(&[("a.srt", SRT_BODY), ("b.srt", SRT_BODY)]);
        let err = extract_subtitle_payload("p", &zip, None, CAP).unwrap_err();
        assert!(matches!(err, ProviderError::ArchiveSuspicious(_)));
    }

    #[test]
    fn test_zip_without_subtitle_rejected() {
        let zip = zip_with(&[("readme.txt", b"nope")]);
        let err = extract_subtitle_payload("p", &zip, None, CAP).unwrap_err();
        assert!(matches!(err, ProviderError::ArchiveSuspicious(_)));
    }

    #[test]
    fn test_size_cap_enforced_on_decompression() {
        let big = vec![b'a'; 4096];
        let mut srt = SRT_BODY.to_vec();
        srt.extend_from_slice(&big);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&srt).unwrap();
        let gz = encoder.finish().unwrap();

        let err = extract_subtitle_payload("p", &gz, Some("a.srt"), 100).unwrap_err();
        assert!(matches!(err, ProviderError::ArchiveSuspicious(_)));
    }

    #[test]
    fn test_rar_rejected() {
        let err = extract_subtitle_payload("p", b"Rar!\x1a\x07\x00junk", None, CAP).unwrap_err();
        assert!(matches!(err, ProviderError::Format { .. }));
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let err =
            extract_subtitle_payload("p", &[0u8, 1, 2, 3, 4, 5], Some("a.srt"), CAP).unwrap_err();
        assert!(matches!(err, ProviderError::Format { .. }));
    }
}
