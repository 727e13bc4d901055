//! Inline override-tag extraction and restoration.
//!
//! Translation backends only ever see plain text. `{\...}` override runs are
//! lifted out with their character offset recorded, and `\N` hard breaks are
//! carried through as `\n`. After translation the tags are re-inserted at
//! proportionally equivalent positions.

/// One extracted override run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpan {
    /// The full tag text, including braces, e.g. `{\i1}`.
    pub tag: String,
    /// Character offset into the plain text where the tag sat.
    pub offset: usize,
}

/// Strip override runs from an event text.
///
/// Returns the plain text (with `\N` rendered as `\n`) and the ordered list
/// of extracted spans. An unmatched `{` is treated as literal text.
pub fn extract_tags(text: &str) -> (String, Vec<TagSpan>) {
    let mut plain = String::new();
    let mut plain_len = 0usize;
    let mut spans = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' => {
                if let Some(close) = chars[i..].iter().position(|&c| c == '}') {
                    let tag: String = chars[i..=i + close].iter().collect();
                    spans.push(TagSpan {
                        tag,
                        offset: plain_len,
                    });
                    i += close + 1;
                } else {
                    plain.push('{');
                    plain_len += 1;
                    i += 1;
                }
            }
            '\\' if chars.get(i + 1) == Some(&'N') => {
                plain.push('\n');
                plain_len += 1;
                i += 2;
            }
            c => {
                plain.push(c);
                plain_len += 1;
                i += 1;
            }
        }
    }

    (plain, spans)
}

/// Re-insert extracted spans into a translated line.
///
/// `original_len` is the character length of the plain text the spans were
/// extracted from. When the translated text has the same length, offsets map
/// one to one; otherwise each offset is scaled proportionally and snapped to
/// the nearest word boundary within 3 characters. An offset-0 span is always
/// pinned to the start. `\n` characters are rendered back as `\N`.
pub fn restore_tags(translated: &str, spans: &[TagSpan], original_len: usize) -> String {
    let chars: Vec<char> = translated.chars().collect();
    let target_len = chars.len();

    let mut placements: Vec<(usize, &str)> = spans
        .iter()
        .map(|span| {
            let pos = if span.offset == 0 {
                0
            } else if target_len == original_len || original_len == 0 {
                span.offset.min(target_len)
            } else {
                let scaled = ((span.offset as f64 / original_len as f64) * target_len as f64)
                    .round() as usize;
                snap_to_boundary(&chars, scaled.min(target_len))
            };
            (pos, span.tag.as_str())
        })
        .collect();

    // Insert back to front so earlier offsets stay valid; equal offsets keep
    // their extraction order.
    placements.sort_by_key(|(pos, _)| *pos);
    let mut out: Vec<String> = chars.iter().map(|c| c.to_string()).collect();
    for (pos, tag) in placements.into_iter().rev() {
        out.insert(pos, tag.to_string());
    }

    out.concat().replace('\n', "\\N")
}

/// Move `pos` to the nearest word boundary at most 3 characters away; if no
/// boundary is that close, keep the scaled position.
fn snap_to_boundary(chars: &[char], pos: usize) -> usize {
    if is_boundary(chars, pos) {
        return pos;
    }
    for delta in 1..=3usize {
        if pos >= delta && is_boundary(chars, pos - delta) {
            return pos - delta;
        }
        if pos + delta <= chars.len() && is_boundary(chars, pos + delta) {
            return pos + delta;
        }
    }
    pos
}

fn is_boundary(chars: &[char], pos: usize) -> bool {
    if pos == 0 || pos == chars.len() {
        return true;
    }
    chars[pos - 1].is_whitespace() || chars[pos].is_whitespace()
}
