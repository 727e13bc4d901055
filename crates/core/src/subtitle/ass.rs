//! Advanced SubStation Alpha (.ass/.ssa) parsing and serialization.
//!
//! The parser is section-oriented. Only the columns the pipeline needs
//! (Start, End, Style, Text) are decoded; everything else is carried as
//! opaque values so a parse→serialize round trip preserves event count,
//! style names and column layout.

use super::types::{AssEvent, AssEventKind, AssStyle, SubtitleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    ScriptInfo,
    Styles,
    Events,
    Other,
}

/// A parsed SubStation file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssFile {
    /// Raw `[Script Info]` lines, kept verbatim.
    pub script_info: Vec<String>,
    /// Declared column names of the styles section `Format:` line.
    pub styles_format: Vec<String>,
    pub styles: Vec<AssStyle>,
    /// Declared column names of the events section `Format:` line.
    pub events_format: Vec<String>,
    pub events: Vec<AssEvent>,
}

impl AssFile {
    /// Parse ASS/SSA content. A UTF-8 BOM is tolerated.
    pub fn parse(content: &str) -> Result<Self, SubtitleError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut file = AssFile::default();
        let mut section = Section::None;

        for (line_no, raw) in content.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            let trimmed = line.trim();

            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = match trimmed.to_ascii_lowercase().as_str() {
                    "[script info]" => Section::ScriptInfo,
                    "[v4+ styles]" | "[v4 styles]" => Section::Styles,
                    "[events]" => Section::Events,
                    _ => Section::Other,
                };
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with(';') {
                if section == Section::ScriptInfo && trimmed.starts_with(';') {
                    file.script_info.push(line.to_string());
                }
                continue;
            }

            match section {
                Section::ScriptInfo => file.script_info.push(line.to_string()),
                Section::Styles => {
                    if let Some(rest) = strip_keyword(trimmed, "Format") {
                        file.styles_format = split_format(rest);
                    } else if let Some(rest) = strip_keyword(trimmed, "Style") {
                        file.styles
                            .push(parse_style(rest, &file.styles_format, line_no + 1)?);
                    }
                }
                Section::Events => {
                    if let Some(rest) = strip_keyword(trimmed, "Format") {
                        file.events_format = split_format(rest);
                    } else if let Some(rest) = strip_keyword(trimmed, "Dialogue") {
                        file.events.push(parse_event(
                            AssEventKind::Dialogue,
                            rest,
                            &file.events_format,
                            line_no + 1,
                        )?);
                    } else if let Some(rest) = strip_keyword(trimmed, "Comment") {
                        file.events.push(parse_event(
                            AssEventKind::Comment,
                            rest,
                            &file.events_format,
                            line_no + 1,
                        )?);
                    }
                }
                Section::None | Section::Other => {}
            }
        }

        if !file.events.is_empty() && file.events_format.is_empty() {
            return Err(SubtitleError::MissingSection("Events"));
        }
        Ok(file)
    }

    /// Serialize back to ASS text.
    pub fn serialize(&self) -> String {
        let mut out = String::from("[Script Info]\n");
        for line in &self.script_info {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');

        if !self.styles.is_empty() || !self.styles_format.is_empty() {
            out.push_str("[V4+ Styles]\n");
            out.push_str(&format!("Format: {}\n", self.styles_format.join(", ")));
            for style in &self.styles {
                let mut cols = vec![style.name.clone()];
                cols.extend(style.fields.iter().cloned());
                out.push_str(&format!("Style: {}\n", cols.join(",")));
            }
            out.push('\n');
        }

        out.push_str("[Events]\n");
        out.push_str(&format!("Format: {}\n", self.events_format.join(", ")));
        for event in &self.events {
            out.push_str(&self.serialize_event(event));
            out.push('\n');
        }
        out
    }

    fn serialize_event(&self, event: &AssEvent) -> String {
        let mut extra = event.extra.iter();
        let cols: Vec<String> = self
            .events_format
            .iter()
            .map(|field| match field.as_str() {
                "Start" => format_time(event.start_cs),
                "End" => format_time(event.end_cs),
                "Style" => event.style.clone(),
                "Text" => event.text.clone(),
                _ => extra
                    .next()
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default(),
            })
            .collect();
        format!("{}: {}", event.kind.keyword(), cols.join(","))
    }

    /// Names of all declared styles, in declaration order.
    pub fn style_names(&self) -> Vec<&str> {
        self.styles.iter().map(|s| s.name.as_str()).collect()
    }

    /// Dialogue events only (comments excluded).
    pub fn dialogue_events(&self) -> impl Iterator<Item = &AssEvent> {
        self.events
            .iter()
            .filter(|e| e.kind == AssEventKind::Dialogue)
    }
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_start())
}

fn split_format(rest: &str) -> Vec<String> {
    rest.split(',').map(|f| f.trim().to_string()).collect()
}

fn parse_style(
    rest: &str,
    format: &[String],
    line_no: usize,
) -> Result<AssStyle, SubtitleError> {
    if format.is_empty() {
        return Err(SubtitleError::Parse {
            line: line_no,
            reason: "Style line before Format declaration".to_string(),
        });
    }
    let cols: Vec<&str> = rest.splitn(format.len(), ',').collect();
    let name_idx = format.iter().position(|f| f == "Name").unwrap_or(0);
    let name = cols
        .get(name_idx)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| SubtitleError::Parse {
            line: line_no,
            reason: "Style line missing Name column".to_string(),
        })?;
    let fields = cols
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != name_idx)
        .map(|(_, v)| v.to_string())
        .collect();
    Ok(AssStyle { name, fields })
}

fn parse_event(
    kind: AssEventKind,
    rest: &str,
    format: &[String],
    line_no: usize,
) -> Result<AssEvent, SubtitleError> {
    if format.is_empty() {
        return Err(SubtitleError::Parse {
            line: line_no,
            reason: "event line before Format declaration".to_string(),
        });
    }
    let cols: Vec<&str> = rest.splitn(format.len(), ',').collect();
    if cols.len() != format.len() {
        return Err(SubtitleError::Parse {
            line: line_no,
            reason: format!(
                "expected {} event columns, found {}",
                format.len(),
                cols.len()
            ),
        });
    }

    let mut start_cs = 0;
    let mut end_cs = 0;
    let mut style = String::new();
    let mut text = String::new();
    let mut extra = Vec::new();

    for (field, value) in format.iter().zip(cols.iter()) {
        match field.as_str() {
            "Start" => {
                start_cs = parse_time(value.trim())
                    .ok_or_else(|| SubtitleError::InvalidTimestamp(value.trim().to_string()))?
            }
            "End" => {
                end_cs = parse_time(value.trim())
                    .ok_or_else(|| SubtitleError::InvalidTimestamp(value.trim().to_string()))?
            }
            "Style" => style = value.trim().to_string(),
            "Text" => text = value.to_string(),
            _ => extra.push((field.clone(), value.to_string())),
        }
    }

    Ok(AssEvent {
        kind,
        start_cs,
        end_cs,
        style,
        text,
        extra,
    })
}

/// Parse `H:MM:SS.CC` to centiseconds.
fn parse_time(ts: &str) -> Option<u64> {
    let mut parts = ts.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let sec_cs = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let (secs, cs) = match sec_cs.split_once('.') {
        Some((s, c)) => (s.parse::<u64>().ok()?, c.parse::<u64>().ok()?),
        None => (sec_cs.parse::<u64>().ok()?, 0),
    };
    Some(((hours * 60 + minutes) * 60 + secs) * 100 + cs)
}

fn format_time(cs: u64) -> String {
    let hours = cs / 360_000;
    let minutes = (cs % 360_000) / 6000;
    let seconds = (cs % 6000) / 100;
    let centis = cs % 100;
    format!("{hours}:{minutes:02}:{seconds:02}.{centis:02}")
}
