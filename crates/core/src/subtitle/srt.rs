//! SubRip (.srt) parsing and serialization.
//!
//! The parser is a line-oriented state machine: index line, timestamp line,
//! then text lines until a blank line. Malformed blocks fail with the line
//! number so operators can locate the defect.

use super::types::{SrtCue, SubtitleError};

/// States of the block parser.
enum State {
    /// Expecting an index line (or trailing blank lines).
    Index,
    /// Expecting a `HH:MM:SS,mmm --> HH:MM:SS,mmm` line.
    Timing { index: u32 },
    /// Collecting text lines until a blank line.
    Text {
        index: u32,
        start_ms: u64,
        end_ms: u64,
        lines: Vec<String>,
    },
}

/// A parsed SubRip file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrtFile {
    pub cues: Vec<SrtCue>,
}

impl SrtFile {
    /// Parse SRT content. A UTF-8 BOM is tolerated.
    pub fn parse(content: &str) -> Result<Self, SubtitleError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut cues = Vec::new();
        let mut state = State::Index;

        for (line_no, raw) in content.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            state = match state {
                State::Index => {
                    if line.trim().is_empty() {
                        State::Index
                    } else {
                        let index =
                            line.trim()
                                .parse::<u32>()
                                .map_err(|_| SubtitleError::Parse {
                                    line: line_no + 1,
                                    reason: format!("expected cue index, found '{line}'"),
                                })?;
                        State::Timing { index }
                    }
                }
                State::Timing { index } => {
                    let (start_ms, end_ms) = parse_timing_line(line).ok_or_else(|| {
                        SubtitleError::Parse {
                            line: line_no + 1,
                            reason: format!("expected timestamp line, found '{line}'"),
                        }
                    })?;
                    State::Text {
                        index,
                        start_ms,
                        end_ms,
                        lines: Vec::new(),
                    }
                }
                State::Text {
                    index,
                    start_ms,
                    end_ms,
                    mut lines,
                } => {
                    if line.trim().is_empty() {
                        cues.push(SrtCue {
                            index,
                            start_ms,
                            end_ms,
                            text: lines.join("\n"),
                        });
                        State::Index
                    } else {
                        lines.push(line.to_string());
                        State::Text {
                            index,
                            start_ms,
                            end_ms,
                            lines,
                        }
                    }
                }
            };
        }

        // Flush a final block without a trailing blank line.
        if let State::Text {
            index,
            start_ms,
            end_ms,
            lines,
        } = state
        {
            cues.push(SrtCue {
                index,
                start_ms,
                end_ms,
                text: lines.join("\n"),
            });
        }

        Ok(Self { cues })
    }

    /// Serialize back to SRT text. Cues are renumbered sequentially.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (i, cue) in self.cues.iter().enumerate() {
            out.push_str(&format!("{}\n", i + 1));
            out.push_str(&format!(
                "{} --> {}\n",
                format_timestamp(cue.start_ms),
                format_timestamp(cue.end_ms)
            ));
            out.push_str(&cue.text);
            out.push_str("\n\n");
        }
        out
    }
}

/// Parse `HH:MM:SS,mmm --> HH:MM:SS,mmm`; a `.` millisecond separator is
/// tolerated since some tools emit it.
fn parse_timing_line(line: &str) -> Option<(u64, u64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end.trim())?))
}

fn parse_timestamp(ts: &str) -> Option<u64> {
    let mut parts = ts.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.trim().parse().ok()?;
    let sec_ms = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }
    let (secs, millis) = match sec_ms.split_once([',', '.']) {
        Some((s, m)) => (s.parse::<u64>().ok()?, m.parse::<u64>().ok()?),
        None => (sec_ms.parse::<u64>().ok()?, 0),
    };
    if minutes > 59 || secs > 59 || millis > 999 {
        return None;
    }
    Some(((hours * 60 + minutes) * 60 + secs) * 1000 + millis)
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}
