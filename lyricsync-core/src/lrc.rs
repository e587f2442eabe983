//! LRC document parsing.
//!
//! Accepts plain LRC, enhanced LRC (word tags are stripped from the text) and
//! sectioned documents where `-*- type:<kind> -*-` headers separate the
//! original lyrics from romanized or translated variants.

use crate::timeline::TranslationKind;

/// Parsed LRC file containing metadata and synchronized lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LrcFile {
    pub metadata: LrcMetadata,
    /// Primary lines, sorted by start time with unique start times
    pub lines: Vec<LrcLine>,
    /// Secondary sections, each sorted the same way as `lines`
    pub translations: Vec<LrcTranslation>,
}

/// LRC metadata from ID tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LrcMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub author: Option<String>,
    pub length_ms: Option<u64>,
    /// Milliseconds added to every timestamp, can be negative
    pub offset_ms: i64,
}

/// A single line of lyrics with timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrcLine {
    pub start_ms: u64,
    pub text: String,
}

/// A romanized or translated section of a sectioned document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrcTranslation {
    pub kind: TranslationKind,
    pub lines: Vec<LrcLine>,
}

/// Lines as read from one section, before offset and ordering are applied
#[derive(Default)]
struct RawSection {
    kind: Option<TranslationKind>,
    lines: Vec<(i64, String)>,
}

impl LrcFile {
    /// Parse an LRC string.
    ///
    /// Parsing never fails: unparseable lines are skipped and an input with no
    /// timed lines yields an empty file.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let mut metadata = LrcMetadata::default();
        let mut sections = vec![RawSection::default()];

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(header) = parse_section_header(line) {
                sections.push(RawSection {
                    kind: match header {
                        SectionHeader::Primary => None,
                        SectionHeader::Secondary(kind) => Some(kind),
                    },
                    lines: Vec::new(),
                });
                continue;
            }

            if let Some((tag, value)) = parse_id_tag(line) {
                match tag.to_lowercase().as_str() {
                    "ti" => metadata.title = Some(value),
                    "ar" => metadata.artist = Some(value),
                    "al" => metadata.album = Some(value),
                    "au" => metadata.author = Some(value),
                    "length" => metadata.length_ms = parse_timestamp(&value),
                    "offset" => {
                        if let Ok(offset) = value.trim_start_matches('+').parse::<i64>() {
                            metadata.offset_ms = offset;
                        }
                    }
                    _ => {} // Ignore unknown tags
                }
                continue;
            }

            if let Some((timestamps, text)) = parse_lyric_line(line) {
                if let Some(section) = sections.last_mut() {
                    for start in timestamps {
                        section.lines.push((start, text.clone()));
                    }
                }
            }
        }

        let offset = metadata.offset_ms;
        let mut lines = Vec::new();
        let mut translations: Vec<LrcTranslation> = Vec::new();

        for section in sections {
            let finalized = finalize_lines(section.lines, offset);
            match section.kind {
                None => {
                    // A document may open with a primary header or with no header
                    // at all; both land here.
                    if lines.is_empty() {
                        lines = finalized;
                    } else {
                        lines.extend(finalized);
                        lines = finalize_sorted(lines);
                    }
                }
                Some(kind) if !finalized.is_empty() => {
                    if let Some(existing) = translations.iter_mut().find(|t| t.kind == kind) {
                        existing.lines.extend(finalized);
                        existing.lines = finalize_sorted(std::mem::take(&mut existing.lines));
                    } else {
                        translations.push(LrcTranslation {
                            kind,
                            lines: finalized,
                        });
                    }
                }
                Some(_) => {}
            }
        }

        Self {
            metadata,
            lines,
            translations,
        }
    }

    /// Decode raw bytes (UTF-8, optional BOM, invalid sequences replaced) and parse
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// Whether the file has no timed primary lines
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Secondary section of the given kind, if present
    #[must_use]
    pub fn translation(&self, kind: &TranslationKind) -> Option<&LrcTranslation> {
        self.translations.iter().find(|t| &t.kind == kind)
    }
}

/// Apply the offset, sort, and collapse duplicate start times
fn finalize_lines(raw: Vec<(i64, String)>, offset_ms: i64) -> Vec<LrcLine> {
    let lines = raw
        .into_iter()
        .map(|(start, text)| LrcLine {
            start_ms: u64::try_from(start.saturating_add(offset_ms)).unwrap_or(0),
            text,
        })
        .collect();
    finalize_sorted(lines)
}

/// Stable sort by start time; for equal start times the entry that came later
/// in the file wins.
fn finalize_sorted(mut lines: Vec<LrcLine>) -> Vec<LrcLine> {
    lines.sort_by_key(|l| l.start_ms);
    let mut out: Vec<LrcLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match out.last_mut() {
            Some(last) if last.start_ms == line.start_ms => *last = line,
            _ => out.push(line),
        }
    }
    out
}

enum SectionHeader {
    Primary,
    Secondary(TranslationKind),
}

/// Parse a section header like `-*- type:romaji -*-`
fn parse_section_header(line: &str) -> Option<SectionHeader> {
    let inner = line.strip_prefix("-*-")?.strip_suffix("-*-")?.trim();
    let kind = inner.strip_prefix("type:")?.trim().to_lowercase();
    Some(match kind.as_str() {
        "" | "non" | "none" | "original" => SectionHeader::Primary,
        "romaji" => SectionHeader::Secondary(TranslationKind::Romaji),
        "chinese" => SectionHeader::Secondary(TranslationKind::Language("zh".into())),
        other => SectionHeader::Secondary(TranslationKind::Language(other.to_string())),
    })
}

/// Parse an ID tag like [ti:Title] or [ar:Artist]
fn parse_id_tag(line: &str) -> Option<(String, String)> {
    if !line.starts_with('[') || !line.contains(':') {
        return None;
    }

    let end = line.find(']')?;
    let content = &line[1..end];

    let first_colon = content.find(':')?;
    let tag = &content[..first_colon];

    // If the tag part looks like a number, it's a timestamp, not an ID tag
    if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let value = content[first_colon + 1..].trim().to_string();
    Some((tag.to_string(), value))
}

/// Parse a lyric line like `[00:12.34]Hello` or `[00:12.34][00:15.67]Same lyrics`
fn parse_lyric_line(line: &str) -> Option<(Vec<i64>, String)> {
    let mut remaining = line;
    let mut timestamps = Vec::new();

    while remaining.starts_with('[') {
        let Some(end) = remaining.find(']') else {
            break;
        };
        let Some(time) = parse_timestamp(&remaining[1..end]) else {
            break;
        };
        timestamps.push(i64::try_from(time).unwrap_or(i64::MAX));
        remaining = &remaining[end + 1..];
    }

    if timestamps.is_empty() {
        return None;
    }

    Some((timestamps, strip_word_timings(remaining.trim())))
}

/// Parse a timestamp like `mm:ss`, `mm:ss.x`, `mm:ss.xx`, `mm:ss.xxx` or
/// `mm:ss:xx` into milliseconds.
///
/// The fraction is scaled by its digit count: one digit is tenths, two are
/// hundredths, three are milliseconds. Digits past the third are dropped,
/// so `00:01.5009` is 1500ms.
fn parse_timestamp(s: &str) -> Option<u64> {
    let s = s.trim();
    let mut parts = s.split(':');
    let minutes = parse_digits(parts.next()?)?;
    let second_part = parts.next()?;
    let third_part = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let (seconds, fraction) = match third_part {
        Some(fraction) => (parse_digits(second_part)?, fraction),
        None => match second_part.split_once('.') {
            Some((secs, fraction)) => (parse_digits(secs)?, fraction),
            None => (parse_digits(second_part)?, ""),
        },
    };

    let millis = fraction_ms(fraction)?;
    minutes
        .checked_mul(60_000)?
        .checked_add(seconds.checked_mul(1000)?)?
        .checked_add(millis)
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn fraction_ms(fraction: &str) -> Option<u64> {
    if fraction.is_empty() {
        return Some(0);
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits = &fraction[..fraction.len().min(3)];
    let value: u64 = digits.parse().ok()?;
    Some(match digits.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    })
}

/// Remove enhanced LRC word tags (`<mm:ss.xx>`) from a line's text
fn strip_word_timings(text: &str) -> String {
    if !text.contains('<') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut remaining = text;
    let mut stripped = false;

    while let Some(open) = remaining.find('<') {
        out.push_str(&remaining[..open]);
        let after = &remaining[open..];
        match after.find('>') {
            Some(close) if parse_timestamp(&after[1..close]).is_some() => {
                out.push(' ');
                stripped = true;
                remaining = &after[close + 1..];
            }
            _ => {
                out.push('<');
                remaining = &after[1..];
            }
        }
    }
    out.push_str(remaining);

    if stripped {
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        out
    }
}
