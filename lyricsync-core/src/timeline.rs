//! The normalized lyric timeline handed from resolution to the sync engine.

use crate::align::align_translation;
use crate::lrc::{LrcFile, LrcLine};
use crate::playback::TrackIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display window for the last line when neither the track nor the document
/// says how long the song is
const DEFAULT_LAST_LINE_MS: u64 = 5_000;

/// One timed lyric line. `end_ms` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricLine {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
}

/// A line of a secondary (romanized or translated) line set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedText {
    pub start_ms: u64,
    pub text: String,
}

impl From<&LrcLine> for TimedText {
    fn from(line: &LrcLine) -> Self {
        Self {
            start_ms: line.start_ms,
            text: line.text.clone(),
        }
    }
}

/// A secondary line set attached to a timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationTrack {
    pub kind: TranslationKind,
    pub lines: Vec<TimedText>,
}

/// Where a timeline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineSource {
    Cached,
    Fetched,
    /// No lyrics exist (or none could be obtained)
    None,
}

impl TimelineSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fetched => "fetched",
            Self::None => "none",
        }
    }
}

impl fmt::Display for TimelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a secondary line set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TranslationKind {
    Romaji,
    /// Translation into a language, identified by a lowercase tag (e.g. "zh")
    Language(String),
}

impl From<String> for TranslationKind {
    fn from(value: String) -> Self {
        let value = value.trim().to_lowercase();
        if value == "romaji" {
            Self::Romaji
        } else {
            Self::Language(value)
        }
    }
}

impl From<TranslationKind> for String {
    fn from(kind: TranslationKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for TranslationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Romaji => f.write_str("romaji"),
            Self::Language(tag) => f.write_str(tag),
        }
    }
}

/// Which secondary line set (if any) is shown next to the primary text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TranslationMode {
    #[default]
    None,
    Romaji,
    Language(String),
}

impl TranslationMode {
    /// The line set this mode selects
    #[must_use]
    pub fn kind(&self) -> Option<TranslationKind> {
        match self {
            Self::None => None,
            Self::Romaji => Some(TranslationKind::Romaji),
            Self::Language(tag) => Some(TranslationKind::Language(tag.clone())),
        }
    }
}

impl From<TranslationKind> for TranslationMode {
    fn from(kind: TranslationKind) -> Self {
        match kind {
            TranslationKind::Romaji => Self::Romaji,
            TranslationKind::Language(tag) => Self::Language(tag),
        }
    }
}

impl From<String> for TranslationMode {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            Self::None
        } else {
            TranslationKind::from(trimmed.to_string()).into()
        }
    }
}

impl From<TranslationMode> for String {
    fn from(mode: TranslationMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for TranslationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Romaji => f.write_str("romaji"),
            Self::Language(tag) => f.write_str(tag),
        }
    }
}

/// Ordered lyric lines for one track.
///
/// Start times are unique and strictly increasing. The engine only ever reads
/// a timeline; changes produce a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricTimeline {
    pub track: TrackIdentity,
    pub lines: Vec<LyricLine>,
    pub source: TimelineSource,
    #[serde(default)]
    pub translations: Vec<TranslationTrack>,
}

impl LyricTimeline {
    /// A timeline with no lines, for tracks without lyrics
    #[must_use]
    pub const fn empty(track: TrackIdentity) -> Self {
        Self {
            track,
            lines: Vec::new(),
            source: TimelineSource::None,
            translations: Vec::new(),
        }
    }

    /// Build a timeline from a parsed LRC document.
    ///
    /// Each line ends where the next one starts; the last line ends at the
    /// track duration, or the document's `length` tag when the duration is
    /// unknown.
    #[must_use]
    pub fn from_lrc(track: TrackIdentity, lrc: &LrcFile, source: TimelineSource) -> Self {
        let track_end = if track.duration_ms > 0 {
            Some(track.duration_ms)
        } else {
            lrc.metadata.length_ms
        };

        let lines = lrc
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let end_ms = lrc.lines.get(i + 1).map_or_else(
                    || {
                        track_end
                            .filter(|end| *end > line.start_ms)
                            .unwrap_or_else(|| line.start_ms.saturating_add(DEFAULT_LAST_LINE_MS))
                    },
                    |next| next.start_ms,
                );
                LyricLine {
                    start_ms: line.start_ms,
                    end_ms,
                    text: line.text.clone(),
                    translated_text: None,
                }
            })
            .collect();

        let translations = lrc
            .translations
            .iter()
            .map(|t| TranslationTrack {
                kind: t.kind.clone(),
                lines: t.lines.iter().map(TimedText::from).collect(),
            })
            .collect();

        Self {
            track,
            lines,
            source,
            translations,
        }
    }

    /// Same timeline with a different source marker
    #[must_use]
    pub fn with_source(mut self, source: TimelineSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Secondary line sets available for this timeline, in document order
    #[must_use]
    pub fn available_translations(&self) -> Vec<TranslationKind> {
        self.translations.iter().map(|t| t.kind.clone()).collect()
    }

    /// Display copy of the timeline with `translated_text` filled for `mode`.
    ///
    /// Lines are cleared when the mode is `None` or the requested line set is
    /// not part of this timeline.
    #[must_use]
    pub fn with_translation(&self, mode: &TranslationMode, tolerance_ms: u64) -> Self {
        let secondary = mode
            .kind()
            .and_then(|kind| self.translations.iter().find(|t| t.kind == kind));

        let lines = match secondary {
            Some(track) => align_translation(&self.lines, &track.lines, tolerance_ms),
            None => self
                .lines
                .iter()
                .map(|line| LyricLine {
                    translated_text: None,
                    ..line.clone()
                })
                .collect(),
        };

        Self {
            track: self.track.clone(),
            lines,
            source: self.source,
            translations: self.translations.clone(),
        }
    }
}
