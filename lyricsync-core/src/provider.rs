use crate::error::CoreError;
use crate::lrc::LrcFile;
use crate::playback::TrackIdentity;
use async_trait::async_trait;

/// Candidates scoring below this are not the playing track
pub const MIN_MATCH_SCORE: u32 = 74;

/// Query parameters for fetching lyrics
#[derive(Debug, Clone)]
pub struct LyricsQuery {
    /// Track name
    pub track_name: String,
    /// Artist name
    pub artist_name: String,
    /// Album name (optional)
    pub album_name: Option<String>,
    /// Track duration in seconds (for matching)
    pub duration_secs: Option<u32>,
}

impl LyricsQuery {
    /// Create a new lyrics query
    #[must_use]
    pub fn new(track_name: impl Into<String>, artist_name: impl Into<String>) -> Self {
        Self {
            track_name: track_name.into(),
            artist_name: artist_name.into(),
            album_name: None,
            duration_secs: None,
        }
    }

    /// Build the query for a playing track
    #[must_use]
    pub fn for_track(track: &TrackIdentity) -> Self {
        let mut query = Self::new(&track.title, &track.artist);
        if let Some(album) = &track.album {
            query = query.with_album(album);
        }
        if track.duration_ms > 0 {
            query = query.with_duration(track.duration_secs());
        }
        query
    }

    /// Set album name
    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album_name = Some(album.into());
        self
    }

    /// Set duration
    #[must_use]
    pub const fn with_duration(mut self, duration_secs: u32) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }

    /// Score how well a candidate matches this query, from 0 to 100.
    ///
    /// Averages a duration score (within 1 s → 100, within 3 s → 80, else 0;
    /// skipped when either side has no duration) with partial similarity of
    /// artist, title, and album (album only when both sides have one).
    #[must_use]
    pub fn match_score(&self, candidate: &CandidateInfo<'_>) -> u32 {
        let mut scores = Vec::with_capacity(4);

        if let (Some(expected), Some(actual)) = (self.duration_secs, candidate.duration_secs) {
            scores.push(match expected.abs_diff(actual) {
                0..=1 => 100,
                2..=3 => 80,
                _ => 0,
            });
        }

        scores.push(partial_ratio(&self.artist_name, candidate.artist));
        scores.push(partial_ratio(&self.track_name, candidate.title));

        if let (Some(expected), Some(actual)) = (self.album_name.as_deref(), candidate.album) {
            if !expected.is_empty() && !actual.is_empty() {
                scores.push(partial_ratio(expected, actual));
            }
        }

        let count = u32::try_from(scores.len()).unwrap_or(u32::MAX);
        scores.iter().sum::<u32>() / count.max(1)
    }
}

/// Metadata of a lyric candidate returned by a source
#[derive(Debug, Clone, Copy)]
pub struct CandidateInfo<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub album: Option<&'a str>,
    pub duration_secs: Option<u32>,
}

/// Best similarity (0-100) of the shorter string against any equally long
/// window of the longer one, case-insensitive.
fn partial_ratio(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0;
    }

    let best = long
        .windows(short.len())
        .map(|window| common_subsequence_len(&short, window))
        .max()
        .unwrap_or(0);

    u32::try_from(best * 100 / short.len()).unwrap_or(0)
}

fn common_subsequence_len(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Result from a lyrics provider
#[derive(Debug, Clone)]
pub enum LyricsResult {
    /// Synchronized lyrics with timing
    Synced(LrcFile),
    /// Plain text lyrics without timing
    Unsynced(String),
    /// No lyrics found
    NotFound,
}

/// Lyrics with provider metadata
#[derive(Debug, Clone)]
pub struct FetchedLyrics {
    /// The lyrics result
    pub result: LyricsResult,
    /// Provider-specific ID (e.g., LRCLIB's numeric ID as string)
    pub provider_id: String,
}

impl FetchedLyrics {
    /// A not-found answer with no provider id
    #[must_use]
    pub const fn not_found() -> Self {
        Self {
            result: LyricsResult::NotFound,
            provider_id: String::new(),
        }
    }
}

impl LyricsResult {
    /// Check if lyrics were found
    #[must_use]
    pub const fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    /// Check if lyrics are synced
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }

    /// Get as `LrcFile` if synced
    #[must_use]
    pub const fn as_synced(&self) -> Option<&LrcFile> {
        match self {
            Self::Synced(lrc) => Some(lrc),
            _ => None,
        }
    }
}

/// Trait for lyrics providers
#[async_trait]
pub trait LyricsProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Fetch lyrics for a query.
    ///
    /// "No lyrics" is `Ok` with [`LyricsResult::NotFound`]; errors mean the
    /// provider could not answer.
    async fn fetch(&self, query: &LyricsQuery) -> Result<FetchedLyrics, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> LyricsQuery {
        LyricsQuery::new("Lemon", "Kenshi Yonezu").with_duration(255)
    }

    fn candidate<'a>(title: &'a str, artist: &'a str, duration_secs: Option<u32>) -> CandidateInfo<'a> {
        CandidateInfo {
            title,
            artist,
            album: None,
            duration_secs,
        }
    }

    #[test]
    fn test_query_for_track() {
        let track = TrackIdentity::new("Lemon", "Kenshi Yonezu", 255_400).with_album("STRAY SHEEP");
        let query = LyricsQuery::for_track(&track);
        assert_eq!(query.duration_secs, Some(255));
        assert_eq!(query.album_name.as_deref(), Some("STRAY SHEEP"));

        let unknown = LyricsQuery::for_track(&TrackIdentity::new("a", "b", 0));
        assert_eq!(unknown.duration_secs, None);
    }

    #[test]
    fn test_exact_match_scores_full() {
        assert_eq!(query().match_score(&candidate("Lemon", "Kenshi Yonezu", Some(255))), 100);
    }

    #[test]
    fn test_duration_bands() {
        let q = query();
        assert_eq!(q.match_score(&candidate("Lemon", "Kenshi Yonezu", Some(257))), 93);
        assert_eq!(q.match_score(&candidate("Lemon", "Kenshi Yonezu", Some(300))), 66);
        assert!(q.match_score(&candidate("Lemon", "Kenshi Yonezu", Some(300))) < MIN_MATCH_SCORE);
    }

    #[test]
    fn test_partial_title_match() {
        // Title contained in a longer title still matches fully
        let score = query().match_score(&candidate("Lemon (Live)", "kenshi yonezu", Some(255)));
        assert_eq!(score, 100);
    }

    #[test]
    fn test_wrong_song_rejected() {
        let score = query().match_score(&candidate("Uchiage Hanabi", "DAOKO", Some(289)));
        assert!(score < MIN_MATCH_SCORE, "score {score}");
    }

    #[test]
    fn test_partial_ratio_edges() {
        assert_eq!(partial_ratio("", "abc"), 0);
        assert_eq!(partial_ratio("abc", "ABC"), 100);
        assert_eq!(partial_ratio("abd", "xxabcxx"), 66);
    }
}
