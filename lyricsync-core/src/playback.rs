use crate::time::millis_since;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Identity of a track as reported by the playback source.
///
/// Equality with [`TrackIdentity::is_same_track`] drives change detection and
/// cache keys; the value is never mutated once produced by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackIdentity {
    /// Source-specific id (e.g. a Spotify track id)
    pub provider_id: Option<String>,
    pub title: String,
    /// Artist name(s), comma separated
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    pub duration_ms: u64,
}

impl TrackIdentity {
    /// Create a new track identity without a provider id
    #[must_use]
    pub fn new(title: impl Into<String>, artist: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            provider_id: None,
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration_ms,
        }
    }

    /// Set the source-specific id
    #[must_use]
    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    /// Set the album name
    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    /// Whether two identities refer to the same track.
    ///
    /// Provider ids win when both sides have one; otherwise title and artist
    /// are compared case-insensitively.
    #[must_use]
    pub fn is_same_track(&self, other: &Self) -> bool {
        match (&self.provider_id, &other.provider_id) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.title.to_lowercase() == other.title.to_lowercase()
                    && self.artist.to_lowercase() == other.artist.to_lowercase()
            }
        }
    }

    /// Duration in whole seconds, for lyric queries
    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        u32::try_from(self.duration_ms / 1000).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// A single normalized observation of the remote player
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub track: TrackIdentity,
    /// Reported position in milliseconds, latency compensated
    pub position_ms: u64,
    pub is_playing: bool,
    /// Monotonic time the position was observed at
    pub observed_at: Instant,
}

impl PlaybackState {
    /// Create a new playback state observed at `observed_at`
    #[must_use]
    pub const fn new(
        track: TrackIdentity,
        position_ms: u64,
        is_playing: bool,
        observed_at: Instant,
    ) -> Self {
        Self {
            track,
            position_ms,
            is_playing,
            observed_at,
        }
    }

    /// Position expected at `now` if playback simply continued.
    ///
    /// Not capped: used to classify the next observation as a seek.
    #[must_use]
    pub fn expected_position_ms(&self, now: Instant) -> u64 {
        if !self.is_playing {
            return self.position_ms;
        }
        self.position_ms
            .saturating_add(millis_since(now, self.observed_at))
    }

    /// Dead-reckoned position at `now`.
    ///
    /// Extrapolation stops after `max_extrapolation_ms` and never runs past the
    /// track duration (when known). Paused states do not advance.
    #[must_use]
    pub fn extrapolated_position_ms(&self, now: Instant, max_extrapolation_ms: u64) -> u64 {
        if !self.is_playing {
            return self.position_ms;
        }
        let elapsed = millis_since(now, self.observed_at).min(max_extrapolation_ms);
        let position = self.position_ms.saturating_add(elapsed);
        if self.track.duration_ms > 0 {
            position.min(self.track.duration_ms)
        } else {
            position
        }
    }

    /// Whether the uncapped expected position has passed the end of the track
    #[must_use]
    pub fn past_end(&self, now: Instant) -> bool {
        self.is_playing
            && self.track.duration_ms > 0
            && self.expected_position_ms(now) >= self.track.duration_ms
    }
}

/// Result of one poll of the playback source
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// A track is loaded (playing or paused)
    Active(PlaybackState),
    /// Nothing playing, or non-track content such as an advertisement
    Stopped,
    /// The source could not be reached; transient
    Unavailable { reason: String },
}

/// Connectivity to the playback source, as seen by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    /// At least one recent poll failed
    Degraded,
    /// Consecutive failures reached the disconnect threshold
    Disconnected,
}

impl Connectivity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
