//! Playback source abstraction.

use crate::error::CoreError;
use crate::playback::TrackIdentity;
use async_trait::async_trait;
use std::time::Duration;

/// Raw answer from a playback source for one request
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub track: TrackIdentity,
    /// Position reported by the source
    pub progress: Duration,
    pub is_playing: bool,
    /// Round-trip time of the request that produced this snapshot
    pub request_latency: Duration,
}

/// Trait for services that report what is playing (e.g. Spotify).
///
/// Implementations perform a single request per call and hold no polling
/// state; [`PlaybackPoller`](crate::poller::PlaybackPoller) owns intervals,
/// failure counting and backoff.
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// Returns a human-readable name for this source.
    fn name(&self) -> &'static str;

    /// Fetch the current playback state.
    ///
    /// `Ok(None)` means nothing is playing, or the content is not a track
    /// (an advertisement or a podcast episode).
    ///
    /// # Errors
    ///
    /// Returns an error if the source could not be reached or rejected the
    /// request.
    async fn fetch_playback(&self) -> Result<Option<PlaybackSnapshot>, CoreError>;
}
