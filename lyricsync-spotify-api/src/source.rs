//! Spotify playback state source.

use crate::config::PROVIDER_NAME;
use crate::error::SpotifyError;
use crate::oauth::SpotifyOAuth;
use async_trait::async_trait;
use lyricsync_core::{CoreError, DurationExt, PlaybackSnapshot, PlaybackSource, TrackIdentity};
use rspotify::model::{CurrentPlaybackContext, FullTrack, PlayableItem};
use rspotify::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOG_TARGET: &str = "lyricsync::spotify::source";

/// Reads the user's current playback from the Spotify Web API.
///
/// Each call is one `GET /me/player` request; the token is refreshed first
/// when it is about to expire.
pub struct SpotifyPlaybackSource {
    oauth: Arc<SpotifyOAuth>,
}

impl SpotifyPlaybackSource {
    #[must_use]
    pub const fn new(oauth: Arc<SpotifyOAuth>) -> Self {
        Self { oauth }
    }

    async fn request(&self) -> Result<Option<PlaybackSnapshot>, SpotifyError> {
        self.oauth.ensure_token_fresh().await?;

        let request_start = Instant::now();
        let playback = self
            .oauth
            .client()
            .current_playback(None, None::<Vec<_>>)
            .await;
        let request_latency = request_start.elapsed();

        let playback = match playback {
            Ok(playback) => playback,
            Err(e) => {
                // A rejected token is the common cause; refresh so the next poll can succeed
                if let Err(refresh_err) = self.oauth.refresh_token().await {
                    warn!(target: LOG_TARGET, "Token refresh after failed request failed: {}", refresh_err);
                }
                return Err(e.into());
            }
        };

        Ok(playback.and_then(|context| snapshot_from_context(context, request_latency)))
    }
}

#[async_trait]
impl PlaybackSource for SpotifyPlaybackSource {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn fetch_playback(&self) -> Result<Option<PlaybackSnapshot>, CoreError> {
        let snapshot = self.request().await?;
        debug!(
            target: LOG_TARGET,
            "Polled Spotify: track={:?}, playing={:?}, progress={:?}",
            snapshot.as_ref().map(|s| s.track.to_string()),
            snapshot.as_ref().map(|s| s.is_playing),
            snapshot.as_ref().map(|s| s.progress.as_millis_u64())
        );
        Ok(snapshot)
    }
}

/// Only music tracks are synchronized; episodes and ads read as nothing playing
fn snapshot_from_context(
    context: CurrentPlaybackContext,
    request_latency: Duration,
) -> Option<PlaybackSnapshot> {
    let Some(PlayableItem::Track(track)) = context.item else {
        return None;
    };

    Some(PlaybackSnapshot {
        track: track_identity(&track),
        progress: context.progress.map_or(Duration::ZERO, to_std),
        is_playing: context.is_playing,
        request_latency,
    })
}

fn track_identity(track: &FullTrack) -> TrackIdentity {
    let artists: Vec<&str> = track.artists.iter().map(|a| a.name.as_str()).collect();
    // Use just the ID part, not the full URI (spotify:track:xxx -> xxx)
    identity_from_parts(
        &track.name,
        &artists,
        &track.album.name,
        track.duration,
        track.id.as_ref().map(|id| id.id()),
    )
}

fn identity_from_parts(
    name: &str,
    artists: &[&str],
    album: &str,
    duration: chrono::TimeDelta,
    id: Option<&str>,
) -> TrackIdentity {
    let mut identity = TrackIdentity::new(name, artists.join(", "), to_std(duration).as_millis_u64());
    if !album.is_empty() {
        identity = identity.with_album(album);
    }
    if let Some(id) = id {
        identity = identity.with_provider_id(id);
    }
    identity
}

/// Negative deltas clamp to zero
fn to_std(delta: chrono::TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_joins_artists() {
        let identity = identity_from_parts(
            "Lemon",
            &["Kenshi Yonezu", "Guest"],
            "STRAY SHEEP",
            chrono::TimeDelta::milliseconds(255_000),
            Some("4iV5W9uYEdYUVa79Axb7Rh"),
        );

        assert_eq!(identity.title, "Lemon");
        assert_eq!(identity.artist, "Kenshi Yonezu, Guest");
        assert_eq!(identity.album.as_deref(), Some("STRAY SHEEP"));
        assert_eq!(identity.provider_id.as_deref(), Some("4iV5W9uYEdYUVa79Axb7Rh"));
        assert_eq!(identity.duration_ms, 255_000);
    }

    #[test]
    fn test_local_file_without_id_or_album() {
        let identity =
            identity_from_parts("Demo", &["Me"], "", chrono::TimeDelta::seconds(90), None);
        assert!(identity.provider_id.is_none());
        assert!(identity.album.is_none());
        assert_eq!(identity.duration_secs(), 90);
    }

    #[test]
    fn test_negative_delta_clamps() {
        assert_eq!(to_std(chrono::TimeDelta::milliseconds(-5)), Duration::ZERO);
    }
}
