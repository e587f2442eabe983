use lyricsync_core::CoreError;
use thiserror::Error;

/// Errors from Spotify authentication and playback requests.
#[derive(Debug, Error)]
pub enum SpotifyError {
    /// Authentication failed during OAuth flow or token exchange.
    #[error("Spotify authentication failed: {reason}")]
    AuthFailed { reason: String },

    /// Error from the Spotify API client.
    #[error("Spotify API error: {0}")]
    Api(#[from] rspotify::ClientError),

    /// Failed to read the token cache file or perform I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SpotifyError> for CoreError {
    fn from(err: SpotifyError) -> Self {
        Self::PlaybackUnavailable {
            source_name: crate::config::PROVIDER_NAME.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convenience type alias for Results with `SpotifyError`.
pub type Result<T> = std::result::Result<T, SpotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_transient_core_error() {
        let err: CoreError = SpotifyError::AuthFailed {
            reason: "expired".into(),
        }
        .into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("spotify"));
    }
}
