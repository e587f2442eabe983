use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - please edit it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Playback errors
    #[error("Playback source {source_name} unavailable: {reason}")]
    PlaybackUnavailable { source_name: String, reason: String },

    // Lyrics errors
    #[error("Lyrics provider {provider} failed: {reason}")]
    LyricsProviderFailed { provider: String, reason: String },

    // Cache errors
    #[error("Cache database error: {0}")]
    CacheError(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Cache entry encoding error: {0}")]
    SerializationError(#[from] serde_json::Error),

    // Network errors
    #[error("Network request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Network middleware failed: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Whether retrying the same operation later could succeed.
    ///
    /// Config and storage errors are definitive; network, provider and
    /// playback source failures are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::MiddlewareError(_)
                | Self::LyricsProviderFailed { .. }
                | Self::PlaybackUnavailable { .. }
                | Self::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_not_transient() {
        let err = CoreError::ConfigInvalid {
            message: "playback.poll_interval_ms must be greater than 0".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_provider_failure_is_transient() {
        let err = CoreError::LyricsProviderFailed {
            provider: "lrclib".into(),
            reason: "HTTP 503".into(),
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Lyrics provider lrclib failed: HTTP 503");
    }
}
