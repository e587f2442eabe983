#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod error;
pub mod oauth;
pub mod paths;
pub mod source;

pub use config::{SpotifyProviderConfig, CONFIG_TEMPLATE as SPOTIFY_CONFIG_TEMPLATE};
pub use error::SpotifyError;
pub use oauth::SpotifyOAuth;
pub use paths::SPOTIFY_TOKEN_CACHE_FILE_NAME;
pub use source::SpotifyPlaybackSource;
