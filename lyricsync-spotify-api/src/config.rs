//! Spotify playback source configuration.

use const_format::concatcp;
use lyricsync_core::{CoreError, ProvidersConfig};
use serde::{Deserialize, Serialize};

/// Provider name used in config file
pub const PROVIDER_NAME: &str = "spotify";

/// Redirect URI registered for the local OAuth callback server
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

/// Spotify-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyProviderConfig {
    /// Spotify OAuth client ID
    #[serde(default)]
    pub client_id: String,
    /// Spotify OAuth client secret
    #[serde(default)]
    pub client_secret: String,
    /// OAuth redirect URI
    #[serde(default = "default_redirect_uri")]
    pub oauth_redirect_uri: String,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.into()
}

impl SpotifyProviderConfig {
    /// Extract Spotify config from the dynamic providers config.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is missing or cannot be parsed.
    pub fn from_providers(providers: &ProvidersConfig) -> Result<Self, CoreError> {
        providers
            .get(PROVIDER_NAME)?
            .ok_or_else(|| CoreError::ConfigMissingField {
                field: format!("providers.{PROVIDER_NAME}"),
            })
    }

    /// Validate that required fields are present.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or empty.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.client_id.trim().is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: "providers.spotify.client_id".into(),
            });
        }
        if self.client_secret.trim().is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: "providers.spotify.client_secret".into(),
            });
        }
        if url::Url::parse(&self.oauth_redirect_uri).is_err() {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "providers.spotify.oauth_redirect_uri is not a valid URL: {}",
                    self.oauth_redirect_uri
                ),
            });
        }
        Ok(())
    }
}

/// Config template for the Spotify playback source.
/// This is appended to the base config template when creating a new config file.
pub const CONFIG_TEMPLATE: &str = concatcp!(
    "[providers.spotify]\n",
    "# Required: get these from https://developer.spotify.com/dashboard\n",
    "client_id = \"\"\n",
    "client_secret = \"\"\n",
    "oauth_redirect_uri = \"",
    DEFAULT_REDIRECT_URI,
    "\"\n"
);

#[cfg(test)]
mod tests {
    use super::*;
    use lyricsync_core::{build_config_template, LyricsyncConfig};

    #[test]
    fn test_template_requires_credentials() {
        let full = build_config_template(Some(&[CONFIG_TEMPLATE]));
        let parsed = LyricsyncConfig::from_toml_str(&full).unwrap();
        let config = SpotifyProviderConfig::from_providers(&parsed.providers).unwrap();
        assert_eq!(config.oauth_redirect_uri, DEFAULT_REDIRECT_URI);
        assert!(matches!(
            config.validate(),
            Err(CoreError::ConfigMissingField { field }) if field == "providers.spotify.client_id"
        ));
    }

    #[test]
    fn test_missing_table() {
        let parsed = LyricsyncConfig::from_toml_str("").unwrap();
        assert!(SpotifyProviderConfig::from_providers(&parsed.providers).is_err());
    }

    #[test]
    fn test_valid_config() {
        let parsed = LyricsyncConfig::from_toml_str(
            "[providers.spotify]\nclient_id = \"abc\"\nclient_secret = \"def\"\n",
        )
        .unwrap();
        let config = SpotifyProviderConfig::from_providers(&parsed.providers).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_redirect_uri() {
        let config = SpotifyProviderConfig {
            client_id: "abc".into(),
            client_secret: "def".into(),
            oauth_redirect_uri: "not a url".into(),
        };
        assert!(matches!(config.validate(), Err(CoreError::ConfigInvalid { .. })));
    }
}
