//! LRCLIB provider configuration.

use const_format::concatcp;
use lyricsync_core::{CoreError, ProvidersConfig};
use serde::{Deserialize, Serialize};

/// Provider name used in config file
pub const PROVIDER_NAME: &str = "lrclib";

/// Public LRCLIB API
pub const DEFAULT_BASE_URL: &str = "https://lrclib.net/api";

/// LRCLIB-specific configuration, all optional
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrclibProviderConfig {
    /// API base URL, for self-hosted mirrors
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Retries for transient HTTP failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

const fn default_timeout() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for LrclibProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl LrclibProviderConfig {
    /// Extract LRCLIB config from the dynamic providers config, falling back
    /// to defaults when the table is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the table exists but cannot be parsed.
    pub fn from_providers(providers: &ProvidersConfig) -> Result<Self, CoreError> {
        Ok(providers.get(PROVIDER_NAME)?.unwrap_or_default())
    }
}

/// Config template for the LRCLIB provider.
/// This is appended to the base config template when creating a new config file.
pub const CONFIG_TEMPLATE: &str = concatcp!(
    "[providers.lrclib]\n",
    "# Optional: point at a self-hosted LRCLIB instance\n",
    "# base_url = \"",
    DEFAULT_BASE_URL,
    "\"\n",
    "timeout_secs = 10\n",
    "max_retries = 3\n"
);
