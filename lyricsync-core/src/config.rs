use crate::error::{CoreError, Result};
use crate::timeline::TranslationMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LyricsyncConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub lyrics: LyricsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Provider-specific tables (`[providers.<name>]`), parsed lazily by the
    /// crate that owns each provider.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Playback polling and dead-reckoning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Cap on how far the position is extrapolated past the last poll.
    /// Defaults to the poll interval.
    #[serde(default)]
    pub max_extrapolation_ms: Option<u64>,
    /// Position jump that counts as a seek. Defaults to 1.5x the poll interval.
    #[serde(default)]
    pub seek_threshold_ms: Option<u64>,
    #[serde(default = "default_disconnect_after_failures")]
    pub disconnect_after_failures: u32,
    #[serde(default = "default_idle_after_misses")]
    pub idle_after_misses: u32,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

const fn default_poll_interval() -> u64 {
    500
}

const fn default_tick_interval() -> u64 {
    50
}

const fn default_disconnect_after_failures() -> u32 {
    3
}

const fn default_idle_after_misses() -> u32 {
    10
}

const fn default_max_backoff() -> u64 {
    5000
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            tick_interval_ms: default_tick_interval(),
            max_extrapolation_ms: None,
            seek_threshold_ms: None,
            disconnect_after_failures: default_disconnect_after_failures(),
            idle_after_misses: default_idle_after_misses(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl PlaybackConfig {
    /// Effective extrapolation cap in milliseconds
    #[must_use]
    pub fn max_extrapolation_ms(&self) -> u64 {
        self.max_extrapolation_ms.unwrap_or(self.poll_interval_ms)
    }

    /// Effective seek threshold in milliseconds
    #[must_use]
    pub fn seek_threshold_ms(&self) -> u64 {
        self.seek_threshold_ms
            .unwrap_or_else(|| self.poll_interval_ms.saturating_mul(3) / 2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsConfig {
    /// Provider priority: providers are tried in order
    #[serde(default = "default_providers")]
    pub providers: Vec<LyricsProviderType>,
    /// "none", "romaji", or a language tag such as "zh"
    #[serde(default)]
    pub translation: TranslationMode,
    #[serde(default = "default_alignment_tolerance")]
    pub alignment_tolerance_ms: u64,
    #[serde(default = "default_not_found_retry_hours")]
    pub not_found_retry_hours: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_offset_step")]
    pub offset_step_ms: i64,
}

fn default_providers() -> Vec<LyricsProviderType> {
    vec![LyricsProviderType::Lrclib]
}

const fn default_alignment_tolerance() -> u64 {
    1000
}

const fn default_not_found_retry_hours() -> u32 {
    24
}

const fn default_retry_delay() -> u64 {
    2000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_offset_step() -> i64 {
    500
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            translation: TranslationMode::None,
            alignment_tolerance_ms: default_alignment_tolerance(),
            not_found_retry_hours: default_not_found_retry_hours(),
            retry_delay_ms: default_retry_delay(),
            max_retries: default_max_retries(),
            offset_step_ms: default_offset_step(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricsProviderType {
    Lrclib,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding the cache database; empty means the config directory
    #[serde(default)]
    pub directory: String,
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    #[serde(default = "default_cache_ttl")]
    pub ttl_days: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_max_entries() -> u32 {
    500
}

const fn default_cache_ttl() -> u32 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: String::new(),
            max_entries: default_max_entries(),
            ttl_days: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    /// Resolved path of the cache database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        crate::paths::lyrics_cache_db_path_in(&self.directory)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub file_enabled: bool,
}

/// Dynamic `[providers.*]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidersConfig(toml::Table);

impl ProvidersConfig {
    /// Deserialize the table for a single provider.
    ///
    /// Returns `Ok(None)` when the provider has no table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table exists but does not match `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.0
            .get(name)
            .map(|value| value.clone().try_into::<T>())
            .transpose()
            .map_err(CoreError::from)
    }

    /// Whether a table exists for the provider
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

impl LyricsyncConfig {
    /// Get the configuration directory path (~/.config/lyricsync/)
    #[must_use]
    pub fn config_dir() -> PathBuf {
        crate::paths::config_dir()
    }

    /// Get the config file path (~/.config/lyricsync/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from file or create template on first run.
    ///
    /// `provider_templates` are appended to the generated file so each
    /// provider crate can document its own table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` after writing the template, or an error if the
    /// file cannot be read, parsed, or fails validation.
    pub fn load_or_create(provider_templates: Option<&[&str]>) -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(&config_path, build_config_template(provider_templates))?;

            return Err(CoreError::ConfigNotFound { path: config_path });
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> Result<()> {
            Err(CoreError::ConfigInvalid {
                message: message.to_string(),
            })
        };

        if self.playback.poll_interval_ms == 0 {
            return invalid("playback.poll_interval_ms must be greater than 0");
        }
        if self.playback.tick_interval_ms == 0 {
            return invalid("playback.tick_interval_ms must be greater than 0");
        }
        if self.playback.disconnect_after_failures == 0 {
            return invalid("playback.disconnect_after_failures must be at least 1");
        }
        if self.playback.idle_after_misses < self.playback.disconnect_after_failures {
            return invalid(
                "playback.idle_after_misses must not be lower than playback.disconnect_after_failures",
            );
        }
        if self.lyrics.providers.is_empty() {
            return invalid("lyrics.providers must list at least one provider");
        }
        if self.lyrics.offset_step_ms <= 0 {
            return invalid("lyrics.offset_step_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Build the first-run config file, followed by provider sections
#[must_use]
pub fn build_config_template(provider_templates: Option<&[&str]>) -> String {
    let mut template = CONFIG_TEMPLATE.to_string();
    for provider in provider_templates.unwrap_or_default() {
        template.push('\n');
        template.push_str(provider);
    }
    template
}

const CONFIG_TEMPLATE: &str = r#"# lyricsync configuration
# ~/.config/lyricsync/config.toml

[playback]
poll_interval_ms = 500
tick_interval_ms = 50
# Dead-reckoning cap; defaults to poll_interval_ms
# max_extrapolation_ms = 500
# Position jump treated as a seek; defaults to 1.5x poll_interval_ms
# seek_threshold_ms = 750
disconnect_after_failures = 3
idle_after_misses = 10
max_backoff_ms = 5000

[lyrics]
# Providers are tried in order; first successful result wins
providers = ["lrclib"]
# "none", "romaji", or a language tag such as "zh"
translation = "none"
alignment_tolerance_ms = 1000
# Skip automatic lookups for tracks with no lyrics for this long
not_found_retry_hours = 24
retry_delay_ms = 2000
max_retries = 3
offset_step_ms = 500

[cache]
enabled = true
# Empty = ~/.config/lyricsync
directory = ""
max_entries = 500
ttl_days = 30

[logging]
# Also write logs to ~/.config/lyricsync/lyricsync.log
file_enabled = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct DummyProvider {
        client_id: String,
        #[serde(default)]
        retries: u32,
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let config = LyricsyncConfig::from_toml_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.playback.poll_interval_ms, 500);
        assert_eq!(config.playback.max_extrapolation_ms(), 500);
        assert_eq!(config.playback.seek_threshold_ms(), 750);
        assert_eq!(config.lyrics.translation, TranslationMode::None);
        assert_eq!(config.lyrics.providers, vec![LyricsProviderType::Lrclib]);
        assert_eq!(config.cache.max_entries, 500);
        assert!(!config.logging.file_enabled);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LyricsyncConfig::from_toml_str("").unwrap();
        assert_eq!(config.playback.disconnect_after_failures, 3);
        assert_eq!(config.lyrics.not_found_retry_hours, 24);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_derived_thresholds_follow_poll_interval() {
        let config = LyricsyncConfig::from_toml_str("[playback]\npoll_interval_ms = 800\n").unwrap();
        assert_eq!(config.playback.max_extrapolation_ms(), 800);
        assert_eq!(config.playback.seek_threshold_ms(), 1200);

        let config = LyricsyncConfig::from_toml_str(
            "[playback]\npoll_interval_ms = 800\nseek_threshold_ms = 2000\n",
        )
        .unwrap();
        assert_eq!(config.playback.seek_threshold_ms(), 2000);
    }

    #[test]
    fn test_translation_modes() {
        let config = LyricsyncConfig::from_toml_str("[lyrics]\ntranslation = \"romaji\"\n").unwrap();
        assert_eq!(config.lyrics.translation, TranslationMode::Romaji);

        let config = LyricsyncConfig::from_toml_str("[lyrics]\ntranslation = \"zh\"\n").unwrap();
        assert_eq!(config.lyrics.translation, TranslationMode::Language("zh".into()));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = LyricsyncConfig::from_toml_str("[playback]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = LyricsyncConfig::from_toml_str("[playback\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParseError(_)));
    }

    #[test]
    fn test_providers_get() {
        let config = LyricsyncConfig::from_toml_str(
            "[providers.dummy]\nclient_id = \"abc\"\n",
        )
        .unwrap();

        let dummy: DummyProvider = config.providers.get("dummy").unwrap().unwrap();
        assert_eq!(dummy.client_id, "abc");
        assert_eq!(dummy.retries, 0);
        assert!(config.providers.contains("dummy"));

        let missing: Option<DummyProvider> = config.providers.get("other").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_providers_get_wrong_shape() {
        let config =
            LyricsyncConfig::from_toml_str("[providers.dummy]\nclient_id = 5\n").unwrap();
        assert!(config.providers.get::<DummyProvider>("dummy").is_err());
    }

    #[test]
    fn test_build_config_template_appends_providers() {
        let template = build_config_template(Some(&["[providers.dummy]\nclient_id = \"\"\n"]));
        assert!(template.starts_with("# lyricsync configuration"));
        assert!(template.ends_with("[providers.dummy]\nclient_id = \"\"\n"));
    }
}
