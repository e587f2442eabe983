//! Path constants for configuration and cache files.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "lyricsync";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the lyrics cache database file
pub const LYRICS_CACHE_DB_FILE_NAME: &str = "lyrics_cache.db";

/// The name of the log file written when file logging is enabled
pub const LOG_FILE_NAME: &str = "lyricsync.log";

/// Get the configuration directory path (~/.config/lyricsync/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.config/lyricsync/config.toml)
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the lyrics cache database path (`~/.config/lyricsync/lyrics_cache.db`)
#[must_use]
pub fn lyrics_cache_db_path() -> PathBuf {
    config_dir().join(LYRICS_CACHE_DB_FILE_NAME)
}

/// Cache database path inside a configured directory, or the default location
/// when `directory` is empty.
#[must_use]
pub fn lyrics_cache_db_path_in(directory: &str) -> PathBuf {
    if directory.trim().is_empty() {
        lyrics_cache_db_path()
    } else {
        PathBuf::from(directory).join(LYRICS_CACHE_DB_FILE_NAME)
    }
}

/// Get the log file path (`~/.config/lyricsync/lyricsync.log`)
#[must_use]
pub fn log_file_path() -> PathBuf {
    config_dir().join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_path_defaults_to_config_dir() {
        assert_eq!(lyrics_cache_db_path_in(""), lyrics_cache_db_path());
        assert_eq!(lyrics_cache_db_path_in("   "), lyrics_cache_db_path());
    }

    #[test]
    fn test_cache_path_in_custom_directory() {
        let path = lyrics_cache_db_path_in("/tmp/lyrics");
        assert_eq!(path, PathBuf::from("/tmp/lyrics").join(LYRICS_CACHE_DB_FILE_NAME));
    }
}
