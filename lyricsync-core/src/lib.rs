#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod align;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod index;
pub mod lrc;
pub mod paths;
pub mod playback;
pub mod poller;
pub mod provider;
pub mod session;
pub mod source;
pub mod sync;
pub mod time;
pub mod timeline;

pub use align::align_translation;
pub use cache::{CacheKey, CachedTimeline, LyricsCache};
pub use config::{
    build_config_template, CacheConfig, LoggingConfig, LyricsConfig, LyricsProviderType,
    LyricsyncConfig, PlaybackConfig, ProvidersConfig,
};
pub use error::CoreError;
pub use fetcher::{FetcherSettings, LyricsFetcher, Resolution, ResolveMode};
pub use index::{TimelineCursor, TimelineIndex};
pub use lrc::{LrcFile, LrcLine, LrcMetadata, LrcTranslation};
pub use paths::{
    config_dir, log_file_path, lyrics_cache_db_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    LOG_FILE_NAME, LYRICS_CACHE_DB_FILE_NAME,
};
pub use playback::{Connectivity, PlaybackState, PollOutcome, TrackIdentity};
pub use poller::{PlaybackPoller, PollReport, PollerSettings};
pub use provider::{
    CandidateInfo, FetchedLyrics, LyricsProvider, LyricsQuery, LyricsResult, MIN_MATCH_SCORE,
};
pub use session::{EngineCommand, SessionSettings, SyncSession};
pub use source::{PlaybackSnapshot, PlaybackSource};
pub use sync::{
    ResolutionTicket, SyncCore, SyncEngine, SyncEvent, SyncPhase, SyncSettings, SyncSnapshot,
};
pub use time::DurationExt;
pub use timeline::{
    LyricLine, LyricTimeline, TimedText, TimelineSource, TranslationKind, TranslationMode,
    TranslationTrack,
};
