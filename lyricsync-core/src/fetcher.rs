//! Lyric resolution: cache read-through, provider fallback chain, write-through.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cache::LyricsCache;
use crate::config::LyricsyncConfig;
use crate::playback::TrackIdentity;
use crate::provider::{LyricsProvider, LyricsQuery, LyricsResult};
use crate::timeline::{LyricTimeline, TimelineSource};

const LOG_TARGET: &str = "lyricsync::fetcher";

/// How a resolution treats cached knowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Use fresh cache entries and honour not-found records
    Normal,
    /// Go to the providers regardless (user asked for a refresh)
    Refresh,
}

/// Outcome of resolving a track. Resolution never fails.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub timeline: LyricTimeline,
    /// Saved timing offset for the track
    pub offset_ms: i64,
    /// Providers failed transiently; a later retry may find lyrics
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FetcherSettings {
    /// Age after which cached timelines are re-fetched; zero never expires
    pub ttl_days: u32,
    /// How long a not-found record suppresses automatic lookups
    pub not_found_retry: chrono::Duration,
}

impl FetcherSettings {
    #[must_use]
    pub fn from_config(config: &LyricsyncConfig) -> Self {
        Self {
            ttl_days: config.cache.ttl_days,
            not_found_retry: chrono::Duration::hours(i64::from(config.lyrics.not_found_retry_hours)),
        }
    }
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self::from_config(&LyricsyncConfig::default())
    }
}

/// Resolves tracks to timelines using the cache and an ordered provider list
pub struct LyricsFetcher {
    cache: Option<Arc<LyricsCache>>,
    providers: Vec<Box<dyn LyricsProvider>>,
    settings: FetcherSettings,
}

impl LyricsFetcher {
    /// Create a new lyrics fetcher
    ///
    /// # Arguments
    /// * `cache` - Timeline cache, or `None` to always go to the providers
    /// * `providers` - Lyrics providers to try in order
    /// * `settings` - Staleness and negative-cache windows
    #[must_use]
    pub fn new(
        cache: Option<Arc<LyricsCache>>,
        providers: Vec<Box<dyn LyricsProvider>>,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            cache,
            providers,
            settings,
        }
    }

    /// Names of the configured providers, in order
    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve the timeline for a track.
    ///
    /// Cache hits that are not stale are returned directly. Otherwise each
    /// provider is tried in order and the first synced answer is written
    /// through to the cache. When nothing is found the result is an empty
    /// timeline; when providers failed transiently a stale cached copy is
    /// served if there is one, otherwise the empty result is marked degraded.
    pub async fn resolve(&self, track: &TrackIdentity, mode: ResolveMode) -> Resolution {
        let offset_ms = self.load_offset(track).await;
        let now = Utc::now();

        let mut stale = None;
        if let Some(cache) = &self.cache {
            match cache.get(track).await {
                Ok(Some(cached)) => {
                    if mode == ResolveMode::Normal && !cached.is_stale(self.settings.ttl_days, now) {
                        info!(
                            target: LOG_TARGET,
                            "Using cached lyrics for {} ({} lines)",
                            track,
                            cached.timeline.len()
                        );
                        return Resolution {
                            timeline: cached.timeline,
                            offset_ms,
                            degraded: false,
                        };
                    }
                    debug!(target: LOG_TARGET, "Cached lyrics for {} bypassed (mode: {:?})", track, mode);
                    stale = Some(cached.timeline);
                }
                Ok(None) => {}
                Err(e) => warn!(target: LOG_TARGET, "Cache lookup failed for {}: {}", track, e),
            }

            if mode == ResolveMode::Normal {
                match cache.not_found_since(track).await {
                    Ok(Some(since)) if now - since < self.settings.not_found_retry => {
                        info!(
                            target: LOG_TARGET,
                            "Skipping lookup for {}: no lyrics found at {}", track, since
                        );
                        return Resolution {
                            timeline: stale.unwrap_or_else(|| LyricTimeline::empty(track.clone())),
                            offset_ms,
                            degraded: false,
                        };
                    }
                    Ok(_) => {}
                    Err(e) => warn!(target: LOG_TARGET, "Not-found lookup failed for {}: {}", track, e),
                }
            }
        }

        let query = LyricsQuery::for_track(track);
        let mut transient_failure = false;

        info!(
            target: LOG_TARGET,
            "Fetching lyrics for: {} (providers: {:?})",
            track,
            self.provider_names()
        );

        for provider in &self.providers {
            match provider.fetch(&query).await {
                Ok(fetched) => match fetched.result {
                    LyricsResult::Synced(lrc) if !lrc.is_empty() => {
                        info!(
                            target: LOG_TARGET,
                            "Found synced lyrics from {} ({} lines, provider_id: {})",
                            provider.name(),
                            lrc.lines.len(),
                            fetched.provider_id
                        );
                        let timeline =
                            LyricTimeline::from_lrc(track.clone(), &lrc, TimelineSource::Fetched);
                        self.store(track, &timeline, provider.name()).await;
                        return Resolution {
                            timeline,
                            offset_ms,
                            degraded: false,
                        };
                    }
                    LyricsResult::Synced(_) | LyricsResult::Unsynced(_) => {
                        info!(
                            target: LOG_TARGET,
                            "Provider {} returned lyrics without usable timing",
                            provider.name()
                        );
                    }
                    LyricsResult::NotFound => {
                        info!(target: LOG_TARGET, "Provider {} returned no lyrics", provider.name());
                    }
                },
                Err(e) => {
                    warn!(target: LOG_TARGET, "Provider {} failed with error: {}", provider.name(), e);
                    transient_failure |= e.is_transient();
                }
            }
        }

        if transient_failure {
            if let Some(timeline) = stale {
                warn!(
                    target: LOG_TARGET,
                    "Providers unavailable, serving stale cached lyrics for {}", track
                );
                return Resolution {
                    timeline,
                    offset_ms,
                    degraded: true,
                };
            }
            return Resolution {
                timeline: LyricTimeline::empty(track.clone()),
                offset_ms,
                degraded: true,
            };
        }

        info!(target: LOG_TARGET, "No synced lyrics found for {}", track);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.record_not_found(track).await {
                warn!(target: LOG_TARGET, "Failed to record missing lyrics for {}: {}", track, e);
            }
        }

        Resolution {
            timeline: LyricTimeline::empty(track.clone()),
            offset_ms,
            degraded: false,
        }
    }

    /// Persist a per-track timing offset. Failures are logged only.
    pub async fn save_offset(&self, track: &TrackIdentity, offset_ms: i64) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.set_offset(track, offset_ms).await {
            Ok(()) => debug!(target: LOG_TARGET, "Saved offset {} ms for {}", offset_ms, track),
            Err(e) => warn!(target: LOG_TARGET, "Failed to save offset for {}: {}", track, e),
        }
    }

    async fn load_offset(&self, track: &TrackIdentity) -> i64 {
        let Some(cache) = &self.cache else {
            return 0;
        };
        cache.get_offset(track).await.unwrap_or_else(|e| {
            warn!(target: LOG_TARGET, "Failed to load offset for {}: {}", track, e);
            0
        })
    }

    async fn store(&self, track: &TrackIdentity, timeline: &LyricTimeline, provider: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.put(track, timeline, provider).await {
            warn!(target: LOG_TARGET, "Failed to cache lyrics: {}", e);
        }
        if let Err(e) = cache.clear_not_found(track).await {
            warn!(target: LOG_TARGET, "Failed to clear not-found record: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::lrc::LrcFile;
    use crate::provider::FetchedLyrics;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) const LRC: &str = "[00:01.00]one\n[00:03.00]two\n";

    pub(crate) enum Reply {
        Synced,
        /// Synced lyrics with the given LRC text
        Lrc(String),
        Unsynced,
        NotFound,
        Fail,
    }

    pub(crate) struct ScriptedProvider {
        name: &'static str,
        replies: Mutex<VecDeque<Reply>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(
            name: &'static str,
            replies: Vec<Reply>,
        ) -> (Box<dyn LyricsProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                name,
                replies: Mutex::new(replies.into()),
                calls: Arc::clone(&calls),
            };
            (Box::new(provider), calls)
        }
    }

    #[async_trait]
    impl LyricsProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _query: &LyricsQuery) -> Result<FetchedLyrics, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::NotFound);
            match reply {
                Reply::Synced => Ok(FetchedLyrics {
                    result: LyricsResult::Synced(LrcFile::parse(LRC)),
                    provider_id: "42".into(),
                }),
                Reply::Lrc(text) => Ok(FetchedLyrics {
                    result: LyricsResult::Synced(LrcFile::parse(&text)),
                    provider_id: "44".into(),
                }),
                Reply::Unsynced => Ok(FetchedLyrics {
                    result: LyricsResult::Unsynced("one\ntwo".into()),
                    provider_id: "43".into(),
                }),
                Reply::NotFound => Ok(FetchedLyrics::not_found()),
                Reply::Fail => Err(CoreError::LyricsProviderFailed {
                    provider: self.name.into(),
                    reason: "timeout".into(),
                }),
            }
        }
    }

    fn track() -> TrackIdentity {
        TrackIdentity::new("Song", "Artist", 10_000).with_provider_id("sp1")
    }

    async fn cache() -> Arc<LyricsCache> {
        Arc::new(LyricsCache::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let (provider, calls) = ScriptedProvider::new("p", vec![Reply::Synced]);
        let fetcher = LyricsFetcher::new(Some(cache().await), vec![provider], FetcherSettings::default());

        let first = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert_eq!(first.timeline.source, TimelineSource::Fetched);
        assert_eq!(first.timeline.len(), 2);

        let second = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert_eq!(second.timeline.source, TimelineSource::Cached);
        assert_eq!(second.timeline.lines, first.timeline.lines);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cache() {
        let (provider, calls) = ScriptedProvider::new("p", vec![Reply::Synced, Reply::Synced]);
        let fetcher = LyricsFetcher::new(Some(cache().await), vec![provider], FetcherSettings::default());

        fetcher.resolve(&track(), ResolveMode::Normal).await;
        let refreshed = fetcher.resolve(&track(), ResolveMode::Refresh).await;
        assert_eq!(refreshed.timeline.source, TimelineSource::Fetched);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_falls_through_provider_chain() {
        let (first, first_calls) = ScriptedProvider::new("first", vec![Reply::Unsynced]);
        let (second, second_calls) = ScriptedProvider::new("second", vec![Reply::Synced]);
        let fetcher = LyricsFetcher::new(None, vec![first, second], FetcherSettings::default());

        let resolution = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert_eq!(resolution.timeline.len(), 2);
        assert!(!resolution.degraded);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_empty_and_suppressed() {
        let cache = cache().await;
        let (provider, calls) = ScriptedProvider::new("p", vec![Reply::NotFound, Reply::Synced]);
        let fetcher = LyricsFetcher::new(Some(Arc::clone(&cache)), vec![provider], FetcherSettings::default());

        let resolution = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert!(resolution.timeline.is_empty());
        assert_eq!(resolution.timeline.source, TimelineSource::None);
        assert!(!resolution.degraded);
        assert!(cache.not_found_since(&track()).await.unwrap().is_some());

        // Suppressed within the retry window
        let again = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert!(again.timeline.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A refresh asks again and clears the record on success
        let refreshed = fetcher.resolve(&track(), ResolveMode::Refresh).await;
        assert_eq!(refreshed.timeline.len(), 2);
        assert!(cache.not_found_since(&track()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_not_found_record_is_ignored() {
        let cache = cache().await;
        let old = Utc::now() - chrono::Duration::hours(25);
        cache.record_not_found_at(&track(), old).await.unwrap();

        let (provider, calls) = ScriptedProvider::new("p", vec![Reply::Synced]);
        let fetcher = LyricsFetcher::new(Some(cache), vec![provider], FetcherSettings::default());
        let resolution = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert_eq!(resolution.timeline.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_degraded_not_recorded() {
        let cache = cache().await;
        let (provider, _) = ScriptedProvider::new("p", vec![Reply::Fail]);
        let fetcher = LyricsFetcher::new(Some(Arc::clone(&cache)), vec![provider], FetcherSettings::default());

        let resolution = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert!(resolution.degraded);
        assert!(resolution.timeline.is_empty());
        assert!(cache.not_found_since(&track()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_copy_served_when_providers_fail() {
        let cache = cache().await;
        let stale = LyricTimeline::from_lrc(track(), &LrcFile::parse(LRC), TimelineSource::Fetched);
        cache
            .put_at(&track(), &stale, "p", Utc::now() - chrono::Duration::days(90))
            .await
            .unwrap();

        let (provider, calls) = ScriptedProvider::new("p", vec![Reply::Fail]);
        let fetcher = LyricsFetcher::new(Some(cache), vec![provider], FetcherSettings::default());

        let resolution = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolution.timeline.lines, stale.lines);
        assert_eq!(resolution.timeline.source, TimelineSource::Cached);
    }

    #[tokio::test]
    async fn test_offset_restored() {
        let cache = cache().await;
        let (provider, _) = ScriptedProvider::new("p", vec![Reply::Synced]);
        let fetcher = LyricsFetcher::new(Some(cache), vec![provider], FetcherSettings::default());

        fetcher.save_offset(&track(), 1_500).await;
        let resolution = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert_eq!(resolution.offset_ms, 1_500);
    }

    #[tokio::test]
    async fn test_without_cache_or_providers() {
        let fetcher = LyricsFetcher::new(None, Vec::new(), FetcherSettings::default());
        let resolution = fetcher.resolve(&track(), ResolveMode::Normal).await;
        assert!(resolution.timeline.is_empty());
        assert_eq!(resolution.offset_ms, 0);
        assert!(!resolution.degraded);
    }
}
