#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;

pub use config::{LrclibProviderConfig, CONFIG_TEMPLATE as LRCLIB_CONFIG_TEMPLATE};

use async_trait::async_trait;
use lyricsync_core::{
    CandidateInfo, CoreError, FetchedLyrics, LrcFile, LyricsProvider, LyricsQuery, LyricsResult,
    MIN_MATCH_SCORE,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "lyricsync::lrclib";

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// LRCLIB.net lyrics provider
pub struct LrclibProvider {
    client: ClientWithMiddleware,
    base_url: String,
}

impl LrclibProvider {
    /// Create a new LRCLIB provider with default 10-second timeout and 3 retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, CoreError> {
        Self::with_config(&LrclibProviderConfig::default())
    }

    /// Create a provider from its config table
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_config(config: &LrclibProviderConfig) -> Result<Self, CoreError> {
        // Base client with timeout
        let base_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("lyricsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // Wrap with retry middleware (exponential backoff)
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Response from LRCLIB API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibResponse {
    id: i64,
    track_name: String,
    artist_name: String,
    #[serde(default)]
    album_name: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    instrumental: bool,
    plain_lyrics: Option<String>,
    synced_lyrics: Option<String>,
}

impl LrclibResponse {
    fn has_synced(&self) -> bool {
        self.synced_lyrics.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    fn has_lyrics(&self) -> bool {
        self.has_synced() || self.plain_lyrics.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    fn duration_secs(&self) -> Option<u32> {
        let duration = self.duration?.round();
        if duration.is_finite() && duration >= 0.0 && duration <= f64::from(u32::MAX) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Some(duration as u32)
        } else {
            None
        }
    }

    fn score(&self, query: &LyricsQuery) -> u32 {
        query.match_score(&CandidateInfo {
            title: &self.track_name,
            artist: &self.artist_name,
            album: self.album_name.as_deref(),
            duration_secs: self.duration_secs(),
        })
    }
}

#[async_trait]
impl LyricsProvider for LrclibProvider {
    fn name(&self) -> &'static str {
        config::PROVIDER_NAME
    }

    async fn fetch(&self, query: &LyricsQuery) -> Result<FetchedLyrics, CoreError> {
        info!(
            target: LOG_TARGET,
            "Fetching lyrics from LRCLIB for: {} - {} (duration: {:?}s)",
            query.artist_name, query.track_name, query.duration_secs
        );

        // Try the /get endpoint first for exact match with artist + track + album + duration
        let mut url = format!(
            "{}/get?artist_name={}&track_name={}",
            self.base_url,
            urlencoding::encode(&query.artist_name),
            urlencoding::encode(&query.track_name)
        );

        if let Some(ref album) = query.album_name {
            use std::fmt::Write;
            let _ = write!(url, "&album_name={}", urlencoding::encode(album));
        }

        if let Some(duration) = query.duration_secs {
            use std::fmt::Write;
            let _ = write!(url, "&duration={duration}");
        }

        debug!(target: LOG_TARGET, "LRCLIB GET (exact match): {}", url);

        let response = self.client.get(&url).send().await?;
        debug!(target: LOG_TARGET, "LRCLIB response status: {}", response.status());

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            info!(target: LOG_TARGET, "LRCLIB exact match not found, searching candidates");
            return self.search(query).await;
        }

        if !response.status().is_success() {
            return Err(self.status_error(response.status()));
        }

        let result: LrclibResponse = response.json().await?;
        info!(target: LOG_TARGET, "LRCLIB found match with id: {}", result.id);
        Ok(parse_response(result))
    }
}

impl LrclibProvider {
    /// Search by track and artist, then by free text, keeping the best
    /// scoring candidate
    async fn search(&self, query: &LyricsQuery) -> Result<FetchedLyrics, CoreError> {
        let by_fields = format!(
            "{}/search?track_name={}&artist_name={}",
            self.base_url,
            urlencoding::encode(&query.track_name),
            urlencoding::encode(&query.artist_name)
        );
        if let Some(best) = select_best(self.search_candidates(&by_fields).await?, query) {
            info!(
                target: LOG_TARGET,
                "LRCLIB found match by track + artist (id: {}, {} - {})",
                best.id, best.artist_name, best.track_name
            );
            return Ok(parse_response(best));
        }

        let free_text = format!(
            "{}/search?q={}",
            self.base_url,
            urlencoding::encode(&format!("{} {}", query.artist_name, query.track_name))
        );
        if let Some(best) = select_best(self.search_candidates(&free_text).await?, query) {
            info!(
                target: LOG_TARGET,
                "LRCLIB found match via full search (id: {}, {} - {})",
                best.id, best.artist_name, best.track_name
            );
            return Ok(parse_response(best));
        }

        info!(
            target: LOG_TARGET,
            "LRCLIB has no candidate matching {} - {}", query.artist_name, query.track_name
        );
        Ok(FetchedLyrics::not_found())
    }

    async fn search_candidates(&self, url: &str) -> Result<Vec<LrclibResponse>, CoreError> {
        debug!(target: LOG_TARGET, "LRCLIB GET (search): {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(self.status_error(response.status()));
        }
        Ok(response.json().await?)
    }

    fn status_error(&self, status: reqwest::StatusCode) -> CoreError {
        warn!(target: LOG_TARGET, "LRCLIB returned status: {}", status);
        CoreError::LyricsProviderFailed {
            provider: self.name().to_string(),
            reason: format!("LRCLIB returned status: {status}"),
        }
    }
}

/// Best candidate at or above the match threshold, preferring synced lyrics
/// and then the higher score
fn select_best(candidates: Vec<LrclibResponse>, query: &LyricsQuery) -> Option<LrclibResponse> {
    candidates
        .into_iter()
        .filter(|c| c.instrumental || c.has_lyrics())
        .map(|c| (c.score(query), c))
        .filter(|(score, c)| {
            debug!(
                target: LOG_TARGET,
                "Candidate {} ({} - {}): score {}", c.id, c.artist_name, c.track_name, score
            );
            *score >= MIN_MATCH_SCORE
        })
        .max_by_key(|(score, c)| (c.has_synced(), *score))
        .map(|(_, c)| c)
}

fn parse_response(result: LrclibResponse) -> FetchedLyrics {
    let provider_id = result.id.to_string();

    if result.instrumental {
        debug!(target: LOG_TARGET, "Track is instrumental (lrclib id: {})", result.id);
        return FetchedLyrics {
            result: LyricsResult::NotFound,
            provider_id,
        };
    }

    // Prefer synced lyrics
    if let Some(synced) = result.synced_lyrics.as_deref() {
        let lrc = LrcFile::parse(synced);
        if !lrc.is_empty() {
            debug!(
                target: LOG_TARGET,
                "Got synced lyrics with {} lines (lrclib id: {})",
                lrc.lines.len(),
                result.id
            );
            return FetchedLyrics {
                result: LyricsResult::Synced(lrc),
                provider_id,
            };
        }
    }

    // Fall back to plain lyrics
    if let Some(plain) = result.plain_lyrics {
        if !plain.trim().is_empty() {
            debug!(target: LOG_TARGET, "Got plain lyrics (lrclib id: {})", result.id);
            return FetchedLyrics {
                result: LyricsResult::Unsynced(plain),
                provider_id,
            };
        }
    }

    FetchedLyrics {
        result: LyricsResult::NotFound,
        provider_id,
    }
}
