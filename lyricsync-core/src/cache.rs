use crate::error::Result;
use crate::playback::TrackIdentity;
use crate::timeline::{LyricTimeline, TimelineSource};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "lyricsync::cache";

const SCHEMA_SQL: &str = r"
-- Normalized timelines, one immutable row per track key
CREATE TABLE IF NOT EXISTS timelines (
    cache_key TEXT PRIMARY KEY,
    artist TEXT NOT NULL,
    title TEXT NOT NULL,
    provider TEXT NOT NULL,
    content TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
);

-- Access bookkeeping for eviction, kept apart so entries are never rewritten
CREATE TABLE IF NOT EXISTS timeline_access (
    cache_key TEXT PRIMARY KEY,
    last_accessed_at INTEGER NOT NULL,
    access_seq INTEGER NOT NULL,
    FOREIGN KEY (cache_key) REFERENCES timelines(cache_key) ON DELETE CASCADE
);

-- Per-track timing offsets chosen by the user
CREATE TABLE IF NOT EXISTS track_offsets (
    cache_key TEXT PRIMARY KEY,
    offset_ms INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Tracks for which no lyrics were found
CREATE TABLE IF NOT EXISTS lyrics_not_found (
    cache_key TEXT PRIMARY KEY,
    artist TEXT NOT NULL,
    title TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_timeline_access_seq ON timeline_access(access_seq);
CREATE INDEX IF NOT EXISTS idx_timelines_fetched_at ON timelines(fetched_at);
";

/// Stable hash of a track identity.
///
/// Uses the provider id when there is one, otherwise lowercased title and
/// artist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn for_track(track: &TrackIdentity) -> Self {
        let material = track.provider_id.as_ref().map_or_else(
            || {
                format!(
                    "meta:{}\u{1f}{}",
                    track.title.trim().to_lowercase(),
                    track.artist.trim().to_lowercase()
                )
            },
            |id| format!("id:{id}"),
        );

        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A timeline read back from the cache
#[derive(Debug, Clone)]
pub struct CachedTimeline {
    /// Stored timeline, with `source` set to [`TimelineSource::Cached`]
    pub timeline: LyricTimeline,
    /// Lyric provider that produced the entry
    pub provider: String,
    pub fetched_at: DateTime<Utc>,
}

impl CachedTimeline {
    /// Whether the entry is older than `ttl_days` at `now`. A TTL of zero
    /// never expires.
    #[must_use]
    pub fn is_stale(&self, ttl_days: u32, now: DateTime<Utc>) -> bool {
        ttl_days > 0 && now - self.fetched_at > chrono::Duration::days(i64::from(ttl_days))
    }
}

enum Lookup {
    Hit {
        timeline: LyricTimeline,
        provider: String,
        fetched_at: i64,
    },
    Miss,
    Corrupt(String),
}

/// SQLite-based timeline cache
pub struct LyricsCache {
    conn: Connection,
    max_entries: Option<u32>,
}

impl LyricsCache {
    /// Create a new cache at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the cache database cannot be created or opened.
    pub async fn new() -> Result<Self> {
        let cache_path = crate::paths::lyrics_cache_db_path();
        Self::open(&cache_path).await
    }

    /// Open a cache at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!(target: LOG_TARGET, "Opening lyrics cache database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
        .await?;

        info!(target: LOG_TARGET, "Lyrics cache database initialized");
        Ok(Self {
            conn,
            max_entries: None,
        })
    }

    /// Open a throwaway in-memory cache
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            max_entries: None,
        })
    }

    /// Bound the number of stored timelines; zero means unbounded
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: u32) -> Self {
        self.max_entries = if max_entries == 0 {
            None
        } else {
            Some(max_entries)
        };
        self
    }

    /// Look up the timeline for a track.
    ///
    /// Entries that fail to decode are removed and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, track: &TrackIdentity) -> Result<Option<CachedTimeline>> {
        let key = CacheKey::for_track(track);
        debug!(target: LOG_TARGET, "Looking up cached timeline for {} ({})", track, key.as_str());

        let now = Utc::now().timestamp();
        let lookup_key = key.0.clone();
        let lookup = self
            .conn
            .call(move |conn| {
                let row = {
                    let mut stmt = conn.prepare_cached(
                        "SELECT content, provider, fetched_at FROM timelines WHERE cache_key = ?1",
                    )?;
                    stmt.query_row(rusqlite::params![lookup_key], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    })
                    .optional()?
                };

                let Some((content, provider, fetched_at)) = row else {
                    return Ok(Lookup::Miss);
                };

                match decode_timeline(&content) {
                    Ok(timeline) => {
                        touch(conn, &lookup_key, now)?;
                        Ok(Lookup::Hit {
                            timeline,
                            provider,
                            fetched_at,
                        })
                    }
                    Err(reason) => {
                        conn.execute(
                            "DELETE FROM timelines WHERE cache_key = ?1",
                            rusqlite::params![lookup_key],
                        )?;
                        Ok(Lookup::Corrupt(reason))
                    }
                }
            })
            .await?;

        match lookup {
            Lookup::Hit {
                timeline,
                provider,
                fetched_at,
            } => Ok(Some(CachedTimeline {
                timeline: timeline.with_source(TimelineSource::Cached),
                provider,
                fetched_at: DateTime::from_timestamp(fetched_at, 0).unwrap_or_else(Utc::now),
            })),
            Lookup::Miss => Ok(None),
            Lookup::Corrupt(reason) => {
                warn!(
                    target: LOG_TARGET,
                    "Dropped unreadable cache entry for {}: {}", track, reason
                );
                Ok(None)
            }
        }
    }

    /// Store a timeline as a new entry, replacing any previous entry for the
    /// same track, then enforce the size bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeline cannot be encoded or stored.
    pub async fn put(&self, track: &TrackIdentity, timeline: &LyricTimeline, provider: &str) -> Result<()> {
        self.put_at(track, timeline, provider, Utc::now()).await
    }

    pub(crate) async fn put_at(
        &self,
        track: &TrackIdentity,
        timeline: &LyricTimeline,
        provider: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        info!(
            target: LOG_TARGET,
            "Storing timeline in cache: {} ({} lines, provider: {})",
            track,
            timeline.len(),
            provider
        );

        let key = CacheKey::for_track(track).0;
        let content = serde_json::to_string(timeline)?;
        let artist = track.artist.clone();
        let title = track.title.clone();
        let provider = provider.to_string();
        let fetched_at = fetched_at.timestamp();
        let max_entries = self.max_entries;

        let evicted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM timelines WHERE cache_key = ?1",
                    rusqlite::params![key],
                )?;
                tx.execute(
                    r"
                    INSERT INTO timelines (cache_key, artist, title, provider, content, fetched_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                    rusqlite::params![key, artist, title, provider, content, fetched_at],
                )?;
                touch(&tx, &key, fetched_at)?;
                let evicted = match max_entries {
                    Some(max) => evict_oldest(&tx, max)?,
                    None => 0,
                };
                tx.commit()?;
                Ok(evicted)
            })
            .await?;

        if evicted > 0 {
            debug!(target: LOG_TARGET, "Evicted {} cache entries beyond the size bound", evicted);
        }
        Ok(())
    }

    /// Drop least recently accessed entries until at most `max_entries` remain
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn evict_to(&self, max_entries: u32) -> Result<usize> {
        self.conn
            .call(move |conn| Ok(evict_oldest(conn, max_entries)?))
            .await
            .map_err(Into::into)
    }

    /// Number of stored timelines
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn entry_count(&self) -> Result<usize> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM timelines", [], |row| row.get(0))?;
                Ok(usize::try_from(count).unwrap_or(0))
            })
            .await
            .map_err(Into::into)
    }

    /// Saved timing offset for a track, zero when none was saved
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_offset(&self, track: &TrackIdentity) -> Result<i64> {
        let key = CacheKey::for_track(track).0;
        self.conn
            .call(move |conn| {
                let offset = conn
                    .prepare_cached("SELECT offset_ms FROM track_offsets WHERE cache_key = ?1")?
                    .query_row(rusqlite::params![key], |row| row.get::<_, i64>(0))
                    .optional()?;
                Ok(offset.unwrap_or(0))
            })
            .await
            .map_err(Into::into)
    }

    /// Save a timing offset for a track; zero removes the record
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn set_offset(&self, track: &TrackIdentity, offset_ms: i64) -> Result<()> {
        let key = CacheKey::for_track(track).0;
        let now = Utc::now().timestamp();
        self.conn
            .call(move |conn| {
                if offset_ms == 0 {
                    conn.execute(
                        "DELETE FROM track_offsets WHERE cache_key = ?1",
                        rusqlite::params![key],
                    )?;
                } else {
                    conn.execute(
                        r"
                        INSERT INTO track_offsets (cache_key, offset_ms, updated_at)
                        VALUES (?1, ?2, ?3)
                        ON CONFLICT(cache_key) DO UPDATE SET
                            offset_ms = excluded.offset_ms,
                            updated_at = excluded.updated_at
                    ",
                        rusqlite::params![key, offset_ms, now],
                    )?;
                }
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    /// Remember that no lyrics exist for a track
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn record_not_found(&self, track: &TrackIdentity) -> Result<()> {
        self.record_not_found_at(track, Utc::now()).await
    }

    pub(crate) async fn record_not_found_at(
        &self,
        track: &TrackIdentity,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let key = CacheKey::for_track(track).0;
        let artist = track.artist.clone();
        let title = track.title.clone();
        let at = at.timestamp();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO lyrics_not_found (cache_key, artist, title, recorded_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(cache_key) DO UPDATE SET recorded_at = excluded.recorded_at
                ",
                    rusqlite::params![key, artist, title, at],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    /// When the track was last recorded as having no lyrics
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn not_found_since(&self, track: &TrackIdentity) -> Result<Option<DateTime<Utc>>> {
        let key = CacheKey::for_track(track).0;
        let recorded_at = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .prepare_cached("SELECT recorded_at FROM lyrics_not_found WHERE cache_key = ?1")?
                    .query_row(rusqlite::params![key], |row| row.get::<_, i64>(0))
                    .optional()?)
            })
            .await?;
        Ok(recorded_at.and_then(|ts| DateTime::from_timestamp(ts, 0)))
    }

    /// Forget a not-found record
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn clear_not_found(&self, track: &TrackIdentity) -> Result<()> {
        let key = CacheKey::for_track(track).0;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM lyrics_not_found WHERE cache_key = ?1",
                    rusqlite::params![key],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    /// Delete expired rows.
    ///
    /// Timelines are removed once they are older than twice `ttl_days`, so a
    /// stale entry stays available as a fallback for one more TTL period.
    /// Not-found records older than `ttl_days` are removed. A TTL of zero
    /// keeps everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cleanup fails.
    pub async fn cleanup(&self, ttl_days: u32) -> Result<usize> {
        if ttl_days == 0 {
            return Ok(0);
        }
        let ttl_secs = i64::from(ttl_days) * 24 * 60 * 60;
        let now = Utc::now().timestamp();
        let timeline_cutoff = now - 2 * ttl_secs;
        let not_found_cutoff = now - ttl_secs;

        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM timelines WHERE fetched_at < ?1",
                    rusqlite::params![timeline_cutoff],
                )?;
                conn.execute(
                    "DELETE FROM lyrics_not_found WHERE recorded_at < ?1",
                    rusqlite::params![not_found_cutoff],
                )?;
                Ok(deleted)
            })
            .await?;

        if deleted > 0 {
            info!(target: LOG_TARGET, "Removed {} expired cache entries", deleted);
        }
        Ok(deleted)
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

/// Decode a stored timeline, rejecting entries whose lines are out of order
fn decode_timeline(content: &str) -> std::result::Result<LyricTimeline, String> {
    let timeline: LyricTimeline = serde_json::from_str(content).map_err(|e| e.to_string())?;
    if timeline
        .lines
        .windows(2)
        .any(|pair| pair[0].start_ms >= pair[1].start_ms)
    {
        return Err("line start times are not strictly increasing".to_string());
    }
    Ok(timeline)
}

/// Record an access for eviction ordering
fn touch(conn: &rusqlite::Connection, key: &str, at: i64) -> rusqlite::Result<()> {
    conn.execute(
        r"
        INSERT INTO timeline_access (cache_key, last_accessed_at, access_seq)
        VALUES (?1, ?2, (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM timeline_access))
        ON CONFLICT(cache_key) DO UPDATE SET
            last_accessed_at = excluded.last_accessed_at,
            access_seq = excluded.access_seq
    ",
        rusqlite::params![key, at],
    )?;
    Ok(())
}

fn evict_oldest(conn: &rusqlite::Connection, max_entries: u32) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM timelines", [], |row| row.get(0))?;
    let excess = count - i64::from(max_entries);
    if excess <= 0 {
        return Ok(0);
    }

    conn.execute(
        r"
        DELETE FROM timelines WHERE cache_key IN (
            SELECT t.cache_key FROM timelines t
            LEFT JOIN timeline_access a ON a.cache_key = t.cache_key
            ORDER BY COALESCE(a.access_seq, 0) ASC, t.fetched_at ASC
            LIMIT ?1
        )
    ",
        rusqlite::params![excess],
    )
}
