use crate::config::LyricsyncConfig;
use crate::fetcher::Resolution;
use crate::index::{TimelineCursor, TimelineIndex};
use crate::playback::{Connectivity, PlaybackState, PollOutcome, TrackIdentity};
use crate::poller::PollReport;
use crate::time::ms_to_i64;
use crate::timeline::{LyricLine, LyricTimeline, TimelineSource, TranslationKind, TranslationMode};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

const LOG_TARGET: &str = "lyricsync::sync";

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A different track started; its lyrics are being resolved
    TrackChanged {
        track: TrackIdentity,
        position_ms: u64,
        is_playing: bool,
    },
    /// A timeline was attached to the current track
    TimelineLoaded {
        track: TrackIdentity,
        line_count: usize,
        source: TimelineSource,
    },
    /// The active line changed
    LineChanged {
        track: TrackIdentity,
        index: usize,
        text: String,
        /// Translated text, empty when none is shown
        translated_text: String,
        start_ms: u64,
        end_ms: u64,
    },
    /// No line is active any more
    LineCleared,
    PlaybackPaused {
        position_ms: u64,
    },
    PlaybackResumed {
        position_ms: u64,
    },
    /// Nothing is playing; the engine is idle
    PlaybackStopped,
    /// A seek occurred within the current track
    SeekOccurred {
        from_ms: u64,
        to_ms: u64,
    },
    ConnectivityChanged {
        connectivity: Connectivity,
    },
    TranslationChanged {
        mode: TranslationMode,
    },
    OffsetChanged {
        track: TrackIdentity,
        offset_ms: i64,
    },
}

/// Engine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No track
    Idle,
    /// Track known, timeline being resolved
    Loading,
    /// Timeline attached (possibly empty) and playback running
    Synced,
    /// Timeline attached, playback paused; the active line is frozen
    Paused,
}

/// Tag for an in-flight resolution. Results are applied only while the
/// ticket is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTicket {
    pub generation: u64,
    pub track: TrackIdentity,
}

/// Tuning parameters for the engine
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_extrapolation_ms: u64,
    pub seek_threshold_ms: u64,
    /// Consecutive unavailable polls after which the engine goes idle
    pub idle_after_misses: u32,
    pub alignment_tolerance_ms: u64,
    pub translation: TranslationMode,
}

impl SyncSettings {
    #[must_use]
    pub fn from_config(config: &LyricsyncConfig) -> Self {
        Self {
            max_extrapolation_ms: config.playback.max_extrapolation_ms(),
            seek_threshold_ms: config.playback.seek_threshold_ms(),
            idle_after_misses: config.playback.idle_after_misses.max(1),
            alignment_tolerance_ms: config.lyrics.alignment_tolerance_ms,
            translation: config.lyrics.translation.clone(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&LyricsyncConfig::default())
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub track: Option<TrackIdentity>,
    pub line_index: Option<usize>,
    pub current_line: Option<LyricLine>,
    /// Extrapolated position including the offset
    pub position_ms: Option<i64>,
    pub offset_ms: i64,
    pub drift_ms: i64,
    pub translation: TranslationMode,
    pub available_translations: Vec<TranslationKind>,
    pub connectivity: Connectivity,
    pub line_count: usize,
    pub source: Option<TimelineSource>,
}

/// The synchronization state machine.
///
/// Pure and synchronous: every operation takes the current `Instant`, and
/// emitted events collect in an outbox drained with
/// [`SyncCore::take_events`].
#[derive(Debug)]
pub struct SyncCore {
    settings: SyncSettings,
    phase: SyncPhase,
    track: Option<TrackIdentity>,
    last_state: Option<PlaybackState>,
    timeline: Option<LyricTimeline>,
    /// Copy of `timeline` with the selected translation attached
    display: Option<LyricTimeline>,
    index: TimelineIndex,
    cursor: TimelineCursor,
    line: Option<usize>,
    /// The next line refresh may move to an earlier line
    rewind_allowed: bool,
    /// The next line refresh re-emits the active line even if unchanged
    reannounce: bool,
    generation: u64,
    offset_ms: i64,
    drift_ms: i64,
    misses: u32,
    translation: TranslationMode,
    connectivity: Connectivity,
    events: Vec<SyncEvent>,
}

impl SyncCore {
    #[must_use]
    pub fn new(settings: SyncSettings) -> Self {
        let translation = settings.translation.clone();
        Self {
            settings,
            phase: SyncPhase::Idle,
            track: None,
            last_state: None,
            timeline: None,
            display: None,
            index: TimelineIndex::default(),
            cursor: TimelineCursor::new(),
            line: None,
            rewind_allowed: false,
            reannounce: false,
            generation: 0,
            offset_ms: 0,
            drift_ms: 0,
            misses: 0,
            translation,
            connectivity: Connectivity::Connected,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Drain events emitted since the last call
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    /// Apply one poll outcome.
    ///
    /// Returns a ticket when a new track needs its timeline resolved; any
    /// previously issued ticket stops being current.
    pub fn apply_poll(&mut self, outcome: PollOutcome, now: Instant) -> Option<ResolutionTicket> {
        match outcome {
            PollOutcome::Active(state) => {
                self.misses = 0;
                let same_track = self
                    .track
                    .as_ref()
                    .is_some_and(|current| current.is_same_track(&state.track));
                if same_track {
                    self.observe(state, now);
                    None
                } else {
                    Some(self.start_track(state))
                }
            }
            PollOutcome::Stopped => {
                if self.track.is_some() {
                    info!(target: LOG_TARGET, "Playback stopped, engine idle");
                    self.go_idle();
                }
                None
            }
            PollOutcome::Unavailable { reason } => {
                if self.phase != SyncPhase::Idle {
                    self.misses = self.misses.saturating_add(1);
                    debug!(
                        target: LOG_TARGET,
                        "Playback unavailable ({} of {}): {}",
                        self.misses,
                        self.settings.idle_after_misses,
                        reason
                    );
                    if self.misses >= self.settings.idle_after_misses {
                        info!(
                            target: LOG_TARGET,
                            "Playback unavailable for {} polls, engine idle", self.misses
                        );
                        self.go_idle();
                    }
                }
                None
            }
        }
    }

    /// Record a connectivity change reported by the poller
    pub fn set_connectivity(&mut self, connectivity: Connectivity) {
        if connectivity != self.connectivity {
            self.connectivity = connectivity;
            self.events.push(SyncEvent::ConnectivityChanged { connectivity });
        }
    }

    /// Recompute the active line for `now`
    pub fn tick(&mut self, now: Instant) {
        self.refresh_line(now);
    }

    /// Whether `ticket` still refers to the engine's current resolution
    #[must_use]
    pub fn is_current(&self, ticket: &ResolutionTicket) -> bool {
        ticket.generation == self.generation
            && self
                .track
                .as_ref()
                .is_some_and(|track| track.is_same_track(&ticket.track))
    }

    /// Attach a resolved timeline.
    ///
    /// Returns `false` and changes nothing when the ticket was superseded.
    /// A degraded empty result does not replace lines already shown.
    pub fn complete_resolution(
        &mut self,
        ticket: &ResolutionTicket,
        resolution: Resolution,
        now: Instant,
    ) -> bool {
        if !self.is_current(ticket) {
            debug!(
                target: LOG_TARGET,
                "Discarding stale resolution for {} (generation {}, current {})",
                ticket.track,
                ticket.generation,
                self.generation
            );
            return false;
        }

        let keep_existing = resolution.degraded
            && resolution.timeline.is_empty()
            && self.timeline.as_ref().is_some_and(|t| !t.is_empty());
        if keep_existing {
            debug!(target: LOG_TARGET, "Keeping current lyrics; refresh for {} was degraded", ticket.track);
            return true;
        }

        let timeline = resolution.timeline;
        info!(
            target: LOG_TARGET,
            "Timeline loaded for {}: {} lines ({})",
            ticket.track,
            timeline.len(),
            timeline.source
        );

        self.offset_ms = resolution.offset_ms;
        self.events.push(SyncEvent::TimelineLoaded {
            track: ticket.track.clone(),
            line_count: timeline.len(),
            source: timeline.source,
        });
        self.timeline = Some(timeline);
        self.rebuild_display();

        if self.phase == SyncPhase::Loading {
            let playing = self.last_state.as_ref().is_some_and(|s| s.is_playing);
            self.phase = if playing {
                SyncPhase::Synced
            } else {
                SyncPhase::Paused
            };
        }

        self.refresh_line(now);
        true
    }

    /// Start a fresh resolution of the current track, superseding any in
    /// flight. `None` when no track is playing.
    pub fn refresh_lyrics(&mut self) -> Option<ResolutionTicket> {
        let track = self.track.clone()?;
        self.generation += 1;
        info!(target: LOG_TARGET, "Refreshing lyrics for {}", track);
        Some(ResolutionTicket {
            generation: self.generation,
            track,
        })
    }

    /// Cycle none → each translation the timeline has → none
    pub fn toggle_translation(&mut self, now: Instant) -> TranslationMode {
        let available = self
            .timeline
            .as_ref()
            .map(LyricTimeline::available_translations)
            .unwrap_or_default();

        let modes: Vec<TranslationMode> = std::iter::once(TranslationMode::None)
            .chain(available.into_iter().map(TranslationMode::from))
            .collect();
        let position = modes
            .iter()
            .position(|mode| *mode == self.translation)
            .unwrap_or(0);
        let next = modes
            .get((position + 1) % modes.len())
            .cloned()
            .unwrap_or_default();

        self.set_translation_mode(next.clone(), now);
        next
    }

    pub fn set_translation_mode(&mut self, mode: TranslationMode, now: Instant) {
        if mode == self.translation {
            return;
        }
        info!(target: LOG_TARGET, "Translation: {} -> {}", self.translation, mode);
        self.translation = mode.clone();
        self.events.push(SyncEvent::TranslationChanged { mode });
        self.rebuild_display();
        self.refresh_line(now);
    }

    /// Shift lyric timing for the current track. Positive offsets show lines
    /// earlier. Returns the track and its new offset for persisting.
    pub fn adjust_offset(&mut self, delta_ms: i64, now: Instant) -> Option<(TrackIdentity, i64)> {
        let track = self.track.clone()?;
        self.offset_ms = self.offset_ms.saturating_add(delta_ms);
        info!(target: LOG_TARGET, "Offset for {}: {} ms", track, self.offset_ms);
        self.events.push(SyncEvent::OffsetChanged {
            track: track.clone(),
            offset_ms: self.offset_ms,
        });
        self.rewind_allowed = true;
        self.refresh_line(now);
        Some((track, self.offset_ms))
    }

    /// The extrapolated position ran past the end of the track, so the
    /// source should be polled now rather than at the next interval
    #[must_use]
    pub fn needs_recalibration(&self, now: Instant) -> bool {
        self.phase == SyncPhase::Synced
            && self.last_state.as_ref().is_some_and(|state| state.past_end(now))
    }

    #[must_use]
    pub fn snapshot(&self, now: Instant) -> SyncSnapshot {
        let current_line = self
            .line
            .and_then(|i| self.display.as_ref().and_then(|d| d.lines.get(i)))
            .cloned();
        SyncSnapshot {
            phase: self.phase,
            track: self.track.clone(),
            line_index: self.line,
            current_line,
            position_ms: self.adjusted_position_ms(now),
            offset_ms: self.offset_ms,
            drift_ms: self.drift_ms,
            translation: self.translation.clone(),
            available_translations: self
                .timeline
                .as_ref()
                .map(LyricTimeline::available_translations)
                .unwrap_or_default(),
            connectivity: self.connectivity,
            line_count: self.timeline.as_ref().map_or(0, LyricTimeline::len),
            source: self.timeline.as_ref().map(|t| t.source),
        }
    }

    fn start_track(&mut self, state: PlaybackState) -> ResolutionTicket {
        if self.line.take().is_some() {
            self.events.push(SyncEvent::LineCleared);
        }
        self.reset_track_state();

        info!(target: LOG_TARGET, "Track changed: {}", state.track);
        self.generation += 1;
        self.phase = SyncPhase::Loading;
        self.track = Some(state.track.clone());
        self.events.push(SyncEvent::TrackChanged {
            track: state.track.clone(),
            position_ms: state.position_ms,
            is_playing: state.is_playing,
        });

        let ticket = ResolutionTicket {
            generation: self.generation,
            track: state.track.clone(),
        };
        self.last_state = Some(state);
        ticket
    }

    /// Fold a new observation of the current track into the state
    fn observe(&mut self, state: PlaybackState, now: Instant) {
        if let Some(last) = &self.last_state {
            let expected = last.expected_position_ms(state.observed_at);
            let deviation = ms_to_i64(state.position_ms) - ms_to_i64(expected);

            if deviation.unsigned_abs() > self.settings.seek_threshold_ms {
                info!(
                    target: LOG_TARGET,
                    "Seek detected: expected {}ms, got {}ms", expected, state.position_ms
                );
                self.events.push(SyncEvent::SeekOccurred {
                    from_ms: expected,
                    to_ms: state.position_ms,
                });
                self.drift_ms = 0;
                self.cursor.reset();
                self.rewind_allowed = true;
            } else {
                self.drift_ms = (self.drift_ms * 3 + deviation) / 4;
            }

            if last.is_playing && !state.is_playing {
                self.events.push(SyncEvent::PlaybackPaused {
                    position_ms: state.position_ms,
                });
                if self.phase == SyncPhase::Synced {
                    self.phase = SyncPhase::Paused;
                }
            } else if !last.is_playing && state.is_playing {
                self.events.push(SyncEvent::PlaybackResumed {
                    position_ms: state.position_ms,
                });
                if self.phase == SyncPhase::Paused {
                    self.phase = SyncPhase::Synced;
                }
            }
        }

        self.last_state = Some(state);
        self.refresh_line(now);
    }

    fn go_idle(&mut self) {
        if self.line.take().is_some() {
            self.events.push(SyncEvent::LineCleared);
        }
        self.reset_track_state();
        self.generation += 1;
        self.phase = SyncPhase::Idle;
        self.track = None;
        self.events.push(SyncEvent::PlaybackStopped);
    }

    fn reset_track_state(&mut self) {
        self.last_state = None;
        self.timeline = None;
        self.display = None;
        self.index = TimelineIndex::default();
        self.cursor.reset();
        self.line = None;
        self.rewind_allowed = false;
        self.reannounce = false;
        self.offset_ms = 0;
        self.drift_ms = 0;
        self.misses = 0;
    }

    fn rebuild_display(&mut self) {
        self.display = self.timeline.as_ref().map(|timeline| {
            timeline.with_translation(&self.translation, self.settings.alignment_tolerance_ms)
        });
        self.index = self
            .display
            .as_ref()
            .map(TimelineIndex::new)
            .unwrap_or_default();
        self.cursor.reset();
        self.rewind_allowed = true;
        self.reannounce = true;
    }

    fn adjusted_position_ms(&self, now: Instant) -> Option<i64> {
        let state = self.last_state.as_ref()?;
        let position = state.extrapolated_position_ms(now, self.settings.max_extrapolation_ms);
        Some(ms_to_i64(position).saturating_add(self.offset_ms))
    }

    /// Move to the line active at the adjusted position.
    ///
    /// Small corrections from a poll never move the line backward; the current
    /// line is held until the position catches up. Only seeks, offset
    /// changes and new display timelines may rewind.
    fn refresh_line(&mut self, now: Instant) {
        let rewind_allowed = std::mem::take(&mut self.rewind_allowed);
        let reannounce = std::mem::take(&mut self.reannounce);
        if !matches!(self.phase, SyncPhase::Synced | SyncPhase::Paused) {
            return;
        }
        let Some(position) = self.adjusted_position_ms(now) else {
            return;
        };
        let (Some(display), Some(track)) = (&self.display, &self.track) else {
            return;
        };

        let next = self.cursor.lookup(&self.index, position);
        if !rewind_allowed && is_regression(self.line, next) {
            return;
        }
        if next == self.line && !(reannounce && next.is_some()) {
            return;
        }
        self.line = next;

        match next.and_then(|i| display.lines.get(i).map(|line| (i, line))) {
            Some((index, line)) => {
                debug!(target: LOG_TARGET, "Line {} at {}ms: {}", index, position, line.text);
                self.events.push(SyncEvent::LineChanged {
                    track: track.clone(),
                    index,
                    text: line.text.clone(),
                    translated_text: line.translated_text.clone().unwrap_or_default(),
                    start_ms: line.start_ms,
                    end_ms: line.end_ms,
                });
            }
            None => self.events.push(SyncEvent::LineCleared),
        }
    }
}

fn is_regression(current: Option<usize>, next: Option<usize>) -> bool {
    match (current, next) {
        (Some(current), Some(next)) => next < current,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Engine that synchronizes playback state and lyrics.
///
/// Wraps a [`SyncCore`] for shared async use and broadcasts its events.
pub struct SyncEngine {
    inner: RwLock<SyncCore>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create a new sync engine
    #[must_use]
    pub fn new(settings: SyncSettings) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            inner: RwLock::new(SyncCore::new(settings)),
            event_tx,
        })
    }

    /// Subscribe to sync events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Apply a poll report: connectivity first, then the outcome
    pub async fn apply_poll(&self, report: PollReport) -> Option<ResolutionTicket> {
        self.with_core(|core, now| {
            if let Some(connectivity) = report.connectivity {
                core.set_connectivity(connectivity);
            }
            core.apply_poll(report.outcome, now)
        })
        .await
    }

    pub async fn tick(&self) {
        self.with_core(SyncCore::tick).await;
    }

    /// Attach a resolution if its ticket is still current
    pub async fn complete_resolution(&self, ticket: &ResolutionTicket, resolution: Resolution) -> bool {
        self.with_core(|core, now| core.complete_resolution(ticket, resolution, now))
            .await
    }

    pub async fn is_current(&self, ticket: &ResolutionTicket) -> bool {
        self.inner.read().await.is_current(ticket)
    }

    pub async fn refresh_lyrics(&self) -> Option<ResolutionTicket> {
        self.with_core(|core, _| core.refresh_lyrics()).await
    }

    pub async fn toggle_translation(&self) -> TranslationMode {
        self.with_core(SyncCore::toggle_translation).await
    }

    pub async fn set_translation_mode(&self, mode: TranslationMode) {
        self.with_core(|core, now| core.set_translation_mode(mode, now))
            .await;
    }

    pub async fn adjust_offset(&self, delta_ms: i64) -> Option<(TrackIdentity, i64)> {
        self.with_core(|core, now| core.adjust_offset(delta_ms, now))
            .await
    }

    pub async fn needs_recalibration(&self) -> bool {
        self.inner.read().await.needs_recalibration(Instant::now())
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        self.inner.read().await.snapshot(Instant::now())
    }

    async fn with_core<R>(&self, f: impl FnOnce(&mut SyncCore, Instant) -> R) -> R {
        let (result, events) = {
            let mut core = self.inner.write().await;
            let result = f(&mut core, Instant::now());
            (result, core.take_events())
        };
        for event in events {
            // No subscribers is fine
            let _ = self.event_tx.send(event);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lrc::LrcFile;
    use std::time::Duration;

    const LRC: &str = "[00:00.00]zero\n[00:01.00]one\n[00:02.00]two\n[00:03.00]three\n[00:04.00]four\n[00:05.00]five\n";

    fn track(id: &str) -> TrackIdentity {
        TrackIdentity::new(format!("Song {id}"), "Artist", 10_000).with_provider_id(id)
    }

    fn active(track: &TrackIdentity, position_ms: u64, is_playing: bool, at: Instant) -> PollOutcome {
        PollOutcome::Active(PlaybackState::new(track.clone(), position_ms, is_playing, at))
    }

    fn resolution(track: &TrackIdentity, lrc: &str) -> Resolution {
        Resolution {
            timeline: LyricTimeline::from_lrc(track.clone(), &LrcFile::parse(lrc), TimelineSource::Fetched),
            offset_ms: 0,
            degraded: false,
        }
    }

    fn empty_resolution(track: &TrackIdentity) -> Resolution {
        Resolution {
            timeline: LyricTimeline::empty(track.clone()),
            offset_ms: 0,
            degraded: false,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn line_indices(events: &[SyncEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::LineChanged { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Engine synced on `track` at `position_ms`, events drained
    fn synced(track: &TrackIdentity, position_ms: u64, t0: Instant) -> SyncCore {
        let mut core = SyncCore::new(SyncSettings::default());
        let ticket = core.apply_poll(active(track, position_ms, true, t0), t0).unwrap();
        assert!(core.complete_resolution(&ticket, resolution(track, LRC), t0));
        core.take_events();
        core
    }

    #[test]
    fn test_new_track_loads_then_syncs() {
        let t0 = Instant::now();
        let mut core = SyncCore::new(SyncSettings::default());
        let x = track("x");

        let ticket = core.apply_poll(active(&x, 1_500, true, t0), t0).unwrap();
        assert_eq!(core.phase(), SyncPhase::Loading);
        assert_eq!(ticket.track, x);

        assert!(core.complete_resolution(&ticket, resolution(&x, LRC), t0));
        assert_eq!(core.phase(), SyncPhase::Synced);

        let events = core.take_events();
        assert!(matches!(events[0], SyncEvent::TrackChanged { .. }));
        assert!(matches!(events[1], SyncEvent::TimelineLoaded { line_count: 6, .. }));
        assert_eq!(line_indices(&events), vec![1]);
    }

    #[test]
    fn test_tick_advances_lines() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_500, t0);

        core.tick(t0 + ms(200));
        assert!(core.take_events().is_empty());

        core.tick(t0 + ms(500));
        let events = core.take_events();
        assert_eq!(line_indices(&events), vec![2]);
        let SyncEvent::LineChanged { text, start_ms, end_ms, translated_text, .. } = &events[0] else {
            panic!("expected line change");
        };
        assert_eq!(text, "two");
        assert_eq!((*start_ms, *end_ms), (2_000, 3_000));
        assert!(translated_text.is_empty());
    }

    #[test]
    fn test_extrapolation_is_capped() {
        let t0 = Instant::now();
        let mut core = synced(&track("x"), 1_000, t0);

        // Uncapped this would be 4000ms; the cap holds it at 1500ms
        core.tick(t0 + ms(3_000));
        assert!(core.take_events().is_empty());
        assert_eq!(core.snapshot(t0 + ms(3_000)).position_ms, Some(1_500));
    }

    #[test]
    fn test_seek_jumps_without_intermediate_lines() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_000, t0);

        let t1 = t0 + ms(500);
        assert!(core.apply_poll(active(&x, 4_000, true, t1), t1).is_none());
        core.tick(t1 + ms(50));

        let events = core.take_events();
        assert_eq!(
            events[0],
            SyncEvent::SeekOccurred {
                from_ms: 1_500,
                to_ms: 4_000
            }
        );
        assert_eq!(line_indices(&events), vec![4]);
    }

    #[test]
    fn test_small_discrepancy_updates_drift() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_000, t0);

        let t1 = t0 + ms(500);
        core.apply_poll(active(&x, 1_600, true, t1), t1);
        let events = core.take_events();
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::SeekOccurred { .. })));
        assert_eq!(core.snapshot(t1).drift_ms, 25);
    }

    #[test]
    fn test_small_backward_correction_holds_line() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_800, t0);

        core.tick(t0 + ms(400));
        assert_eq!(line_indices(&core.take_events()), vec![2]);

        // 450ms behind the extrapolation, below the 750ms seek threshold
        let t1 = t0 + ms(500);
        core.apply_poll(active(&x, 1_850, true, t1), t1);
        core.tick(t1 + ms(100));
        core.tick(t1 + ms(200));
        let events = core.take_events();
        assert!(line_indices(&events).is_empty(), "{events:?}");
        assert_eq!(core.snapshot(t1 + ms(200)).line_index, Some(2));

        // A real seek backward still rewinds
        let t2 = t1 + ms(300);
        core.apply_poll(active(&x, 500, true, t2), t2);
        let events = core.take_events();
        assert!(matches!(events[0], SyncEvent::SeekOccurred { .. }));
        assert_eq!(line_indices(&events), vec![0]);
    }

    #[test]
    fn test_refresh_to_empty_timeline_clears_line() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_000, t0);
        assert_eq!(core.snapshot(t0).line_index, Some(1));

        let ticket = core.refresh_lyrics().unwrap();
        assert!(core.complete_resolution(&ticket, empty_resolution(&x), t0));
        assert_eq!(
            core.take_events(),
            vec![
                SyncEvent::TimelineLoaded {
                    track: x,
                    line_count: 0,
                    source: TimelineSource::None
                },
                SyncEvent::LineCleared
            ]
        );
        assert_eq!(core.snapshot(t0).line_index, None);
    }

    #[test]
    fn test_refresh_with_later_first_line_clears_line() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_000, t0);

        let ticket = core.refresh_lyrics().unwrap();
        assert!(core.complete_resolution(&ticket, resolution(&x, "[00:05.00]late\n"), t0));
        let events = core.take_events();
        assert_eq!(events.last(), Some(&SyncEvent::LineCleared));
    }

    #[test]
    fn test_stale_resolution_discarded() {
        let t0 = Instant::now();
        let (x, y) = (track("x"), track("y"));
        let mut core = SyncCore::new(SyncSettings::default());

        let ticket_x = core.apply_poll(active(&x, 0, true, t0), t0).unwrap();
        let t1 = t0 + ms(500);
        let ticket_y = core.apply_poll(active(&y, 0, true, t1), t1).unwrap();

        assert!(!core.complete_resolution(&ticket_x, resolution(&x, LRC), t1));
        let snapshot = core.snapshot(t1);
        assert_eq!(snapshot.phase, SyncPhase::Loading);
        assert_eq!(snapshot.track, Some(y.clone()));
        assert_eq!(snapshot.line_count, 0);

        assert!(core.complete_resolution(&ticket_y, resolution(&y, LRC), t1));
        assert_eq!(core.snapshot(t1).track, Some(y));
    }

    #[test]
    fn test_not_found_then_later_lyrics_attach_mid_track() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = SyncCore::new(SyncSettings::default());

        let ticket = core.apply_poll(active(&x, 1_000, true, t0), t0).unwrap();
        assert!(core.complete_resolution(&ticket, empty_resolution(&x), t0));
        assert_eq!(core.phase(), SyncPhase::Synced);
        core.tick(t0 + ms(300));
        let snapshot = core.snapshot(t0 + ms(300));
        assert_eq!(snapshot.line_index, None);
        assert_eq!(snapshot.position_ms, Some(1_300));
        core.take_events();

        let t1 = t0 + ms(400);
        let refresh = core.refresh_lyrics().unwrap();
        assert!(core.complete_resolution(&refresh, resolution(&x, LRC), t1));
        let events = core.take_events();
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::TrackChanged { .. })));
        assert_eq!(line_indices(&events), vec![1]);
        assert_eq!(core.phase(), SyncPhase::Synced);
    }

    #[test]
    fn test_degraded_refresh_keeps_lines() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_000, t0);

        let ticket = core.refresh_lyrics().unwrap();
        let degraded = Resolution {
            degraded: true,
            ..empty_resolution(&x)
        };
        assert!(core.complete_resolution(&ticket, degraded, t0));
        assert_eq!(core.snapshot(t0).line_count, 6);
    }

    #[test]
    fn test_pause_freezes_line() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_000, t0);

        let t1 = t0 + ms(300);
        core.apply_poll(active(&x, 1_300, false, t1), t1);
        assert_eq!(core.phase(), SyncPhase::Paused);
        assert_eq!(
            core.take_events(),
            vec![SyncEvent::PlaybackPaused { position_ms: 1_300 }]
        );

        core.tick(t1 + ms(5_000));
        assert!(core.take_events().is_empty());
        assert_eq!(core.snapshot(t1 + ms(5_000)).position_ms, Some(1_300));

        let t2 = t1 + ms(6_000);
        core.apply_poll(active(&x, 1_300, true, t2), t2);
        assert_eq!(core.phase(), SyncPhase::Synced);
        assert_eq!(
            core.take_events(),
            vec![SyncEvent::PlaybackResumed { position_ms: 1_300 }]
        );
    }

    #[test]
    fn test_unavailable_retains_then_goes_idle() {
        let t0 = Instant::now();
        let mut core = synced(&track("x"), 1_000, t0);

        for _ in 0..9 {
            core.apply_poll(PollOutcome::Unavailable { reason: "timeout".into() }, t0);
        }
        assert_eq!(core.phase(), SyncPhase::Synced);
        assert!(core.take_events().is_empty());

        core.apply_poll(PollOutcome::Unavailable { reason: "timeout".into() }, t0);
        assert_eq!(core.phase(), SyncPhase::Idle);
        assert_eq!(
            core.take_events(),
            vec![SyncEvent::LineCleared, SyncEvent::PlaybackStopped]
        );
    }

    #[test]
    fn test_stopped_goes_idle_and_invalidates_ticket() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = SyncCore::new(SyncSettings::default());
        let ticket = core.apply_poll(active(&x, 0, true, t0), t0).unwrap();

        core.apply_poll(PollOutcome::Stopped, t0);
        assert_eq!(core.phase(), SyncPhase::Idle);
        assert!(!core.complete_resolution(&ticket, resolution(&x, LRC), t0));
        assert!(core.refresh_lyrics().is_none());
    }

    #[test]
    fn test_track_change_clears_line() {
        let t0 = Instant::now();
        let mut core = synced(&track("x"), 1_000, t0);

        let y = track("y");
        assert!(core.apply_poll(active(&y, 0, true, t0), t0).is_some());
        let events = core.take_events();
        assert_eq!(events[0], SyncEvent::LineCleared);
        assert!(matches!(events[1], SyncEvent::TrackChanged { .. }));
    }

    #[test]
    fn test_toggle_translation_cycles_available() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = SyncCore::new(SyncSettings::default());
        let ticket = core.apply_poll(active(&x, 1_000, true, t0), t0).unwrap();
        let lrc = "-*- type:non -*-\n[00:00.00]zero\n[00:01.00]one\n\
                   -*- type:romaji -*-\n[00:00.00]r0\n[00:01.00]r1\n\
                   -*- type:chinese -*-\n[00:00.00]z0\n[00:01.00]z1\n";
        core.complete_resolution(&ticket, resolution(&x, lrc), t0);
        core.take_events();

        assert_eq!(core.toggle_translation(t0), TranslationMode::Romaji);
        let events = core.take_events();
        assert_eq!(
            events[0],
            SyncEvent::TranslationChanged {
                mode: TranslationMode::Romaji
            }
        );
        let SyncEvent::LineChanged { translated_text, .. } = &events[1] else {
            panic!("expected line change");
        };
        assert_eq!(translated_text, "r1");

        assert_eq!(
            core.toggle_translation(t0),
            TranslationMode::Language("zh".into())
        );
        assert_eq!(core.toggle_translation(t0), TranslationMode::None);
    }

    #[test]
    fn test_toggle_without_translations_stays_none() {
        let t0 = Instant::now();
        let mut core = synced(&track("x"), 0, t0);
        assert_eq!(core.toggle_translation(t0), TranslationMode::None);
        assert!(core.take_events().is_empty());
    }

    #[test]
    fn test_offset_shifts_active_line() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 1_600, t0);

        let (offset_track, offset) = core.adjust_offset(500, t0).unwrap();
        assert_eq!((offset_track, offset), (x.clone(), 500));

        let events = core.take_events();
        assert_eq!(
            events[0],
            SyncEvent::OffsetChanged {
                track: x,
                offset_ms: 500
            }
        );
        assert_eq!(line_indices(&events), vec![2]);
    }

    #[test]
    fn test_resolution_offset_applied() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = SyncCore::new(SyncSettings::default());
        let ticket = core.apply_poll(active(&x, 1_600, true, t0), t0).unwrap();
        let res = Resolution {
            offset_ms: -1_000,
            ..resolution(&x, LRC)
        };
        core.complete_resolution(&ticket, res, t0);
        assert_eq!(core.snapshot(t0).line_index, Some(0));
    }

    #[test]
    fn test_needs_recalibration_past_end() {
        let t0 = Instant::now();
        let x = track("x");
        let mut core = synced(&x, 9_800, t0);
        assert!(!core.needs_recalibration(t0 + ms(100)));
        assert!(core.needs_recalibration(t0 + ms(300)));
    }

    #[test]
    fn test_connectivity_events_deduplicated() {
        let mut core = SyncCore::new(SyncSettings::default());
        core.set_connectivity(Connectivity::Connected);
        assert!(core.take_events().is_empty());
        core.set_connectivity(Connectivity::Degraded);
        assert_eq!(
            core.take_events(),
            vec![SyncEvent::ConnectivityChanged {
                connectivity: Connectivity::Degraded
            }]
        );
    }

    #[tokio::test]
    async fn test_engine_broadcasts_events() {
        let engine = SyncEngine::new(SyncSettings::default());
        let mut rx = engine.subscribe();
        let x = track("x");
        let now = Instant::now();

        let report = PollReport {
            outcome: active(&x, 0, true, now),
            connectivity: Some(Connectivity::Degraded),
            track_changed: true,
        };
        let ticket = engine.apply_poll(report).await.unwrap();
        assert!(engine.complete_resolution(&ticket, resolution(&x, LRC)).await);

        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::ConnectivityChanged { .. }));
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::TrackChanged { .. }));
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::TimelineLoaded { .. }));
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::LineChanged { index: 0, .. }));
        assert_eq!(engine.snapshot().await.phase, SyncPhase::Synced);
    }
}
