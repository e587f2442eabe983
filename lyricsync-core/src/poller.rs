//! Playback polling: normalization, failure counting and backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::playback::{Connectivity, PlaybackState, PollOutcome, TrackIdentity};
use crate::source::PlaybackSource;
use crate::time::DurationExt;

const LOG_TARGET: &str = "lyricsync::poller";

/// Base delay for exponential backoff after failed polls
const BACKOFF_BASE_MS: u64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    /// Consecutive failures before connectivity is reported as disconnected
    pub disconnect_after_failures: u32,
    pub max_backoff: Duration,
}

impl PollerSettings {
    #[must_use]
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            disconnect_after_failures: config.disconnect_after_failures.max(1),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

/// Result of one poll
#[derive(Debug, Clone)]
pub struct PollReport {
    pub outcome: PollOutcome,
    /// New connectivity, only when it changed with this poll
    pub connectivity: Option<Connectivity>,
    /// The playing track differs from the previous poll's (including
    /// start and stop of playback)
    pub track_changed: bool,
}

/// Polls a [`PlaybackSource`] and turns its answers into [`PollOutcome`]s.
///
/// Transient failures never escape as errors: they become
/// [`PollOutcome::Unavailable`] and lengthen [`PlaybackPoller::next_delay`].
pub struct PlaybackPoller {
    source: Box<dyn PlaybackSource>,
    settings: PollerSettings,
    consecutive_failures: u32,
    connectivity: Connectivity,
    last_track: Option<TrackIdentity>,
}

impl PlaybackPoller {
    #[must_use]
    pub fn new(source: Box<dyn PlaybackSource>, settings: PollerSettings) -> Self {
        Self {
            source,
            settings,
            consecutive_failures: 0,
            connectivity: Connectivity::Connected,
            last_track: None,
        }
    }

    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    #[must_use]
    pub const fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Start polling in a background task on the poller's own timer.
    ///
    /// Every report is sent to `reports`. Notifying `poll_now` cuts the
    /// current wait short. Stops when the token is cancelled or the receiver
    /// is dropped.
    #[must_use]
    pub fn start(
        self,
        reports: mpsc::Sender<PollReport>,
        poll_now: Arc<Notify>,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(reports, poll_now, cancel_token))
    }

    async fn run(
        mut self,
        reports: mpsc::Sender<PollReport>,
        poll_now: Arc<Notify>,
        cancel_token: CancellationToken,
    ) {
        info!(target: LOG_TARGET, "Starting {} playback poller", self.source.name());

        loop {
            let report = tokio::select! {
                () = cancel_token.cancelled() => break,
                report = self.poll() => report,
            };
            if reports.send(report).await.is_err() {
                debug!(target: LOG_TARGET, "Report receiver dropped");
                break;
            }

            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.next_delay()) => {}
                () = poll_now.notified() => {
                    debug!(target: LOG_TARGET, "Early poll requested");
                }
            }
        }

        info!(target: LOG_TARGET, "Playback poller shutting down");
    }

    /// Poll the source once.
    ///
    /// Half the request latency is added to the reported position, assuming
    /// the position was sampled midway through the request.
    pub async fn poll(&mut self) -> PollReport {
        let result = self.source.fetch_playback().await;
        let observed_at = Instant::now();

        match result {
            Ok(Some(snapshot)) => {
                let connectivity = self.record_success();
                let latency_compensation = snapshot.request_latency / 2;
                let position_ms = (snapshot.progress + latency_compensation).as_millis_u64();

                let track_changed = self
                    .last_track
                    .as_ref()
                    .is_none_or(|last| !last.is_same_track(&snapshot.track));
                if track_changed {
                    info!(target: LOG_TARGET, "Now playing: {}", snapshot.track);
                }

                debug!(
                    target: LOG_TARGET,
                    "Polled {}: playing={}, track={}, position={}ms (latency {:?})",
                    self.source.name(),
                    snapshot.is_playing,
                    snapshot.track,
                    position_ms,
                    snapshot.request_latency
                );

                self.last_track = Some(snapshot.track.clone());
                PollReport {
                    outcome: PollOutcome::Active(PlaybackState::new(
                        snapshot.track,
                        position_ms,
                        snapshot.is_playing,
                        observed_at,
                    )),
                    connectivity,
                    track_changed,
                }
            }
            Ok(None) => {
                let connectivity = self.record_success();
                let track_changed = self.last_track.take().is_some();
                if track_changed {
                    info!(target: LOG_TARGET, "Playback stopped");
                }
                PollReport {
                    outcome: PollOutcome::Stopped,
                    connectivity,
                    track_changed,
                }
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    target: LOG_TARGET,
                    "Poll error (attempt {}): {}", self.consecutive_failures, e
                );

                let next = if self.consecutive_failures >= self.settings.disconnect_after_failures {
                    Connectivity::Disconnected
                } else {
                    Connectivity::Degraded
                };
                PollReport {
                    outcome: PollOutcome::Unavailable {
                        reason: e.to_string(),
                    },
                    connectivity: self.set_connectivity(next),
                    track_changed: false,
                }
            }
        }
    }

    /// Delay before the next poll: the poll interval, or an exponential
    /// backoff (100ms * 2^failures, capped) after consecutive failures.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return self.settings.poll_interval;
        }

        let backoff_ms = BACKOFF_BASE_MS
            .saturating_mul(2_u64.saturating_pow(self.consecutive_failures.min(10)));
        let backoff = Duration::from_millis(backoff_ms.min(self.settings.max_backoff.as_millis_u64()));
        backoff.max(self.settings.poll_interval)
    }

    fn record_success(&mut self) -> Option<Connectivity> {
        if self.consecutive_failures > 0 {
            info!(
                target: LOG_TARGET,
                "{} reachable again after {} failed polls",
                self.source.name(),
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.set_connectivity(Connectivity::Connected)
    }

    fn set_connectivity(&mut self, next: Connectivity) -> Option<Connectivity> {
        if next == self.connectivity {
            return None;
        }
        info!(target: LOG_TARGET, "Connectivity: {} -> {}", self.connectivity, next);
        self.connectivity = next;
        Some(next)
    }
}
