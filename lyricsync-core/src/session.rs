//! Drives a [`SyncEngine`] from a poller, a fetcher and user commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LyricsyncConfig;
use crate::fetcher::{LyricsFetcher, ResolveMode};
use crate::poller::{PlaybackPoller, PollReport};
use crate::sync::{ResolutionTicket, SyncEngine};
use crate::timeline::TranslationMode;

const LOG_TARGET: &str = "lyricsync::session";

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const REPORT_CHANNEL_CAPACITY: usize = 4;

/// Discrete user commands (hotkeys) sent into a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    RefreshLyrics,
    ToggleTranslation,
    SetTranslation(TranslationMode),
    /// Shift lyric timing by this many milliseconds
    AdjustOffset(i64),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub tick_interval: Duration,
    /// Delay before retrying a degraded resolution
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &LyricsyncConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.playback.tick_interval_ms.max(1)),
            retry_delay: Duration::from_millis(config.lyrics.retry_delay_ms),
            max_retries: config.lyrics.max_retries,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&LyricsyncConfig::default())
    }
}

/// Event loop tying polling, ticking, resolution and commands together.
///
/// The poller runs in its own task on its own timer (stretched by backoff
/// after failures) and sends reports over a channel, so ticks keep running
/// while a poll request is in flight. Each resolution runs as a spawned task
/// under a child cancellation token that is cancelled when superseded.
pub struct SyncSession {
    engine: Arc<SyncEngine>,
    /// Moved into its own task when the session runs
    poller: Option<PlaybackPoller>,
    poll_now: Arc<Notify>,
    fetcher: Arc<LyricsFetcher>,
    settings: SessionSettings,
    commands: mpsc::Receiver<EngineCommand>,
    cancel_token: CancellationToken,
    resolution_token: Option<CancellationToken>,
    /// Set once an end-of-track early poll was issued for the current track
    recalibrated: bool,
}

impl SyncSession {
    /// Create a session and the sender for its commands
    #[must_use]
    pub fn new(
        engine: Arc<SyncEngine>,
        poller: PlaybackPoller,
        fetcher: Arc<LyricsFetcher>,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Sender<EngineCommand>) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let session = Self {
            engine,
            poller: Some(poller),
            poll_now: Arc::new(Notify::new()),
            fetcher,
            settings,
            commands,
            cancel_token,
            resolution_token: None,
            recalibrated: false,
        };
        (session, command_tx)
    }

    /// Start the session in a background task
    #[must_use]
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the cancellation token fires
    pub async fn run(mut self) {
        let (report_tx, mut reports) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let poller_handle = self.poller.take().map(|poller| {
            info!(
                target: LOG_TARGET,
                "Starting sync session (source: {}, providers: {:?})",
                poller.source_name(),
                self.fetcher.provider_names()
            );
            poller.start(
                report_tx,
                Arc::clone(&self.poll_now),
                self.cancel_token.child_token(),
            )
        });

        let mut tick = tokio::time::interval(self.settings.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reports_open = true;
        let mut commands_open = true;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "Sync session shutting down");
                    break;
                }
                report = reports.recv(), if reports_open => {
                    match report {
                        Some(report) => self.apply_report(report).await,
                        None => reports_open = false,
                    }
                }
                _ = tick.tick() => {
                    self.engine.tick().await;
                    if !self.recalibrated && self.engine.needs_recalibration().await {
                        debug!(target: LOG_TARGET, "Position passed end of track, polling now");
                        self.recalibrated = true;
                        self.poll_now.notify_one();
                    }
                }
                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => commands_open = false,
                    }
                }
            }
        }

        if let Some(token) = self.resolution_token.take() {
            token.cancel();
        }
        drop(reports);
        if let Some(handle) = poller_handle {
            if let Err(e) = handle.await {
                debug!(target: LOG_TARGET, "Poller task ended abnormally: {}", e);
            }
        }
    }

    async fn apply_report(&mut self, report: PollReport) {
        if report.track_changed {
            self.recalibrated = false;
            if let Some(token) = self.resolution_token.take() {
                token.cancel();
            }
        }
        if let Some(ticket) = self.engine.apply_poll(report).await {
            self.spawn_resolution(ticket, ResolveMode::Normal);
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        debug!(target: LOG_TARGET, "Command: {:?}", command);
        match command {
            EngineCommand::RefreshLyrics => {
                if let Some(ticket) = self.engine.refresh_lyrics().await {
                    self.spawn_resolution(ticket, ResolveMode::Refresh);
                }
            }
            EngineCommand::ToggleTranslation => {
                self.engine.toggle_translation().await;
            }
            EngineCommand::SetTranslation(mode) => {
                self.engine.set_translation_mode(mode).await;
            }
            EngineCommand::AdjustOffset(delta_ms) => {
                if let Some((track, offset_ms)) = self.engine.adjust_offset(delta_ms).await {
                    let fetcher = Arc::clone(&self.fetcher);
                    tokio::spawn(async move {
                        fetcher.save_offset(&track, offset_ms).await;
                    });
                }
            }
        }
    }

    fn spawn_resolution(&mut self, ticket: ResolutionTicket, mode: ResolveMode) {
        let token = self.cancel_token.child_token();
        if let Some(previous) = self.resolution_token.replace(token.clone()) {
            previous.cancel();
        }

        let engine = Arc::clone(&self.engine);
        let fetcher = Arc::clone(&self.fetcher);
        let settings = self.settings;

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(target: LOG_TARGET, "Resolution for {} cancelled", ticket.track);
                }
                () = resolve_with_retries(&engine, &fetcher, &ticket, mode, settings) => {}
            }
        });
    }
}

/// Resolve and commit, retrying degraded results while the ticket is current
async fn resolve_with_retries(
    engine: &SyncEngine,
    fetcher: &LyricsFetcher,
    ticket: &ResolutionTicket,
    mode: ResolveMode,
    settings: SessionSettings,
) {
    let mut attempt = 0;
    loop {
        let resolution = fetcher.resolve(&ticket.track, mode).await;
        let degraded = resolution.degraded;
        if !engine.complete_resolution(ticket, resolution).await {
            return;
        }
        if !degraded || attempt >= settings.max_retries {
            return;
        }

        attempt += 1;
        info!(
            target: LOG_TARGET,
            "Lyrics for {} unavailable, retry {} of {} in {:?}",
            ticket.track,
            attempt,
            settings.max_retries,
            settings.retry_delay
        );
        tokio::time::sleep(settings.retry_delay).await;
        if !engine.is_current(ticket).await {
            return;
        }
    }
}
