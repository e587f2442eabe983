//! Prints sync events to the terminal.

use lyricsync_core::{SyncEngine, SyncEvent, TimelineSource};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "lyricsync::app::render";

fn format_clock(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{}:{:02}.{:02}", total_secs / 60, total_secs % 60, (ms % 1000) / 10)
}

/// Terminal line for an event, or `None` for events that only go to the log
pub fn render_event(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::TrackChanged { track, position_ms, is_playing } => Some(format!(
            "\n♪ {track}{} [{}]",
            if *is_playing { "" } else { " (paused)" },
            format_clock(*position_ms)
        )),
        SyncEvent::TimelineLoaded { line_count, source, .. } => Some(match source {
            TimelineSource::None => "  (no synced lyrics)".to_string(),
            _ => format!("  {line_count} lines ({source})"),
        }),
        SyncEvent::LineChanged { text, translated_text, start_ms, .. } => {
            let mut rendered = format!("[{}] {text}", format_clock(*start_ms));
            if !translated_text.is_empty() {
                rendered.push_str("\n           ");
                rendered.push_str(translated_text);
            }
            Some(rendered)
        }
        SyncEvent::LineCleared => None,
        SyncEvent::PlaybackPaused { position_ms } => {
            Some(format!("  ‖ paused at {}", format_clock(*position_ms)))
        }
        SyncEvent::PlaybackResumed { position_ms } => {
            Some(format!("  ▶ resumed at {}", format_clock(*position_ms)))
        }
        SyncEvent::PlaybackStopped => Some("  ■ nothing playing".to_string()),
        SyncEvent::SeekOccurred { from_ms, to_ms } => Some(format!(
            "  » seek {} → {}",
            format_clock(*from_ms),
            format_clock(*to_ms)
        )),
        SyncEvent::ConnectivityChanged { connectivity } => {
            Some(format!("  (playback source {connectivity})"))
        }
        SyncEvent::TranslationChanged { mode } => Some(format!("  translation: {mode}")),
        SyncEvent::OffsetChanged { offset_ms, .. } => {
            Some(format!("  offset: {offset_ms:+} ms"))
        }
    }
}

/// Print events until the engine is dropped or the token is cancelled
pub async fn render_events(engine: Arc<SyncEngine>, cancel_token: CancellationToken) {
    let mut rx = engine.subscribe();

    loop {
        let event = tokio::select! {
            () = cancel_token.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(event) => {
                debug!(target: LOG_TARGET, "{:?}", event);
                if let Some(line) = render_event(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!(target: LOG_TARGET, "Renderer missed {} sync events", n);
            }
            Err(RecvError::Closed) => {
                info!(target: LOG_TARGET, "Sync event channel closed");
                break;
            }
        }
    }
}
