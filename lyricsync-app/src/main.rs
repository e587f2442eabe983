#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
mod commands;
mod render;

use lyricsync_core::{
    CoreError, FetcherSettings, LyricsCache, LyricsFetcher, LyricsProvider, LyricsProviderType,
    LyricsyncConfig, PlaybackPoller, PollerSettings, SessionSettings, SyncEngine, SyncSession,
    SyncSettings,
};
use lyricsync_lyrics_lrclib::{LrclibProvider, LrclibProviderConfig, LRCLIB_CONFIG_TEMPLATE};
use lyricsync_spotify_api::{
    SpotifyOAuth, SpotifyPlaybackSource, SpotifyProviderConfig, SPOTIFY_CONFIG_TEMPLATE,
};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT_MS: u64 = 200;

fn main() {
    // Check config for logging.file_enabled before full config load
    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    // Load config or create template on first run
    let provider_templates: &[&str] = &[SPOTIFY_CONFIG_TEMPLATE, LRCLIB_CONFIG_TEMPLATE];
    let config = match LyricsyncConfig::load_or_create(Some(provider_templates)) {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            println!(
                "Created a config template at {}.\nAdd your Spotify client_id and client_secret, then run lyricsync again.",
                path.display()
            );
            std::process::exit(0);
        }
        Err(e) => {
            error!("{e}");
            eprintln!(
                "Failed to load {}: {e}",
                LyricsyncConfig::config_path().display()
            );
            std::process::exit(1);
        }
    };

    let spotify_config = match SpotifyProviderConfig::from_providers(&config.providers)
        .and_then(|c| c.validate().map(|()| c))
    {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            eprintln!(
                "Spotify is not configured: {e}\nEdit {} and restart.",
                LyricsyncConfig::config_path().display()
            );
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Set up Ctrl+C handler to trigger graceful shutdown
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    let result = runtime.block_on(run(config, spotify_config, cancel_token));
    // A pending stdin read would otherwise keep the runtime alive
    runtime.shutdown_timeout(Duration::from_millis(SHUTDOWN_TIMEOUT_MS));

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(
    config: LyricsyncConfig,
    spotify_config: SpotifyProviderConfig,
    cancel_token: CancellationToken,
) -> Result<(), CoreError> {
    let cache = open_cache(&config).await;

    let providers = create_providers(&config);
    if providers.is_empty() {
        return Err(CoreError::ConfigInvalid {
            message: "no lyrics provider could be initialized".into(),
        });
    }

    let fetcher = Arc::new(LyricsFetcher::new(
        cache.clone(),
        providers,
        FetcherSettings::from_config(&config),
    ));
    info!("Lyrics providers: {:?}", fetcher.provider_names());

    info!("Authenticating with Spotify...");
    let oauth = Arc::new(SpotifyOAuth::new(
        &spotify_config.client_id,
        &spotify_config.client_secret,
        spotify_config.oauth_redirect_uri.clone(),
    ));
    oauth.ensure_authenticated().await?;
    info!("Spotify authenticated successfully!");

    let poller = PlaybackPoller::new(
        Box::new(SpotifyPlaybackSource::new(oauth)),
        PollerSettings::from_config(&config.playback),
    );

    let engine = SyncEngine::new(SyncSettings::from_config(&config));
    let (session, command_tx) = SyncSession::new(
        engine.clone(),
        poller,
        fetcher,
        SessionSettings::from_config(&config),
        cancel_token.clone(),
    );

    let renderer = tokio::spawn(render::render_events(engine, cancel_token.clone()));
    let session = session.start();
    tokio::spawn(commands::read_commands(
        command_tx,
        config.lyrics.offset_step_ms,
        cancel_token.clone(),
    ));

    println!("lyricsync is running. Type h for commands, q or Ctrl+C to quit.");

    if let Err(e) = session.await {
        error!("Sync session task failed: {}", e);
    }
    cancel_token.cancel();
    let _ = renderer.await;

    if let Some(cache) = cache {
        if let Err(e) = cache.checkpoint().await {
            warn!("Failed to checkpoint lyrics cache: {}", e);
        }
    }

    info!("Shut down");
    Ok(())
}

/// Open the lyrics cache when enabled. Failure disables caching rather than
/// stopping the app.
async fn open_cache(config: &LyricsyncConfig) -> Option<Arc<LyricsCache>> {
    if !config.cache.enabled {
        info!("Lyrics cache disabled");
        return None;
    }

    let path = config.cache.db_path();
    let cache = match LyricsCache::open(&path).await {
        Ok(cache) => cache.with_max_entries(config.cache.max_entries),
        Err(e) => {
            warn!("Failed to open lyrics cache at {}: {}", path.display(), e);
            return None;
        }
    };

    if let Err(e) = cache.cleanup(config.cache.ttl_days).await {
        warn!("Lyrics cache cleanup failed: {}", e);
    }

    info!("Lyrics cache at {}", path.display());
    Some(Arc::new(cache))
}

fn create_providers(config: &LyricsyncConfig) -> Vec<Box<dyn LyricsProvider>> {
    config
        .lyrics
        .providers
        .iter()
        .filter_map(|provider_type| -> Option<Box<dyn LyricsProvider>> {
            match provider_type {
                LyricsProviderType::Lrclib => {
                    info!("Initializing LRCLIB provider");
                    let provider = LrclibProviderConfig::from_providers(&config.providers)
                        .and_then(|c| LrclibProvider::with_config(&c));
                    match provider {
                        Ok(provider) => Some(Box::new(provider)),
                        Err(e) => {
                            error!("Failed to create LRCLIB provider: {}", e);
                            None
                        }
                    }
                }
            }
        })
        .collect()
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled() -> bool {
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        file_enabled: bool,
    }

    let Ok(content) = std::fs::read_to_string(LyricsyncConfig::config_path()) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.file_enabled)
        .unwrap_or(false)
}

/// Initialize tracing with stderr output and optional file logging.
/// Lyrics go to stdout, so log lines are kept off it.
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rspotify_http=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = lyricsync_core::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
