//! Spotify authorization-code flow with a persisted token cache.

use crate::error::{Result, SpotifyError};
use axum::{extract::Query, response::Html, routing::get, Router};
use rspotify::{prelude::*, scopes, AuthCodeSpotify, Credentials, OAuth, Token};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "lyricsync::spotify::oauth";

/// Timeout for interactive OAuth callback (10 minutes)
const OAUTH_CALLBACK_TIMEOUT_SECS: u64 = 600;

/// Refresh token proactively if it expires within this many seconds
const PROACTIVE_REFRESH_THRESHOLD_SECS: i64 = 60;

const DEFAULT_CALLBACK_PORT: u16 = 8888;

type CodeSender = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Token as written to the cache file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedToken {
    access_token: String,
    refresh_token: Option<String>,
    /// Unix timestamp
    expires_at: Option<i64>,
    scopes: Vec<String>,
}

impl From<&Token> for PersistedToken {
    fn from(token: &Token) -> Self {
        let mut scopes: Vec<String> = token.scopes.iter().cloned().collect();
        scopes.sort();
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token.expires_at.map(|d| d.timestamp()),
            scopes,
        }
    }
}

impl From<PersistedToken> for Token {
    fn from(persisted: PersistedToken) -> Self {
        Self {
            access_token: persisted.access_token,
            refresh_token: persisted.refresh_token,
            expires_at: persisted
                .expires_at
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
            expires_in: chrono::TimeDelta::zero(),
            scopes: persisted.scopes.into_iter().collect(),
        }
    }
}

fn read_token(path: &Path) -> Result<Option<Token>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let persisted: PersistedToken = serde_json::from_str(&content)?;
    Ok(Some(persisted.into()))
}

fn write_token(path: &Path, token: &Token) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(&PersistedToken::from(token))?;
    fs::write(path, content)?;
    Ok(())
}

/// Whether a token expires within the proactive refresh window
fn expires_soon(token: &Token, now: chrono::DateTime<chrono::Utc>) -> bool {
    token
        .expires_at
        .is_some_and(|expires_at| (expires_at - now).num_seconds() <= PROACTIVE_REFRESH_THRESHOLD_SECS)
}

/// Host, port and path of the local callback server
fn callback_address(redirect_uri: &str) -> Result<(SocketAddr, String)> {
    let parsed = url::Url::parse(redirect_uri).map_err(|e| SpotifyError::AuthFailed {
        reason: format!("Invalid redirect URI: {e}"),
    })?;

    let host = match parsed.host_str() {
        None | Some("localhost") => "127.0.0.1",
        Some(host) => host,
    };
    let port = parsed.port().unwrap_or(DEFAULT_CALLBACK_PORT);
    let addr = format!("{host}:{port}")
        .parse()
        .map_err(|e| SpotifyError::AuthFailed {
            reason: format!("Invalid callback address {host}:{port}: {e}"),
        })?;

    Ok((addr, parsed.path().to_string()))
}

/// Spotify OAuth manager
pub struct SpotifyOAuth {
    client: AuthCodeSpotify,
    token_path: PathBuf,
}

impl SpotifyOAuth {
    /// Create an OAuth manager using the default token cache location
    #[must_use]
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: impl Into<String>) -> Self {
        Self::with_token_path(
            client_id,
            client_secret,
            redirect_uri,
            crate::paths::spotify_token_cache_path(),
        )
    }

    /// Create an OAuth manager that caches its token at `token_path`
    #[must_use]
    pub fn with_token_path(
        client_id: &str,
        client_secret: &str,
        redirect_uri: impl Into<String>,
        token_path: PathBuf,
    ) -> Self {
        let oauth = OAuth {
            redirect_uri: redirect_uri.into(),
            scopes: scopes!("user-read-currently-playing", "user-read-playback-state"),
            ..Default::default()
        };
        let client = AuthCodeSpotify::new(Credentials::new(client_id, client_secret), oauth);

        Self { client, token_path }
    }

    /// Get the underlying Spotify client
    #[must_use]
    pub const fn client(&self) -> &AuthCodeSpotify {
        &self.client
    }

    async fn lock_token(&self) -> Result<futures::lock::MutexGuard<'_, Option<Token>>> {
        self.client
            .token
            .lock()
            .await
            .map_err(|_| SpotifyError::AuthFailed {
                reason: "Failed to acquire token lock".to_string(),
            })
    }

    /// Load the cached token into the client, refreshing it when expired.
    ///
    /// Returns `false` when there is no usable token and the interactive flow
    /// is required.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file is unreadable or the refresh fails.
    pub async fn load_cached_token(&self) -> Result<bool> {
        let Some(token) = read_token(&self.token_path)? else {
            info!(target: LOG_TARGET, "No cached token file found at {:?}", self.token_path);
            return Ok(false);
        };

        let expired = token.is_expired();
        let refreshable = token.refresh_token.is_some();
        *self.lock_token().await? = Some(token);

        match (expired, refreshable) {
            (false, _) => {
                info!(target: LOG_TARGET, "Loaded valid cached Spotify token");
                Ok(true)
            }
            (true, true) => {
                info!(target: LOG_TARGET, "Cached token is expired, refreshing");
                self.refresh_token().await.map(|()| true)
            }
            (true, false) => {
                info!(target: LOG_TARGET, "Cached token is expired and cannot be refreshed");
                Ok(false)
            }
        }
    }

    async fn save_token(&self) -> Result<()> {
        let guard = self.lock_token().await?;
        if let Some(token) = guard.as_ref() {
            write_token(&self.token_path, token)?;
            debug!(target: LOG_TARGET, "Saved Spotify token to {:?}", self.token_path);
        }
        Ok(())
    }

    /// Refresh the access token and persist it
    ///
    /// # Errors
    ///
    /// Returns an error if the token refresh fails or the token cannot be saved.
    pub async fn refresh_token(&self) -> Result<()> {
        info!(target: LOG_TARGET, "Refreshing Spotify access token");
        self.client
            .refresh_token()
            .await
            .map_err(|e| SpotifyError::AuthFailed {
                reason: format!("Token refresh failed: {e}"),
            })?;
        self.save_token().await
    }

    /// Refresh the token if it expires within the next minute.
    ///
    /// # Errors
    ///
    /// Returns an error if the token refresh fails.
    pub async fn ensure_token_fresh(&self) -> Result<()> {
        let needs_refresh = {
            let guard = self.lock_token().await?;
            match guard.as_ref() {
                Some(token) => expires_soon(token, chrono::Utc::now()),
                None => {
                    warn!(target: LOG_TARGET, "No token available for proactive refresh check");
                    false
                }
            }
        };

        if needs_refresh {
            self.refresh_token().await?;
        }
        Ok(())
    }

    /// Ensure we have a valid token, falling back to the browser flow
    ///
    /// # Errors
    ///
    /// Returns an error if authentication or token refresh fails.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        if self.load_cached_token().await? {
            return Ok(());
        }
        info!(target: LOG_TARGET, "No valid cached token, starting interactive authorization");
        self.authenticate_interactive().await
    }

    /// Run the browser authorization flow with a local callback server
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot start, the callback times out, or
    /// the code exchange fails.
    pub async fn authenticate_interactive(&self) -> Result<()> {
        let (addr, callback_path) = callback_address(&self.client.oauth.redirect_uri)?;

        let (tx, rx) = oneshot::channel::<String>();
        let app = callback_router(&callback_path, Arc::new(Mutex::new(Some(tx))));

        let listener =
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| SpotifyError::AuthFailed {
                    reason: format!("Failed to bind to {addr}: {e}"),
                })?;
        info!(target: LOG_TARGET, "OAuth callback server listening on http://{}{}", addr, callback_path);

        let auth_url = self
            .client
            .get_authorize_url(false)
            .map_err(|e| SpotifyError::AuthFailed {
                reason: format!("Failed to generate auth URL: {e}"),
            })?;
        if let Err(e) = open::that(&auth_url) {
            warn!(target: LOG_TARGET, "Could not open browser automatically: {}", e);
            info!(target: LOG_TARGET, "Please open this URL manually:\n{auth_url}");
        }

        let code = wait_for_code(rx, listener, app).await?;
        info!(target: LOG_TARGET, "Received authorization code, exchanging for token");

        self.client
            .request_token(&code)
            .await
            .map_err(|e| SpotifyError::AuthFailed {
                reason: format!("Token exchange failed: {e}"),
            })?;
        self.save_token().await?;
        info!(target: LOG_TARGET, "Successfully authenticated with Spotify");
        Ok(())
    }

    /// Delete the cached token file
    pub fn clear_tokens(&self) {
        if self.token_path.exists() {
            if let Err(e) = fs::remove_file(&self.token_path) {
                warn!(target: LOG_TARGET, "Failed to remove token cache: {}", e);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

fn callback_router(callback_path: &str, tx: CodeSender) -> Router {
    Router::new().route(
        callback_path,
        get(move |Query(params): Query<CallbackParams>| {
            let tx = tx.clone();
            async move { handle_callback(params, &tx).await }
        }),
    )
}

async fn handle_callback(params: CallbackParams, tx: &CodeSender) -> Html<String> {
    match (params.code, params.error) {
        (Some(code), _) => {
            if let Some(sender) = tx.lock().await.take() {
                let _ = sender.send(code);
            }
            Html(callback_page(
                "Authorization Successful",
                "lyricsync is now connected to Spotify. You can close this window.",
            ))
        }
        (None, Some(error)) => Html(callback_page(
            "Authorization Failed",
            &format!("Error: {error}. Please close this window and try again."),
        )),
        (None, None) => Html(callback_page(
            "Authorization Failed",
            "No authorization code received. Please close this window and try again.",
        )),
    }
}

fn callback_page(title: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title}</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1>{title}</h1>
    <p>{message}</p>
</body>
</html>"#
    )
}

async fn wait_for_code(
    rx: oneshot::Receiver<String>,
    listener: tokio::net::TcpListener,
    app: Router,
) -> Result<String> {
    let server = axum::serve(listener, app);

    tokio::select! {
        result = rx => {
            result.map_err(|_| SpotifyError::AuthFailed {
                reason: "Callback channel closed unexpectedly".into(),
            })
        }
        _ = server => {
            Err(SpotifyError::AuthFailed {
                reason: "Callback server stopped unexpectedly".into(),
            })
        }
        () = tokio::time::sleep(Duration::from_secs(OAUTH_CALLBACK_TIMEOUT_SECS)) => {
            Err(SpotifyError::AuthFailed {
                reason: format!(
                    "OAuth callback timed out after {} minutes. Please try again.",
                    OAUTH_CALLBACK_TIMEOUT_SECS / 60
                ),
            })
        }
    }
}
