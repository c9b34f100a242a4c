//! Authenticated session lifecycle
//!
//! One authenticated browsing context per pipeline run. The persisted state
//! file on disk is the authority for "already logged in": when it exists the
//! context is seeded from it and probed; a stale or absent state falls back to
//! the login form flow, and the file is overwritten with the fresh snapshot
//! after every successful login.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::domain::errors::HarvestError;
use crate::infrastructure::browser::{
    BrowserContext, BrowserEngine, LoginSelectors, StorageState,
};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_url: String,
    /// Path of the login form, joined onto `base_url`.
    pub login_path: String,
    /// Authenticated-only path used to verify a session (fresh or restored).
    pub probe_path: String,
    /// Where the cookie snapshot lives between runs.
    pub state_path: PathBuf,
    pub selectors: LoginSelectors,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://courses.example.edu".to_string(),
            login_path: "/login".to_string(),
            probe_path: "/account".to_string(),
            state_path: PathBuf::from(".course-harvester/session.json"),
            selectors: LoginSelectors::default(),
        }
    }
}

/// The one live authenticated session of a pipeline run.
///
/// Owns the engine and its browsing context. `close` releases both and is
/// idempotent; dropping an unclosed session logs a leak warning and attempts
/// a best-effort background shutdown.
pub struct Session {
    engine: Arc<dyn BrowserEngine>,
    context: Arc<dyn BrowserContext>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn context(&self) -> Arc<dyn BrowserContext> {
        Arc::clone(&self.context)
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.context.close().await {
            warn!("failed to close browsing context: {e}");
        }
        if let Err(e) = self.engine.shutdown().await {
            warn!("failed to shut down automation engine: {e}");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!("session dropped without close(), releasing in background");
            let engine = Arc::clone(&self.engine);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = engine.shutdown().await;
                });
            }
        }
    }
}

pub struct SessionManager;

impl SessionManager {
    /// Produce a ready-to-use authenticated session.
    ///
    /// Restores the persisted state when present and still valid, otherwise
    /// performs the login flow and persists the resulting snapshot. The engine
    /// is owned by the returned session either way; on error the caller still
    /// holds its `Arc` and is responsible for `shutdown`.
    pub async fn create(
        engine: Arc<dyn BrowserEngine>,
        credentials: &Credentials,
        config: &SessionConfig,
    ) -> Result<Session, HarvestError> {
        if let Some(state) = load_state(&config.state_path).await {
            let context = engine.new_context(Some(state)).await?;
            if probe_authenticated(context.as_ref(), config).await? {
                info!("reusing persisted session state");
                return Ok(Session {
                    engine,
                    context,
                    closed: false,
                });
            }
            warn!("persisted session state is stale, logging in again");
            let _ = context.close().await;
        }

        let context = engine.new_context(None).await?;
        let login_url = join_url(&config.base_url, &config.login_path)?;
        context
            .submit_login(
                &login_url,
                &credentials.username,
                &credentials.password,
                &config.selectors,
            )
            .await?;

        if !probe_authenticated(context.as_ref(), config).await? {
            let _ = context.close().await;
            return Err(HarvestError::Authentication {
                reason: "login submitted but no authenticated marker found".to_string(),
            });
        }

        let state = context.storage_state().await?;
        save_state(&config.state_path, &state).await?;
        info!(state = %config.state_path.display(), "login succeeded, session state persisted");

        Ok(Session {
            engine,
            context,
            closed: false,
        })
    }
}

async fn probe_authenticated(
    context: &dyn BrowserContext,
    config: &SessionConfig,
) -> Result<bool, HarvestError> {
    let probe_url = join_url(&config.base_url, &config.probe_path)?;
    let content = match context.fetch_page(&probe_url).await {
        Ok(content) => content,
        Err(e) => {
            warn!("session probe fetch failed: {e}");
            return Ok(false);
        }
    };
    let marker = Selector::parse(&config.selectors.authenticated_marker)
        .map_err(|e| HarvestError::Browser(format!("invalid authenticated marker selector: {e}")))?;
    Ok(Html::parse_document(&content).select(&marker).next().is_some())
}

pub(crate) fn join_url(base: &str, path: &str) -> Result<String, HarvestError> {
    let base = Url::parse(base).map_err(|e| HarvestError::Browser(format!("invalid base URL {base}: {e}")))?;
    let joined = base
        .join(path)
        .map_err(|e| HarvestError::Browser(format!("cannot join {path} onto base URL: {e}")))?;
    Ok(joined.to_string())
}

async fn load_state(path: &Path) -> Option<StorageState> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %path.display(), "unreadable session state, ignoring: {e}");
                None
            }
        },
        Err(_) => None,
    }
}

async fn save_state(path: &Path, state: &StorageState) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(state)
        .map_err(|e| HarvestError::Browser(format!("unserializable session state: {e}")))?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
