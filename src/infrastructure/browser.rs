//! Browser automation capability
//!
//! The pipeline talks to the browsing engine through the `BrowserEngine` /
//! `BrowserContext` traits; everything above this module is engine-agnostic
//! (tests drive the pipeline with in-memory fakes). The production
//! implementation wraps chromiumoxide: one Chromium process per engine, one
//! page per fetch within the shared context, explicit close everywhere since
//! CDP pages are not released on drop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::errors::HarvestError;

/// Engine launch options, surfaced up to the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub headless: bool,
    pub devtools: bool,
    /// Delay inserted before each page action, for watching a headed run.
    pub slowmo_ms: u64,
    /// Upper bound on a single navigation, including content retrieval.
    pub nav_timeout_secs: u64,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            devtools: false,
            slowmo_ms: 0,
            nav_timeout_secs: 45,
        }
    }
}

/// CSS selectors for the login form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSelectors {
    pub username_input: String,
    pub password_input: String,
    pub submit_button: String,
    /// Element that only renders for an authenticated visitor; used to verify
    /// both fresh logins and restored sessions.
    pub authenticated_marker: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            username_input: "input[name='email']".to_string(),
            password_input: "input[name='password']".to_string(),
            submit_button: "button[type='submit']".to_string(),
            authenticated_marker: "[data-testid='account-menu']".to_string(),
        }
    }
}

/// Persisted session state: the cookie snapshot of an authenticated context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    pub cookies: Vec<SavedCookie>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// A running automation engine that can open browsing contexts.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a browsing context, optionally seeded with persisted state.
    async fn new_context(
        &self,
        storage_state: Option<StorageState>,
    ) -> Result<Arc<dyn BrowserContext>, HarvestError>;

    /// Shut the engine down. Idempotent.
    async fn shutdown(&self) -> Result<(), HarvestError>;
}

/// One authenticated browsing context, shared by concurrent fetch tasks.
/// Each fetch opens its own page within the context.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Navigate a fresh page to `url` and return the rendered document.
    async fn fetch_page(&self, url: &str) -> Result<String, HarvestError>;

    /// Drive the login form and wait for the post-login navigation.
    async fn submit_login(
        &self,
        login_url: &str,
        username: &str,
        password: &str,
        selectors: &LoginSelectors,
    ) -> Result<(), HarvestError>;

    /// Snapshot the context's cookie state for persistence.
    async fn storage_state(&self) -> Result<StorageState, HarvestError>;

    /// Release the context. Idempotent.
    async fn close(&self) -> Result<(), HarvestError>;
}

/// chromiumoxide-backed engine.
pub struct ChromiumEngine {
    browser: Arc<RwLock<Option<Browser>>>,
    handler_task: JoinHandle<()>,
    opts: LaunchOptions,
}

impl ChromiumEngine {
    /// Launch a Chromium process and start draining its CDP event stream.
    pub async fn launch(opts: LaunchOptions) -> Result<Self, HarvestError> {
        let mut builder = BrowserConfig::builder();
        if !opts.headless {
            builder = builder.with_head();
        }
        if opts.devtools {
            builder = builder.arg("--auto-open-devtools-for-tabs");
        }
        let config = builder.build().map_err(HarvestError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(HarvestError::browser)?;

        // The handler stream must be polled for the whole engine lifetime or
        // every CDP call stalls.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler stopped: {e}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(RwLock::new(Some(browser))),
            handler_task,
            opts,
        })
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn new_context(
        &self,
        storage_state: Option<StorageState>,
    ) -> Result<Arc<dyn BrowserContext>, HarvestError> {
        {
            let guard = self.browser.read().await;
            if guard.is_none() {
                return Err(HarvestError::Browser(
                    "engine already shut down".to_string(),
                ));
            }
        }

        let context = ChromiumContext {
            browser: Arc::clone(&self.browser),
            opts: self.opts.clone(),
        };
        if let Some(state) = storage_state {
            context.restore_cookies(&state).await?;
        }
        Ok(Arc::new(context))
    }

    async fn shutdown(&self) -> Result<(), HarvestError> {
        let mut guard = self.browser.write().await;
        if let Some(mut browser) = guard.take() {
            browser.close().await.map_err(HarvestError::browser)?;
            let _ = browser.wait().await;
            self.handler_task.abort();
        }
        Ok(())
    }
}

struct ChromiumContext {
    browser: Arc<RwLock<Option<Browser>>>,
    opts: LaunchOptions,
}

impl ChromiumContext {
    async fn open_page(&self, url: &str) -> Result<chromiumoxide::Page, HarvestError> {
        if self.opts.slowmo_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.opts.slowmo_ms)).await;
        }
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| HarvestError::Browser("context used after shutdown".to_string()))?;

        let page = tokio::time::timeout(
            Duration::from_secs(self.opts.nav_timeout_secs),
            async {
                let page = browser.new_page("about:blank").await?;
                page.goto(url).await?;
                page.wait_for_navigation().await?;
                Ok::<_, chromiumoxide::error::CdpError>(page)
            },
        )
        .await
        .map_err(|_| HarvestError::Browser(format!("navigation timed out: {url}")))?
        .map_err(HarvestError::browser)?;

        Ok(page)
    }

    async fn restore_cookies(&self, state: &StorageState) -> Result<(), HarvestError> {
        if state.cookies.is_empty() {
            return Ok(());
        }
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| HarvestError::Browser("context used after shutdown".to_string()))?;

        let params: Vec<CookieParam> = state
            .cookies
            .iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.domain = Some(c.domain.clone());
                param.path = Some(c.path.clone());
                param.secure = Some(c.secure);
                param.http_only = Some(c.http_only);
                param
            })
            .collect();

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(HarvestError::browser)?;
        page.set_cookies(params).await.map_err(HarvestError::browser)?;
        page.close().await.map_err(HarvestError::browser)?;
        debug!(cookies = state.cookies.len(), "restored persisted session state");
        Ok(())
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
        let page = self.open_page(url).await?;
        let content = page.content().await.map_err(HarvestError::browser);
        if let Err(e) = page.close().await {
            warn!("failed to close page for {url}: {e}");
        }
        content
    }

    async fn submit_login(
        &self,
        login_url: &str,
        username: &str,
        password: &str,
        selectors: &LoginSelectors,
    ) -> Result<(), HarvestError> {
        let page = self.open_page(login_url).await?;

        let outcome = tokio::time::timeout(
            Duration::from_secs(self.opts.nav_timeout_secs),
            async {
                page.find_element(selectors.username_input.as_str())
                    .await?
                    .click()
                    .await?
                    .type_str(username)
                    .await?;
                page.find_element(selectors.password_input.as_str())
                    .await?
                    .click()
                    .await?
                    .type_str(password)
                    .await?;
                page.find_element(selectors.submit_button.as_str())
                    .await?
                    .click()
                    .await?;
                page.wait_for_navigation().await?;
                Ok::<_, chromiumoxide::error::CdpError>(())
            },
        )
        .await;

        let result = match outcome {
            Err(_) => Err(HarvestError::Authentication {
                reason: format!("login form timed out at {login_url}"),
            }),
            Ok(Err(e)) => Err(HarvestError::Authentication {
                reason: format!("login form interaction failed: {e}"),
            }),
            Ok(Ok(())) => Ok(()),
        };

        if let Err(e) = page.close().await {
            warn!("failed to close login page: {e}");
        }
        result
    }

    async fn storage_state(&self) -> Result<StorageState, HarvestError> {
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| HarvestError::Browser("context used after shutdown".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(HarvestError::browser)?;
        let cookies = page.get_cookies().await.map_err(HarvestError::browser)?;
        if let Err(e) = page.close().await {
            warn!("failed to close cookie snapshot page: {e}");
        }

        Ok(StorageState {
            cookies: cookies
                .into_iter()
                .map(|c| SavedCookie {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                    secure: c.secure,
                    http_only: c.http_only,
                })
                .collect(),
        })
    }

    async fn close(&self) -> Result<(), HarvestError> {
        // Pages are opened and closed per fetch; the context itself holds no
        // CDP resources beyond the shared browser, which the engine owns.
        Ok(())
    }
}
