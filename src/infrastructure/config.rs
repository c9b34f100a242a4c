//! Application configuration
//!
//! A single serde-backed config file with defaults for everything, so the
//! tool runs without one. Credentials never live in the file; they come from
//! the environment at session-creation time.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::infrastructure::browser::LaunchOptions;
use crate::infrastructure::catalog::CatalogSelectors;
use crate::infrastructure::detail::{DetailSelectors, FetchOptions};
use crate::infrastructure::session::{Credentials, SessionConfig};

pub const USERNAME_ENV: &str = "COURSE_HARVESTER_USERNAME";
pub const PASSWORD_ENV: &str = "COURSE_HARVESTER_PASSWORD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub browser: LaunchOptions,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub detail: DetailConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog listing path, joined onto the session base URL.
    pub catalog_path: String,
    pub start_page: u32,
    /// Default output log for collected identifiers.
    pub ids_log: PathBuf,
    pub selectors: CatalogSelectors,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_path: "/courses".to_string(),
            start_page: 1,
            ids_log: PathBuf::from("catalog_ids.jsonl"),
            selectors: CatalogSelectors::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailConfig {
    /// Detail page path prefix; the course id is appended.
    pub course_path: String,
    /// Default output log for scraped detail records.
    pub out_log: PathBuf,
    pub selectors: DetailSelectors,
    pub fetch: FetchOptions,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            course_path: "/courses".to_string(),
            out_log: PathBuf::from("scraped_courses.jsonl"),
            selectors: DetailSelectors::default(),
            fetch: FetchOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database_url: String,
    pub batch_size: usize,
    /// Progress summary cadence, in batches.
    pub report_every: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://courses.db".to_string(),
            batch_size: 50,
            report_every: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set.
    pub level: String,
    /// Optional log file directory; console-only when absent.
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
        }
    }
}

impl AppConfig {
    /// Default config file location under the user config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("course-harvester")
            .join("config.json")
    }

    /// Load the config file, falling back to defaults when it does not exist.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(Self::default_path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let config = serde_json::from_slice(&bytes)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                info!(path = %path.display(), "loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("cannot read config file {}", path.display())),
        }
    }
}

/// Read crawl credentials from the environment.
pub fn credentials_from_env() -> Result<Credentials> {
    let username = std::env::var(USERNAME_ENV)
        .with_context(|| format!("{USERNAME_ENV} is not set"))?;
    let password = std::env::var(PASSWORD_ENV)
        .with_context(|| format!("{PASSWORD_ENV} is not set"))?;
    Ok(Credentials { username, password })
}
