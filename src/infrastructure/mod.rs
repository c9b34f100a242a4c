//! Infrastructure module - browser automation, persistence, and external services

pub mod append_log;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod detail;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod session;

pub use append_log::AppendLog;
pub use browser::{BrowserContext, BrowserEngine, ChromiumEngine};
pub use session::{Session, SessionManager};
