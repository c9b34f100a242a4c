//! course-harvester - authenticated course-catalog crawl and ingest pipeline
//!
//! Enumerates course identifiers from a paginated catalog behind a login,
//! fetches detail pages under bounded concurrency, persists every record to a
//! crash-consistent append log, and batch-loads validated records into the
//! course database. Progress is durable and incremental: a restarted run
//! resumes from the log instead of re-doing completed work.

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
