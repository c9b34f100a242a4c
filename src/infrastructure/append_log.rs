//! Durable append-only record log
//!
//! Single source of truth for partial crawl progress across process restarts.
//! One record per line, newline-delimited JSON. Writes are funneled through a
//! mutex-guarded file handle so concurrent writers never interleave mid-line,
//! and each write is synced to disk before the call returns.
//!
//! Reading back is tolerant: the resume-set scan skips lines it cannot parse
//! instead of aborting, so a log touched by an older run or a foreign tool is
//! still usable. Strict parsing lives in the loader, not here.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::course::{RawCourse, raw_id};
use crate::domain::errors::HarvestError;

/// Append-only NDJSON log with crash-consistent writes.
pub struct AppendLog {
    file: Arc<Mutex<File>>,
    path: PathBuf,
}

impl AppendLog {
    /// Open the log at `path` for appending, creating it (and parent
    /// directories) if needed.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as one line and sync it to disk.
    ///
    /// The record is serialized outside the lock; the locked section is a
    /// single `write_all` of the full line followed by `sync_data`, so a crash
    /// after this returns cannot lose the entry and a concurrent reader can
    /// never observe a torn line.
    pub async fn write(&self, record: &RawCourse) -> Result<(), HarvestError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            .map_err(HarvestError::Io)?;
        line.push('\n');

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut guard = file.blocking_lock();
            guard.write_all(line.as_bytes())?;
            guard.sync_data()
        })
        .await
        .map_err(|e| HarvestError::Io(std::io::Error::other(e)))??;

        Ok(())
    }
}

/// Scan every line of the log and collect the string-coerced `id` values of
/// all well-formed records.
///
/// Lines that fail to parse, or parse but lack an `id`, are skipped. Only a
/// file that exists but cannot be opened is an error.
pub fn load_existing_ids(path: impl AsRef<Path>) -> std::io::Result<HashSet<String>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut ids = HashSet::new();
    let mut skipped = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(serde_json::Value::Object(record)) => match raw_id(&record) {
                Some(id) => {
                    ids.insert(id);
                }
                None => skipped += 1,
            },
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped malformed or id-less log lines");
    }
    Ok(ids)
}

/// Resume set for a log that may not exist yet: a missing file is simply an
/// empty set, anything else defers to [`load_existing_ids`].
pub fn resume_set(path: impl AsRef<Path>) -> std::io::Result<HashSet<String>> {
    match load_existing_ids(path.as_ref()) {
        Ok(ids) => Ok(ids),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(e),
    }
}

/// Read the ordered identifier list from an input file, duplicates preserved.
///
/// Each non-empty line is either a JSON object (its `id` field is taken;
/// objects without one are skipped with a warning) or a bare identifier.
pub fn read_ids(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut ids = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('{') {
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(serde_json::Value::Object(record)) => match raw_id(&record) {
                    Some(id) => ids.push(id),
                    None => {
                        warn!(path = %path.display(), line = number + 1, "record without 'id' in ids file, skipping");
                    }
                },
                _ => {
                    warn!(path = %path.display(), line = number + 1, "unparsable line in ids file, skipping");
                }
            }
        } else {
            ids.push(trimmed.to_string());
        }
    }
    Ok(ids)
}
