//! Batch ingestion into the primary datastore
//!
//! Validated courses are written in fixed-size batches, one transaction per
//! batch. Batch-level atomicity is the unit of partial-failure recovery: a
//! failed batch surfaces its index to the caller while every batch before it
//! stays committed, which makes the failing batch the natural resume point.

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, info};

use crate::application::progress::ProgressTracker;
use crate::domain::course::Course;
use crate::domain::errors::HarvestError;

/// Write access to the primary datastore.
#[async_trait]
pub trait CourseStore: Send + Sync {
    /// Insert one batch as a single atomic write; returns rows written.
    async fn insert_batch(&self, courses: &[Course]) -> Result<u64, HarvestError>;
}

/// sqlx-backed store for the application's SQLite database.
pub struct SqliteCourseStore {
    pool: SqlitePool,
}

impl SqliteCourseStore {
    pub async fn connect(database_url: &str) -> Result<Self, HarvestError> {
        // sqlite refuses to open a missing file, so file-backed databases are
        // touched into existence first.
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if !db_path.is_empty() && !db_path.starts_with(':') && !std::path::Path::new(db_path).exists()
        {
            if let Some(parent) = std::path::Path::new(db_path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(HarvestError::Io)?;
            }
            std::fs::File::create(db_path).map_err(HarvestError::Io)?;
        }

        // Single connection: batch writes never overlap, and a
        // `sqlite::memory:` database must stay on one connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), HarvestError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS courses (
                id TEXT PRIMARY KEY,
                title TEXT,
                instructor TEXT,
                rating REAL,
                review_count INTEGER,
                url TEXT,
                description TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, HarvestError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM courses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl CourseStore for SqliteCourseStore {
    async fn insert_batch(&self, courses: &[Course]) -> Result<u64, HarvestError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for course in courses {
            let result = sqlx::query(
                r"
                INSERT OR REPLACE INTO courses
                    (id, title, instructor, rating, review_count, url, description, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))
                ",
            )
            .bind(&course.id)
            .bind(&course.title)
            .bind(&course.instructor)
            .bind(course.rating)
            .bind(course.review_count)
            .bind(&course.url)
            .bind(&course.description)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub dry_run: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub total_records: usize,
    pub batches: usize,
    pub records_written: u64,
}

pub struct IngestionBatcher {
    opts: IngestOptions,
}

impl IngestionBatcher {
    pub fn new(opts: IngestOptions) -> Self {
        Self { opts }
    }

    /// Partition `courses` into batches and write each one.
    ///
    /// `store` must be `Some` unless this is a dry run; dry runs never touch
    /// a datastore, which keeps them safe on machines without one.
    pub async fn execute(
        &self,
        courses: &[Course],
        store: Option<&dyn CourseStore>,
        progress: &mut ProgressTracker,
    ) -> Result<IngestReport, HarvestError> {
        if !self.opts.dry_run && store.is_none() {
            return Err(HarvestError::BatchWrite {
                index: 0,
                reason: "no datastore configured for a live run".to_string(),
            });
        }

        let batch_size = self.opts.batch_size.max(1);
        let total_batches = courses.len().div_ceil(batch_size);
        progress.start(total_batches);

        let mut report = IngestReport {
            total_records: courses.len(),
            ..IngestReport::default()
        };
        for (index, chunk) in courses.chunks(batch_size).enumerate() {
            if self.opts.dry_run {
                debug!(index, records = chunk.len(), "dry run, skipping write");
            } else if let Some(store) = store {
                match store.insert_batch(chunk).await {
                    Ok(written) => report.records_written += written,
                    Err(e) => {
                        progress.fail();
                        return Err(HarvestError::BatchWrite {
                            index,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            report.batches += 1;
            progress.increment();
        }

        progress.finish();
        info!(
            batches = report.batches,
            records = report.total_records,
            written = report.records_written,
            dry_run = self.opts.dry_run,
            "ingestion finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn course(id: &str) -> Course {
        Course {
            id: id.to_string(),
            title: Some(format!("Course {id}")),
            instructor: None,
            rating: Some(4.0),
            review_count: Some(10),
            url: None,
            description: None,
        }
    }

    /// Store that records batch sizes and can fail on a chosen batch.
    #[derive(Default)]
    struct MemoryStore {
        batches: Mutex<Vec<usize>>,
        fail_on_batch: Option<usize>,
    }

    #[async_trait]
    impl CourseStore for MemoryStore {
        async fn insert_batch(&self, courses: &[Course]) -> Result<u64, HarvestError> {
            let mut batches = self.batches.lock().unwrap();
            if self.fail_on_batch == Some(batches.len()) {
                return Err(HarvestError::Browser("disk full".to_string()));
            }
            batches.push(courses.len());
            Ok(courses.len() as u64)
        }
    }

    fn batcher(batch_size: usize, dry_run: bool) -> IngestionBatcher {
        IngestionBatcher::new(IngestOptions {
            batch_size,
            dry_run,
        })
    }

    #[tokio::test]
    async fn partitions_into_fixed_size_batches() {
        let courses: Vec<Course> = (0..120).map(|n| course(&n.to_string())).collect();
        let store = MemoryStore::default();
        let mut progress = ProgressTracker::new("test", 100);

        let report = batcher(50, false)
            .execute(&courses, Some(&store), &mut progress)
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.records_written, 120);
        assert_eq!(*store.batches.lock().unwrap(), vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn dry_run_processes_batches_without_writing() {
        let courses: Vec<Course> = (0..120).map(|n| course(&n.to_string())).collect();
        let mut progress = ProgressTracker::new("test", 100);

        let report = batcher(50, true)
            .execute(&courses, None, &mut progress)
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.records_written, 0);
        assert_eq!(progress.processed(), 3);
    }

    #[tokio::test]
    async fn batch_failure_surfaces_index_and_keeps_prior_batches() {
        let courses: Vec<Course> = (0..100).map(|n| course(&n.to_string())).collect();
        let store = MemoryStore {
            fail_on_batch: Some(1),
            ..MemoryStore::default()
        };
        let mut progress = ProgressTracker::new("test", 100);

        let err = batcher(40, false)
            .execute(&courses, Some(&store), &mut progress)
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::BatchWrite { index: 1, .. }));
        assert_eq!(*store.batches.lock().unwrap(), vec![40]);
        assert_eq!(progress.processed(), 0);
    }

    #[tokio::test]
    async fn live_run_without_store_is_refused() {
        let courses = vec![course("1")];
        let mut progress = ProgressTracker::new("test", 100);

        let err = batcher(10, false)
            .execute(&courses, None, &mut progress)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::BatchWrite { .. }));
    }

    #[tokio::test]
    async fn file_backed_database_is_created_on_first_connect() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("courses.db");
        let url = format!("sqlite://{}", db_path.display());

        let store = SqliteCourseStore::connect(&url).await.unwrap();
        store.ensure_schema().await.unwrap();

        assert!(db_path.exists());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sqlite_store_round_trip() {
        let store = SqliteCourseStore::connect("sqlite::memory:").await.unwrap();
        store.ensure_schema().await.unwrap();

        let courses: Vec<Course> = (0..7).map(|n| course(&n.to_string())).collect();
        let written = store.insert_batch(&courses).await.unwrap();
        assert_eq!(written, 7);
        assert_eq!(store.count().await.unwrap(), 7);

        // Re-inserting the same ids replaces rather than duplicates.
        store.insert_batch(&courses).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 7);
    }
}
