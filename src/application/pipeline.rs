//! Pipeline use cases
//!
//! One function per command. Each builds its collaborators explicitly from a
//! `PipelineContext`; there are no ambient singletons, and the session handle
//! is released on every exit path.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::progress::ProgressTracker;
use crate::infrastructure::append_log::{AppendLog, read_ids, resume_set};
use crate::infrastructure::browser::{BrowserEngine, ChromiumEngine};
use crate::infrastructure::catalog::{CatalogCrawler, CatalogRange, CatalogSummary};
use crate::infrastructure::config::{AppConfig, credentials_from_env};
use crate::infrastructure::detail::{DetailFetcher, FetchReport};
use crate::infrastructure::ingest::{
    IngestOptions, IngestReport, IngestionBatcher, SqliteCourseStore,
};
use crate::infrastructure::loader::load_scraped_courses;
use crate::infrastructure::session::{Session, SessionManager};

/// Everything a pipeline stage needs, passed explicitly.
pub struct PipelineContext {
    pub config: AppConfig,
    pub run_id: String,
}

impl PipelineContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            run_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CollectArgs {
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    pub out: Option<PathBuf>,
}

#[derive(Debug)]
pub struct FetchArgs {
    pub ids_file: PathBuf,
    pub out: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub resume: bool,
}

#[derive(Debug)]
pub struct InsertArgs {
    pub file: PathBuf,
    pub batch_size: Option<usize>,
    pub dry_run: bool,
}

/// Walk the catalog and append newly discovered course ids to the log.
pub async fn collect_catalog(ctx: &PipelineContext, args: CollectArgs) -> Result<CatalogSummary> {
    info!(run = %ctx.run_id, "collect-catalog starting");

    let out = args.out.unwrap_or_else(|| ctx.config.catalog.ids_log.clone());
    let log = AppendLog::create(&out)
        .with_context(|| format!("cannot open id log {}", out.display()))?;
    let range = CatalogRange {
        start_page: args.start_page.unwrap_or(ctx.config.catalog.start_page),
        end_page: args.end_page,
    };

    let mut session = open_session(ctx).await?;
    let crawler = CatalogCrawler::new(
        ctx.config.session.base_url.clone(),
        ctx.config.catalog.catalog_path.clone(),
        ctx.config.catalog.selectors.clone(),
    );
    let result = crawler.collect(session.context().as_ref(), &log, range).await;
    session.close().await;

    Ok(result?)
}

/// Fetch detail records for the identifiers listed in `ids_file`.
pub async fn fetch_courses(ctx: &PipelineContext, args: FetchArgs) -> Result<FetchReport> {
    info!(run = %ctx.run_id, "fetch-courses starting");

    // The ids file is checked before any browser resource is touched.
    if !args.ids_file.exists() {
        bail!("identifiers file not found: {}", args.ids_file.display());
    }
    let ids = read_ids(&args.ids_file)
        .with_context(|| format!("cannot read identifiers from {}", args.ids_file.display()))?;

    let out = args.out.unwrap_or_else(|| ctx.config.detail.out_log.clone());
    let resume = if args.resume {
        Some(resume_set(&out).with_context(|| format!("cannot scan log {}", out.display()))?)
    } else {
        None
    };

    let outstanding = match &resume {
        Some(done) => ids.iter().filter(|id| !done.contains(*id)).count(),
        None => ids.len(),
    };
    if outstanding == 0 {
        info!(total = ids.len(), "every identifier is already fetched");
        return Ok(FetchReport {
            skipped: ids.len(),
            ..FetchReport::default()
        });
    }

    let mut fetch_opts = ctx.config.detail.fetch.clone();
    if let Some(concurrency) = args.concurrency {
        fetch_opts.concurrency = concurrency;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, letting in-flight fetches drain");
                cancel.cancel();
            }
        });
    }

    let log = AppendLog::create(&out)
        .with_context(|| format!("cannot open record log {}", out.display()))?;
    let mut session = open_session(ctx).await?;
    let fetcher = DetailFetcher::new(
        ctx.config.session.base_url.clone(),
        ctx.config.detail.course_path.clone(),
        ctx.config.detail.selectors.clone(),
        fetch_opts,
    );
    let result = fetcher
        .fetch(session.context(), ids, resume.as_ref(), &log, cancel)
        .await;
    session.close().await;

    Ok(result?)
}

/// Validate, dedupe, and batch-load scraped records into the course database.
pub async fn insert_scraped(ctx: &PipelineContext, args: InsertArgs) -> Result<IngestReport> {
    info!(run = %ctx.run_id, dry_run = args.dry_run, "insert-scraped starting");

    let courses = load_scraped_courses(&args.file)
        .with_context(|| format!("loading scraped records from {}", args.file.display()))?;

    let batcher = IngestionBatcher::new(IngestOptions {
        batch_size: args.batch_size.unwrap_or(ctx.config.ingest.batch_size),
        dry_run: args.dry_run,
    });
    let mut progress = ProgressTracker::new("insert-scraped", ctx.config.ingest.report_every);

    let report = if args.dry_run {
        batcher.execute(&courses, None, &mut progress).await?
    } else {
        let store = SqliteCourseStore::connect(&ctx.config.ingest.database_url)
            .await
            .context("cannot open course database")?;
        store.ensure_schema().await?;
        batcher.execute(&courses, Some(&store), &mut progress).await?
    };
    Ok(report)
}

async fn open_session(ctx: &PipelineContext) -> Result<Session> {
    let credentials = credentials_from_env()?;
    let engine: Arc<dyn BrowserEngine> =
        Arc::new(ChromiumEngine::launch(ctx.config.browser.clone()).await?);
    match SessionManager::create(Arc::clone(&engine), &credentials, &ctx.config.session).await {
        Ok(session) => Ok(session),
        Err(e) => {
            // The session never materialized, so nothing else will release
            // the engine.
            let _ = engine.shutdown().await;
            Err(e.into())
        }
    }
}
