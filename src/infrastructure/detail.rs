//! Concurrent detail-page fetching
//!
//! Turns an identifier list into raw detail records under a hard cap on
//! simultaneous in-flight fetches. The cap is a semaphore acquired inside each
//! spawned task; completed records stream over an mpsc channel to a single
//! drain loop that owns the log write path, so entries land in completion
//! order and the writer discipline stays in one place.
//!
//! Fetch failures are isolated per identifier: a terminal failure is reported
//! in the run summary and never cancels sibling fetches.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::course::{RawCourse, raw_id};
use crate::domain::errors::HarvestError;
use crate::infrastructure::append_log::AppendLog;
use crate::infrastructure::browser::BrowserContext;
use crate::infrastructure::session::join_url;

/// CSS selectors for course detail pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailSelectors {
    /// Element carrying the course identifier, when the page renders one.
    pub course_root: String,
    pub id_attr: String,
    pub title: String,
    pub instructor: String,
    pub rating: String,
    pub review_count: String,
    pub description: String,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self {
            course_root: "[data-course-id]".to_string(),
            id_attr: "data-course-id".to_string(),
            title: "h1.course-title".to_string(),
            instructor: ".instructor-name".to_string(),
            rating: ".course-rating".to_string(),
            review_count: ".review-count".to_string(),
            description: ".course-description".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Upper bound on simultaneous in-flight fetches; the system's sole
    /// backpressure mechanism.
    pub concurrency: usize,
    /// Retries after the first attempt before an identifier is a terminal
    /// failure for this run.
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry_count: 2,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub fetched: usize,
    /// Identifiers skipped because the resume set already covered them.
    pub skipped: usize,
    pub cancelled: usize,
    pub failed: Vec<(String, String)>,
}

enum FetchOutcome {
    Record { id: String, record: RawCourse },
    Failed { id: String, error: String },
    Cancelled,
}

pub struct DetailFetcher {
    base_url: String,
    course_path: String,
    selectors: DetailSelectors,
    opts: FetchOptions,
}

impl DetailFetcher {
    pub fn new(
        base_url: impl Into<String>,
        course_path: impl Into<String>,
        selectors: DetailSelectors,
        opts: FetchOptions,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            course_path: course_path.into(),
            selectors,
            opts,
        }
    }

    /// Fetch detail records for every outstanding identifier and stream each
    /// completed record to the log.
    ///
    /// `resume` carries the ids already present in the output log; `None`
    /// reprocesses the full list (duplicates in the log are acceptable, the
    /// loader's dedup resolves them). The resume set is computed once per
    /// invocation and never updated mid-run.
    pub async fn fetch(
        &self,
        context: Arc<dyn BrowserContext>,
        ids: Vec<String>,
        resume: Option<&HashSet<String>>,
        log: &AppendLog,
        cancel: CancellationToken,
    ) -> Result<FetchReport, HarvestError> {
        let total = ids.len();
        let outstanding: Vec<String> = match resume {
            Some(done) => ids.into_iter().filter(|id| !done.contains(id)).collect(),
            None => ids,
        };

        let mut report = FetchReport {
            skipped: total - outstanding.len(),
            ..FetchReport::default()
        };
        if outstanding.is_empty() {
            info!(total, "all identifiers already fetched, nothing to do");
            return Ok(report);
        }
        info!(
            outstanding = outstanding.len(),
            skipped = report.skipped,
            concurrency = self.opts.concurrency,
            "fetching course details"
        );

        let semaphore = Arc::new(Semaphore::new(self.opts.concurrency));
        let (tx, mut rx) = mpsc::channel::<FetchOutcome>(self.opts.concurrency.max(1));

        let mut handles = Vec::with_capacity(outstanding.len());
        for id in outstanding {
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let url = self.detail_url(&id)?;
            let selectors = self.selectors.clone();
            let opts = self.opts.clone();

            handles.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        let _ = tx.send(FetchOutcome::Cancelled).await;
                        return;
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let outcome =
                    match fetch_one(context.as_ref(), &url, &selectors, &opts, &cancel).await {
                        Ok(record) => FetchOutcome::Record { id, record },
                        Err(error) => FetchOutcome::Failed {
                            id,
                            error: error.to_string(),
                        },
                    };
                let _ = tx.send(outcome).await;
            }));
        }
        drop(tx);

        // Single-writer drain: the only code path that touches the log.
        while let Some(outcome) = rx.recv().await {
            match outcome {
                FetchOutcome::Record { id, mut record } => {
                    if raw_id(&record).is_none() {
                        record.insert("id".to_string(), Value::String(id.clone()));
                    }
                    record.insert(
                        "scraped_at".to_string(),
                        Value::String(chrono::Utc::now().to_rfc3339()),
                    );
                    log.write(&record).await?;
                    report.fetched += 1;
                    debug!(%id, fetched = report.fetched, "detail record persisted");
                }
                FetchOutcome::Failed { id, error } => {
                    warn!(%id, %error, "detail fetch failed, continuing");
                    report.failed.push((id, error));
                }
                FetchOutcome::Cancelled => report.cancelled += 1,
            }
        }
        for handle in handles {
            let _ = handle.await;
        }

        info!(
            fetched = report.fetched,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "detail fetch finished"
        );
        Ok(report)
    }

    fn detail_url(&self, id: &str) -> Result<String, HarvestError> {
        join_url(&self.base_url, &format!("{}/{id}", self.course_path))
    }
}

async fn fetch_one(
    context: &dyn BrowserContext,
    url: &str,
    selectors: &DetailSelectors,
    opts: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<RawCourse, HarvestError> {
    let mut last_error = None;
    for attempt in 0..=opts.retry_count {
        if cancel.is_cancelled() {
            return Err(HarvestError::Browser("fetch cancelled".to_string()));
        }
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(opts.retry_backoff_ms)).await;
            debug!(%url, attempt, "retrying detail fetch");
        }
        match context.fetch_page(url).await {
            Ok(content) => return Ok(extract_record(&content, url, selectors)),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error
        .unwrap_or_else(|| HarvestError::Browser(format!("fetch failed with no attempts: {url}"))))
}

/// Pull the course fields out of a detail page. Absent fields are simply not
/// present in the record; the loader decides what is required.
fn extract_record(content: &str, url: &str, selectors: &DetailSelectors) -> RawCourse {
    let document = Html::parse_document(content);
    let mut record = Map::new();
    record.insert("url".to_string(), Value::String(url.to_string()));

    if let Ok(root) = Selector::parse(&selectors.course_root)
        && let Some(id) = document
            .select(&root)
            .next()
            .and_then(|el| el.value().attr(&selectors.id_attr))
        && !id.trim().is_empty()
    {
        record.insert("id".to_string(), Value::String(id.trim().to_string()));
    }

    if let Some(title) = select_text(&document, &selectors.title) {
        record.insert("title".to_string(), Value::String(title));
    }
    if let Some(instructor) = select_text(&document, &selectors.instructor) {
        record.insert("instructor".to_string(), Value::String(instructor));
    }
    if let Some(rating) = select_text(&document, &selectors.rating)
        && let Ok(rating) = rating.parse::<f64>()
        && let Some(number) = serde_json::Number::from_f64(rating)
    {
        record.insert("rating".to_string(), Value::Number(number));
    }
    if let Some(count) = select_text(&document, &selectors.review_count) {
        let digits: String = count.chars().filter(char::is_ascii_digit).collect();
        if let Ok(count) = digits.parse::<i64>() {
            record.insert("review_count".to_string(), Value::Number(count.into()));
        }
    }
    if let Some(description) = select_text(&document, &selectors.description) {
        record.insert("description".to_string(), Value::String(description));
    }

    record
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::infrastructure::append_log::{AppendLog, load_existing_ids, resume_set};
    use crate::infrastructure::browser::{LoginSelectors, StorageState};

    const BASE: &str = "https://courses.example.edu";

    fn detail_page(id: Option<&str>, title: &str) -> String {
        let root = id
            .map(|id| format!("<article data-course-id=\"{id}\">"))
            .unwrap_or_else(|| "<article>".to_string());
        format!(
            "<html><body>{root}<h1 class=\"course-title\">{title}</h1>\
             <span class=\"course-rating\">4.5</span>\
             <span class=\"review-count\">1,204 reviews</span>\
             </article></body></html>"
        )
    }

    /// Serves detail pages while tracking request counts and peak concurrency.
    struct DetailServer {
        /// ids that respond with an error instead of a page
        failing: HashSet<String>,
        /// strip the embedded id from served pages
        omit_id: bool,
        fetched: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl DetailServer {
        fn new() -> Self {
            Self {
                failing: HashSet::new(),
                omit_id: false,
                fetched: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn id_of(url: &str) -> String {
            url.rsplit('/').next().unwrap().to_string()
        }
    }

    #[async_trait]
    impl BrowserContext for DetailServer {
        async fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let id = Self::id_of(url);
            self.fetched.lock().unwrap().push(id.clone());
            if self.failing.contains(&id) {
                return Err(HarvestError::Browser(format!("503: {url}")));
            }
            let embedded = (!self.omit_id).then_some(id.as_str());
            Ok(detail_page(embedded, &format!("Course {id}")))
        }

        async fn submit_login(
            &self,
            _login_url: &str,
            _username: &str,
            _password: &str,
            _selectors: &LoginSelectors,
        ) -> Result<(), HarvestError> {
            unreachable!("detail tests never log in")
        }

        async fn storage_state(&self) -> Result<StorageState, HarvestError> {
            Ok(StorageState::default())
        }

        async fn close(&self) -> Result<(), HarvestError> {
            Ok(())
        }
    }

    fn fetcher(concurrency: usize, retry_count: u32) -> DetailFetcher {
        DetailFetcher::new(
            BASE,
            "/courses",
            DetailSelectors::default(),
            FetchOptions {
                concurrency,
                retry_count,
                retry_backoff_ms: 1,
            },
        )
    }

    #[tokio::test]
    async fn resume_fetches_only_outstanding_ids() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("scraped.jsonl");
        std::fs::write(&log_path, "{\"id\":\"10\",\"title\":\"A\"}\n").unwrap();
        let log = AppendLog::create(&log_path).unwrap();

        let server = Arc::new(DetailServer::new());
        let done = resume_set(&log_path).unwrap();
        let report = fetcher(2, 0)
            .fetch(
                server.clone(),
                vec!["10".to_string(), "20".to_string()],
                Some(&done),
                &log,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(*server.fetched.lock().unwrap(), vec!["20".to_string()]);

        let ids = load_existing_ids(&log_path).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("20"));
    }

    #[tokio::test]
    async fn second_resume_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("scraped.jsonl");
        let log = AppendLog::create(&log_path).unwrap();
        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let server = Arc::new(DetailServer::new());

        let done = resume_set(&log_path).unwrap();
        fetcher(2, 0)
            .fetch(server.clone(), ids.clone(), Some(&done), &log, CancellationToken::new())
            .await
            .unwrap();

        let done = resume_set(&log_path).unwrap();
        let report = fetcher(2, 0)
            .fetch(server.clone(), ids, Some(&done), &log, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.fetched, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(std::fs::read_to_string(&log_path).unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn concurrency_bound_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::create(dir.path().join("scraped.jsonl")).unwrap();
        let server = Arc::new(DetailServer::new());

        let ids: Vec<String> = (0..8).map(|n| n.to_string()).collect();
        fetcher(2, 0)
            .fetch(server.clone(), ids, None, &log, CancellationToken::new())
            .await
            .unwrap();

        assert!(server.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(server.fetched.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("scraped.jsonl");
        let log = AppendLog::create(&log_path).unwrap();

        let mut server = DetailServer::new();
        server.failing.insert("2".to_string());
        let server = Arc::new(server);

        let report = fetcher(3, 0)
            .fetch(
                server,
                vec!["1".to_string(), "2".to_string(), "3".to_string()],
                None,
                &log,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2");
        let ids = load_existing_ids(&log_path).unwrap();
        assert!(ids.contains("1") && ids.contains("3") && !ids.contains("2"));
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_the_configured_number_of_times() {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::create(dir.path().join("scraped.jsonl")).unwrap();

        let mut server = DetailServer::new();
        server.failing.insert("1".to_string());
        let server = Arc::new(server);

        let report = fetcher(1, 2)
            .fetch(server.clone(), vec!["1".to_string()], None, &log, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(server.fetched.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_page_id_is_filled_from_requested_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("scraped.jsonl");
        let log = AppendLog::create(&log_path).unwrap();

        let mut server = DetailServer::new();
        server.omit_id = true;
        let server = Arc::new(server);

        fetcher(1, 0)
            .fetch(server, vec!["77".to_string()], None, &log, CancellationToken::new())
            .await
            .unwrap();

        let ids = load_existing_ids(&log_path).unwrap();
        assert!(ids.contains("77"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_work() {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::create(dir.path().join("scraped.jsonl")).unwrap();
        let server = Arc::new(DetailServer::new());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = fetcher(1, 0)
            .fetch(
                server.clone(),
                vec!["1".to_string(), "2".to_string()],
                None,
                &log,
                cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.fetched + report.failed.len(), 0);
        assert_eq!(report.cancelled, 2);
        assert!(server.fetched.lock().unwrap().is_empty());
    }
}
