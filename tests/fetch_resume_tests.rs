//! Resume-semantics tests for the detail fetcher, driven through the public
//! automation traits with an in-memory context.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use course_harvester::domain::errors::HarvestError;
use course_harvester::infrastructure::append_log::{AppendLog, load_existing_ids, resume_set};
use course_harvester::infrastructure::browser::{BrowserContext, LoginSelectors, StorageState};
use course_harvester::infrastructure::detail::{DetailFetcher, DetailSelectors, FetchOptions};
use tokio_util::sync::CancellationToken;

struct StaticSite {
    fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl BrowserContext for StaticSite {
    async fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
        let id = url.rsplit('/').next().unwrap().to_string();
        self.fetched.lock().unwrap().push(id.clone());
        Ok(format!(
            "<html><body><article data-course-id=\"{id}\">\
             <h1 class=\"course-title\">Course {id}</h1>\
             </article></body></html>"
        ))
    }

    async fn submit_login(
        &self,
        _login_url: &str,
        _username: &str,
        _password: &str,
        _selectors: &LoginSelectors,
    ) -> Result<(), HarvestError> {
        Ok(())
    }

    async fn storage_state(&self) -> Result<StorageState, HarvestError> {
        Ok(StorageState::default())
    }

    async fn close(&self) -> Result<(), HarvestError> {
        Ok(())
    }
}

fn fetcher() -> DetailFetcher {
    DetailFetcher::new(
        "https://courses.example.edu",
        "/courses",
        DetailSelectors::default(),
        FetchOptions {
            concurrency: 2,
            retry_count: 0,
            retry_backoff_ms: 1,
        },
    )
}

#[tokio::test]
async fn prepopulated_log_skips_the_already_fetched_id() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("scraped.jsonl");
    std::fs::write(&log_path, "{\"id\":\"10\",\"title\":\"A\"}\n").unwrap();

    let site = Arc::new(StaticSite {
        fetched: Mutex::new(Vec::new()),
    });
    let log = AppendLog::create(&log_path).unwrap();
    let done = resume_set(&log_path).unwrap();

    let report = fetcher()
        .fetch(
            site.clone(),
            vec!["10".to_string(), "20".to_string()],
            Some(&done),
            &log,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(*site.fetched.lock().unwrap(), vec!["20".to_string()]);
    let ids = load_existing_ids(&log_path).unwrap();
    assert!(ids.contains("10") && ids.contains("20"));
}

#[tokio::test]
async fn a_resumed_rerun_never_duplicates_an_id() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("scraped.jsonl");
    let ids: Vec<String> = (0..6).map(|n| n.to_string()).collect();

    for _ in 0..2 {
        let site = Arc::new(StaticSite {
            fetched: Mutex::new(Vec::new()),
        });
        let log = AppendLog::create(&log_path).unwrap();
        let done = resume_set(&log_path).unwrap();
        fetcher()
            .fetch(site, ids.clone(), Some(&done), &log, CancellationToken::new())
            .await
            .unwrap();
    }

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(content.lines().count(), 6);
    assert_eq!(load_existing_ids(&log_path).unwrap().len(), 6);
}

#[tokio::test]
async fn no_resume_reprocesses_and_leaves_duplicates_for_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("scraped.jsonl");
    let ids = vec!["1".to_string(), "2".to_string()];

    for _ in 0..2 {
        let site = Arc::new(StaticSite {
            fetched: Mutex::new(Vec::new()),
        });
        let log = AppendLog::create(&log_path).unwrap();
        fetcher()
            .fetch(site, ids.clone(), None, &log, CancellationToken::new())
            .await
            .unwrap();
    }

    assert_eq!(
        std::fs::read_to_string(&log_path).unwrap().lines().count(),
        4
    );
}
