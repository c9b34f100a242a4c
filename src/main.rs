//! CLI entry point

use std::process::ExitCode;

use tracing::error;

use course_harvester::application::pipeline::{self, PipelineContext};
use course_harvester::cli::{self, Command};
use course_harvester::infrastructure::config::AppConfig;
use course_harvester::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let invocation = match cli::parse() {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let config = match AppConfig::load(invocation.config_path.clone()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let ctx = PipelineContext::new(config);
    let result = match invocation.command {
        Command::CollectCatalog(args) => pipeline::collect_catalog(&ctx, args).await.map(|s| {
            format!(
                "collected {} new ids across {} pages ({} seen)",
                s.new_ids, s.pages_walked, s.ids_seen
            )
        }),
        Command::FetchCourses(args) => pipeline::fetch_courses(&ctx, args).await.map(|r| {
            format!(
                "fetched {} records, {} skipped, {} failed",
                r.fetched,
                r.skipped,
                r.failed.len()
            )
        }),
        Command::InsertScraped(args) => pipeline::insert_scraped(&ctx, args).await.map(|r| {
            format!(
                "processed {} batches, {} rows written",
                r.batches, r.records_written
            )
        }),
    };

    match result {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
