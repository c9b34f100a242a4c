//! Command-line surface
//!
//! Three subcommands mapping 1:1 onto the pipeline use cases. Parsing is a
//! plain argument loop; anything unrecognized prints usage and fails.

use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::application::pipeline::{CollectArgs, FetchArgs, InsertArgs};

pub const USAGE: &str = "\
course-harvester - authenticated course-catalog crawl and ingest

USAGE:
  course-harvester collect-catalog [--start-page N] [--end-page N] [--out PATH]
  course-harvester fetch-courses <ids-file> [--out PATH] [--concurrency N] [--no-resume]
  course-harvester insert-scraped --file PATH [--batch-size N] [--dry-run]

OPTIONS:
  --config PATH   alternate config file (any subcommand)

Credentials are read from COURSE_HARVESTER_USERNAME and
COURSE_HARVESTER_PASSWORD.";

#[derive(Debug)]
pub enum Command {
    CollectCatalog(CollectArgs),
    FetchCourses(FetchArgs),
    InsertScraped(InsertArgs),
}

#[derive(Debug)]
pub struct Invocation {
    pub command: Command,
    pub config_path: Option<PathBuf>,
}

pub fn parse() -> Result<Invocation> {
    parse_from(env::args().skip(1).collect())
}

fn parse_from(args: Vec<String>) -> Result<Invocation> {
    let mut args = args.into_iter();
    let Some(subcommand) = args.next() else {
        bail!("missing subcommand\n\n{USAGE}");
    };

    let mut config_path = None;
    let command = match subcommand.as_str() {
        "collect-catalog" => {
            let mut collect = CollectArgs::default();
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--start-page" => collect.start_page = Some(required_u32(&mut args, &arg)?),
                    "--end-page" => collect.end_page = Some(required_u32(&mut args, &arg)?),
                    "--out" => collect.out = Some(required_path(&mut args, &arg)?),
                    "--config" => config_path = Some(required_path(&mut args, &arg)?),
                    other => bail!("unknown argument: {other}\n\n{USAGE}"),
                }
            }
            Command::CollectCatalog(collect)
        }
        "fetch-courses" => {
            let mut ids_file = None;
            let mut fetch = FetchArgs {
                ids_file: PathBuf::new(),
                out: None,
                concurrency: None,
                resume: true,
            };
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--out" => fetch.out = Some(required_path(&mut args, &arg)?),
                    "--concurrency" => {
                        fetch.concurrency = Some(required_u32(&mut args, &arg)? as usize);
                    }
                    "--no-resume" => fetch.resume = false,
                    "--config" => config_path = Some(required_path(&mut args, &arg)?),
                    other if !other.starts_with('-') && ids_file.is_none() => {
                        ids_file = Some(PathBuf::from(other));
                    }
                    other => bail!("unknown argument: {other}\n\n{USAGE}"),
                }
            }
            let Some(ids_file) = ids_file else {
                bail!("fetch-courses requires an identifiers file\n\n{USAGE}");
            };
            fetch.ids_file = ids_file;
            Command::FetchCourses(fetch)
        }
        "insert-scraped" => {
            let mut file = None;
            let mut insert = InsertArgs {
                file: PathBuf::new(),
                batch_size: None,
                dry_run: false,
            };
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--file" => file = Some(required_path(&mut args, &arg)?),
                    "--batch-size" => {
                        insert.batch_size = Some(required_u32(&mut args, &arg)? as usize);
                    }
                    "--dry-run" => insert.dry_run = true,
                    "--config" => config_path = Some(required_path(&mut args, &arg)?),
                    other => bail!("unknown argument: {other}\n\n{USAGE}"),
                }
            }
            let Some(file) = file else {
                bail!("insert-scraped requires --file\n\n{USAGE}");
            };
            insert.file = file;
            Command::InsertScraped(insert)
        }
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            std::process::exit(0);
        }
        other => bail!("unknown subcommand: {other}\n\n{USAGE}"),
    };

    Ok(Invocation {
        command,
        config_path,
    })
}

fn required_u32(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<u32> {
    let Some(value) = args.next() else {
        bail!("missing value for {flag}");
    };
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {value}"))
}

fn required_path(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf> {
    let Some(value) = args.next() else {
        bail!("missing value for {flag}");
    };
    Ok(PathBuf::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(args: &[&str]) -> Invocation {
        parse_from(args.iter().map(ToString::to_string).collect()).unwrap()
    }

    #[test]
    fn collect_catalog_with_range() {
        let inv = parse_ok(&["collect-catalog", "--start-page", "2", "--end-page", "9"]);
        let Command::CollectCatalog(args) = inv.command else {
            panic!("wrong command");
        };
        assert_eq!(args.start_page, Some(2));
        assert_eq!(args.end_page, Some(9));
    }

    #[test]
    fn fetch_courses_defaults_to_resume() {
        let inv = parse_ok(&["fetch-courses", "ids.txt"]);
        let Command::FetchCourses(args) = inv.command else {
            panic!("wrong command");
        };
        assert_eq!(args.ids_file, PathBuf::from("ids.txt"));
        assert!(args.resume);
    }

    #[test]
    fn no_resume_flag_disables_resume() {
        let inv = parse_ok(&["fetch-courses", "ids.txt", "--no-resume", "--concurrency", "8"]);
        let Command::FetchCourses(args) = inv.command else {
            panic!("wrong command");
        };
        assert!(!args.resume);
        assert_eq!(args.concurrency, Some(8));
    }

    #[test]
    fn fetch_courses_requires_ids_file() {
        assert!(parse_from(vec!["fetch-courses".to_string()]).is_err());
    }

    #[test]
    fn insert_scraped_flags() {
        let inv = parse_ok(&[
            "insert-scraped",
            "--file",
            "scraped.jsonl",
            "--batch-size",
            "25",
            "--dry-run",
        ]);
        let Command::InsertScraped(args) = inv.command else {
            panic!("wrong command");
        };
        assert_eq!(args.batch_size, Some(25));
        assert!(args.dry_run);
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(parse_from(vec!["frobnicate".to_string()]).is_err());
    }
}
