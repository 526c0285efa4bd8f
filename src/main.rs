use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use httest::load::{self, LoadOptions};
use httest::raw::{FileSystem, RawLoadTest, RawSuite};
use httest::scope::Variables;
use httest::status::Status;
use httest::suite;

fn usage() -> ExitCode {
    eprintln!("usage: httest <suite-file>... [-D NAME=VALUE]...");
    eprintln!("       httest --load <load-file> [--rate N] [--duration SECS]");
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return usage();
    }

    let mut files = Vec::new();
    let mut globals = Variables::new();
    let mut load_file: Option<String> = None;
    let mut options = LoadOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-D" => {
                i += 1;
                let Some(def) = args.get(i) else { return usage() };
                match def.split_once('=') {
                    Some((name, value)) => {
                        globals.insert(name.to_string(), value.to_string());
                    }
                    None => return usage(),
                }
            }
            "--load" => {
                i += 1;
                let Some(file) = args.get(i) else { return usage() };
                load_file = Some(file.clone());
            }
            "--rate" => {
                i += 1;
                let Some(rate) = args.get(i).and_then(|r| r.parse().ok()) else {
                    return usage();
                };
                options.rate = rate;
            }
            "--duration" => {
                i += 1;
                let Some(secs) = args.get(i).and_then(|d| d.parse().ok()) else {
                    return usage();
                };
                options.duration = std::time::Duration::from_secs(secs);
            }
            other => files.push(other.to_string()),
        }
        i += 1;
    }

    let fs = FileSystem::real();

    if let Some(load_file) = load_file {
        let raw = match RawLoadTest::load(&load_file, &fs) {
            Ok(raw) => raw,
            Err(e) => {
                error!(file = %load_file, error = %e, "cannot load load test");
                return ExitCode::from(2);
            }
        };
        match load::run(&raw, &globals, &options).await {
            Ok(result) => {
                print!("{}", load::summarize(&result));
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                error!(error = %e, "load run failed");
                return ExitCode::FAILURE;
            }
        }
    }

    if files.is_empty() {
        return usage();
    }

    let mut worst = Status::NotRun;
    for file in &files {
        let raw = match RawSuite::load(file, &fs) {
            Ok(raw) => raw,
            Err(e) => {
                error!(file = %file, error = %e, "cannot load suite");
                return ExitCode::from(2);
            }
        };
        let result = suite::execute(&raw, &globals).await;
        let stats = result.stats();
        println!(
            "{}: {} ({} pass, {} fail, {} error, {} skipped, {} bogus)",
            result.name,
            result.status,
            stats.passed,
            stats.failed,
            stats.errored,
            stats.skipped,
            stats.bogus
        );
        if let Some(err) = &result.error {
            println!("  {}", err);
        }
        if result.status > worst {
            worst = result.status;
        }
    }

    if worst <= Status::Pass {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
