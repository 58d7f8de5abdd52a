mod bundle;
mod checks;

use anyhow::{Context, Result};
use checks::Check;
use clap::Parser;
use scorecard_common::types::{TestResult, TestState};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Test image entrypoint: run one built-in check against the mounted
/// bundle and print its result document on stdout.
#[derive(Debug, Parser)]
#[command(name = "scorecard-test")]
#[command(about = "Run a built-in bundle check and print the result as JSON", long_about = None)]
struct Cli {
    /// Check to run (olm-bundle-validation, olm-crds-have-validation, olm-crds-have-resources,
    /// olm-spec-descriptors, olm-status-descriptors)
    #[arg(env = "SCORECARD_TEST")]
    test: String,

    /// Unpacked bundle directory
    #[arg(short, long, env = "SCORECARD_BUNDLE", default_value = "/bundle")]
    bundle: PathBuf,
}

fn main() -> ExitCode {
    // stdout belongs to the result document.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(state) => {
            info!(test = %cli.test, state = %state, "Check finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("scorecard-test failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<TestState> {
    let result = match cli.test.parse::<Check>() {
        Ok(check) => check.run(&cli.bundle),
        Err(reason) => {
            let mut result = TestResult::new(cli.test.clone(), TestState::Error);
            result.errors.push(reason);
            result
        }
    };

    let document = serde_json::to_string(&result).context("failed to serialize test result")?;
    println!("{}", document);
    Ok(result.state)
}
