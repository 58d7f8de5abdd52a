mod bundle;
mod cleanup;
mod config;
mod executor;
mod harvester;
mod launcher;
mod platform;
mod report;
mod watcher;


use anyhow::{Context, Result};
use clap::Parser;
use config::{CliArgs, LogFormat, PlatformKind, RunConfig};
use executor::Scorecard;
use platform::{DockerPlatform, KubePlatform, Platform};
use scorecard_common::catalog::TestCatalog;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if let Err(e) = init_tracing(&args) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Scorecard failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries only the report.
fn init_tracing(args: &CliArgs) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match args.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))
}

async fn run(args: CliArgs) -> Result<()> {
    let config = RunConfig::from_args(&args)?;

    let catalog = TestCatalog::load(&config.config_path)
        .with_context(|| format!("failed to load tests from {}", config.config_path.display()))?;
    info!(
        tests = catalog.len(),
        config = %config.config_path.display(),
        "Test catalog loaded"
    );

    if config.list {
        let selected = config.selector.select(&catalog.tests);
        print!("{}", report::render_list(&selected, config.output)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, stopping wait and cleaning up...");
            trigger.cancel();
        }
    });

    match config.platform {
        PlatformKind::Kube => {
            let platform = KubePlatform::connect(config.kubeconfig.as_deref())
                .await
                .context("failed to connect to Kubernetes")?;
            execute(platform, &config, &catalog, &cancel).await
        }
        PlatformKind::Docker => {
            let platform = DockerPlatform::connect().context("failed to connect to Docker")?;
            execute(platform, &config, &catalog, &cancel).await
        }
    }
}

async fn execute<P: Platform>(
    platform: P,
    config: &RunConfig,
    catalog: &TestCatalog,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(
        platform = platform.name(),
        namespace = %config.runtime.namespace,
        wait_s = config.wait_time.as_secs(),
        "Starting scorecard run"
    );

    let scorecard = Scorecard::new(platform, config.watcher(), config.options());
    let outcome = scorecard.run(catalog, &config.source(), cancel).await?;

    if let Some(warning) = &outcome.warning {
        warn!(error = %warning, "Report is partial");
    }

    // The report goes out before cleanup starts.
    let rendered = report::render(&outcome.report, config.output);
    if let Ok(document) = &rendered {
        print!("{}", document);
    }

    if let Some(summary) = scorecard.finish(&outcome.resources).await {
        if summary.failed > 0 {
            warn!(failed = summary.failed, "Some resources could not be removed");
        }
    }

    rendered?;
    Ok(())
}
