// Command-line and environment configuration for the runner
use crate::bundle::BundleSource;
use crate::executor::RunOptions;
use crate::launcher::RuntimeConfig;
use crate::report::OutputFormat;
use crate::watcher::PollingWatcher;
use clap::{Parser, ValueEnum};
use scorecard_common::catalog::TestCatalog;
use scorecard_common::selector::Selector;
use scorecard_common::{Result, ScorecardError};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlatformKind {
    /// ConfigMap + Pod on a Kubernetes cluster
    Kube,
    /// Containers on the local Docker daemon
    Docker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "scorecard-runner")]
#[command(about = "Run bundle tests as isolated units on a cluster and report the results", long_about = None)]
pub struct CliArgs {
    /// Test configuration file (defaults to <bundle>/tests/scorecard/config.yaml)
    #[arg(short, long, env = "SCORECARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bundle directory to test
    #[arg(short, long, env = "SCORECARD_BUNDLE")]
    pub bundle: Option<PathBuf>,

    /// Label selector choosing which tests to run
    #[arg(short = 'l', long, env = "SCORECARD_SELECTOR", default_value = "")]
    pub selector: String,

    /// Report format: text or json
    #[arg(short, long, env = "SCORECARD_OUTPUT", default_value = "text")]
    pub output: String,

    /// Namespace the test units run in
    #[arg(short, long, env = "SCORECARD_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Service account the test units run as
    #[arg(short, long, env = "SCORECARD_SERVICE_ACCOUNT", default_value = "default")]
    pub service_account: String,

    /// Leave created resources in place after the run
    #[arg(short = 'x', long, env = "SCORECARD_SKIP_CLEANUP")]
    pub skip_cleanup: bool,

    /// Seconds to wait for all tests to finish
    #[arg(short, long, env = "SCORECARD_WAIT_TIME", default_value = "30")]
    pub wait_time: u64,

    /// Milliseconds between status polls
    #[arg(long, env = "SCORECARD_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Backend that runs the test units
    #[arg(long, value_enum, env = "SCORECARD_PLATFORM", default_value = "kube")]
    pub platform: PlatformKind,

    /// Kubeconfig file (defaults to in-cluster, KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "SCORECARD_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Image of the init container that unpacks the bundle
    #[arg(long, env = "SCORECARD_UNTAR_IMAGE", default_value = "busybox:1.36")]
    pub untar_image: String,

    /// Print the selected tests and exit without running them
    #[arg(short = 'L', long, env = "SCORECARD_LIST")]
    pub list: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "SCORECARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, env = "SCORECARD_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Validated configuration. Built before anything touches the platform.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub config_path: PathBuf,
    pub bundle: PathBuf,
    pub selector: Selector,
    pub output: OutputFormat,
    pub runtime: RuntimeConfig,
    pub cleanup: bool,
    pub wait_time: Duration,
    pub poll_interval: Duration,
    pub platform: PlatformKind,
    pub kubeconfig: Option<PathBuf>,
    pub list: bool,
}

impl RunConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let bundle = args
            .bundle
            .clone()
            .ok_or_else(|| ScorecardError::Config("bundle path is required (--bundle or SCORECARD_BUNDLE)".to_string()))?;
        if !bundle.is_dir() {
            return Err(ScorecardError::Config(format!(
                "bundle path {} is not a directory",
                bundle.display()
            )));
        }

        let selector = Selector::parse(&args.selector)?;
        let output = args.output.parse::<OutputFormat>()?;

        if args.namespace.trim().is_empty() {
            return Err(ScorecardError::Config("namespace must not be empty".to_string()));
        }
        if args.service_account.trim().is_empty() {
            return Err(ScorecardError::Config("service account must not be empty".to_string()));
        }
        if args.poll_interval_ms == 0 {
            return Err(ScorecardError::Config("poll interval must be positive".to_string()));
        }

        Ok(Self {
            config_path: TestCatalog::resolve_path(args.config.as_deref(), &bundle),
            bundle,
            selector,
            output,
            runtime: RuntimeConfig {
                namespace: args.namespace.clone(),
                service_account: args.service_account.clone(),
                untar_image: args.untar_image.clone(),
            },
            cleanup: !args.skip_cleanup,
            wait_time: Duration::from_secs(args.wait_time),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            platform: args.platform,
            kubeconfig: args.kubeconfig.clone(),
            list: args.list,
        })
    }

    pub fn source(&self) -> BundleSource {
        BundleSource::Directory(self.bundle.clone())
    }

    pub fn watcher(&self) -> PollingWatcher {
        PollingWatcher::new(self.poll_interval, self.wait_time)
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            selector: self.selector.clone(),
            runtime: self.runtime.clone(),
            cleanup: self.cleanup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["scorecard-runner"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().to_str().unwrap();
        let config = RunConfig::from_args(&parse(&["--bundle", bundle])).unwrap();

        assert_eq!(config.output, OutputFormat::Text);
        assert_eq!(config.runtime.namespace, "default");
        assert_eq!(config.runtime.service_account, "default");
        assert!(config.cleanup);
        assert!(config.selector.is_empty());
        assert_eq!(config.wait_time, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.platform, PlatformKind::Kube);
        assert_eq!(config.config_path, dir.path().join("tests/scorecard/config.yaml"));
    }

    #[test]
    fn test_short_flags() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().to_str().unwrap();
        let args = parse(&[
            "-b", bundle, "-c", "/tmp/config.yaml", "-l", "suite=olm", "-o", "json", "-n", "operators",
            "-s", "scorecard", "-x", "-w", "90", "-L",
        ]);
        let config = RunConfig::from_args(&args).unwrap();

        assert_eq!(config.config_path, PathBuf::from("/tmp/config.yaml"));
        assert_eq!(config.selector.to_string(), "suite=olm");
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.runtime.namespace, "operators");
        assert_eq!(config.runtime.service_account, "scorecard");
        assert!(!config.cleanup);
        assert_eq!(config.wait_time, Duration::from_secs(90));
        assert!(config.list);
    }

    #[test]
    fn test_platform_and_logging_flags() {
        let args = parse(&["--platform", "docker", "--log-format", "json"]);
        assert_eq!(args.platform, PlatformKind::Docker);
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(CliArgs::try_parse_from(["scorecard-runner", "--platform", "nomad"]).is_err());
    }

    #[test]
    fn test_missing_bundle_is_config_error() {
        let err = RunConfig::from_args(&parse(&[])).unwrap_err();
        assert!(matches!(err, ScorecardError::Config(_)));

        let err = RunConfig::from_args(&parse(&["--bundle", "/definitely/not/here"])).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().to_str().unwrap();

        for extra in [
            vec!["--output", "yaml"],
            vec!["--selector", "suite in (a"],
            vec!["--namespace", " "],
            vec!["--poll-interval-ms", "0"],
        ] {
            let mut argv = vec!["--bundle", bundle];
            argv.extend(extra.iter().copied());
            let err = RunConfig::from_args(&parse(&argv)).unwrap_err();
            assert!(matches!(err, ScorecardError::Config(_)), "{:?} should be rejected", extra);
        }
    }
}
