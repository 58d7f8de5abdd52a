/// Run Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Take a catalog, a bundle and run options through the whole pipeline:
/// select → pack → materialize → launch → wait → harvest, then cleanup.
///
/// **Architecture:**
/// 1. Selection and packing touch nothing outside the process
/// 2. Everything created on the platform is recorded in `RunResources`
/// 3. A finished report is handed back with its resources; the caller
///    delivers it and then calls `finish` to clean up
/// 4. When the run fails before a report exists, cleanup runs before the
///    error is returned
///
/// This module is the glue layer. It knows nothing about:
/// - How a backend creates units (platform's job)
/// - How completion is detected (watcher's job)
/// - How output becomes a result (harvester's job)
use crate::bundle::{materialize, BundleArchive, BundleSource};
use crate::cleanup::{cleanup, CleanupSummary, RunResources};
use crate::harvester::harvest;
use crate::launcher::{launch_all, RuntimeConfig};
use crate::platform::Platform;
use crate::watcher::CompletionWatcher;
use scorecard_common::catalog::TestCatalog;
use scorecard_common::selector::Selector;
use scorecard_common::types::{RunReport, TestSpec};
use scorecard_common::{Result, ScorecardError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub selector: Selector,
    pub runtime: RuntimeConfig,
    /// Delete created state when the run ends.
    pub cleanup: bool,
}

/// Report of a run plus anything that stopped it from being complete.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Timeout, query failure or cancellation. The report is partial.
    pub warning: Option<ScorecardError>,
    /// Platform state the run left behind, for `Scorecard::finish`.
    pub resources: RunResources,
}

impl RunOutcome {
    fn empty() -> Self {
        Self {
            report: RunReport::default(),
            warning: None,
            resources: RunResources::default(),
        }
    }
}

pub struct Scorecard<P, W> {
    platform: P,
    watcher: W,
    options: RunOptions,
}

impl<P: Platform, W: CompletionWatcher> Scorecard<P, W> {
    pub fn new(platform: P, watcher: W, options: RunOptions) -> Self {
        Self {
            platform,
            watcher,
            options,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Tests the run would launch, in catalog order. Creates no state.
    pub fn list<'a>(&self, catalog: &'a TestCatalog) -> Vec<&'a TestSpec> {
        self.options.selector.select(&catalog.tests)
    }

    #[instrument(skip_all, fields(platform = self.platform.name(), bundle = %source, selector = %self.options.selector))]
    pub async fn run(
        &self,
        catalog: &TestCatalog,
        source: &BundleSource,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let selected = self.list(catalog);
        if selected.is_empty() {
            info!(catalog = catalog.len(), "No tests matched the selector, nothing to run");
            return Ok(RunOutcome::empty());
        }
        info!(selected = selected.len(), catalog = catalog.len(), "Tests selected");

        // Packing reads only local files; no platform state exists yet.
        let archive = BundleArchive::pack(source)?;
        let run_id = new_run_id();
        info!(run_id = %run_id, digest = %archive.digest(), size = archive.size(), "Bundle packed");

        let mut resources = RunResources::new(self.options.runtime.namespace.clone());
        match self
            .execute(&selected, &archive, &run_id, &mut resources, cancel)
            .await
        {
            Ok((report, warning)) => Ok(RunOutcome {
                report,
                warning,
                resources,
            }),
            Err(e) => {
                self.finish(&resources).await;
                Err(e)
            }
        }
    }

    /// Remove what a run created. `None` when cleanup is disabled or there
    /// is nothing to remove.
    pub async fn finish(&self, resources: &RunResources) -> Option<CleanupSummary> {
        if resources.is_empty() {
            return None;
        }
        if !self.options.cleanup {
            info!(
                units = resources.units().len(),
                artifact = resources.artifact().unwrap_or("-"),
                "Cleanup skipped, leaving run resources in place"
            );
            return None;
        }
        Some(cleanup(&self.platform, resources).await)
    }

    async fn execute(
        &self,
        selected: &[&TestSpec],
        archive: &BundleArchive,
        run_id: &str,
        resources: &mut RunResources,
        cancel: &CancellationToken,
    ) -> Result<(RunReport, Option<ScorecardError>)> {
        let runtime = &self.options.runtime;

        let artifact = materialize(&self.platform, archive, &runtime.namespace, run_id).await?;
        resources.track_artifact(artifact.name.clone());

        let mut units = launch_all(&self.platform, selected, &artifact, runtime, run_id, resources).await?;

        let warning = match self.watcher.await_all(&self.platform, &mut units, cancel).await {
            Ok(()) => None,
            Err(e) if e.is_warning() => {
                warn!(error = %e, "Run incomplete, reporting partial results");
                Some(e)
            }
            Err(e) => return Err(e),
        };

        let report = harvest(&self.platform, &units, warning.as_ref()).await;
        Ok((report, warning))
    }
}

fn new_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
