/// Cleanup - Best-effort removal of everything a run created
///
/// **Core Responsibility:**
/// Track cluster state as it is created and delete it once the run is over,
/// whatever path the run took to get there.
///
/// Units go first so nothing is left mounting the artifact when it is
/// deleted. A resource that is already gone counts as deleted. Failures are
/// logged and counted, never raised: a cleanup problem must not change the
/// report. Each delete gets `DELETE_TIMEOUT`; one that takes longer is
/// abandoned and counted as failed.
use crate::platform::{Platform, PlatformError};
use scorecard_common::ScorecardError;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster state owned by a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResources {
    namespace: String,
    artifact: Option<String>,
    units: Vec<String>,
}

impl RunResources {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            artifact: None,
            units: Vec::new(),
        }
    }

    pub fn track_artifact(&mut self, name: impl Into<String>) {
        self.artifact = Some(name.into());
    }

    pub fn track_unit(&mut self, name: impl Into<String>) {
        self.units.push(name.into());
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn is_empty(&self) -> bool {
        self.artifact.is_none() && self.units.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub deleted: usize,
    pub failed: usize,
}

pub async fn cleanup<P: Platform>(platform: &P, resources: &RunResources) -> CleanupSummary {
    let mut summary = CleanupSummary::default();
    let namespace = resources.namespace();

    for unit in resources.units() {
        let outcome = bounded(platform.delete_unit(namespace, unit)).await;
        record(&mut summary, unit, outcome);
    }

    if let Some(artifact) = resources.artifact() {
        let outcome = bounded(platform.delete_artifact(namespace, artifact)).await;
        record(&mut summary, artifact, outcome);
    }

    info!(
        deleted = summary.deleted,
        failed = summary.failed,
        namespace,
        "Cleanup finished"
    );
    summary
}

async fn bounded(delete: impl Future<Output = Result<(), PlatformError>>) -> Result<(), PlatformError> {
    match timeout(DELETE_TIMEOUT, delete).await {
        Ok(outcome) => outcome,
        Err(_) => Err(PlatformError::Request(format!(
            "delete did not complete within {}s",
            DELETE_TIMEOUT.as_secs()
        ))),
    }
}

fn record(summary: &mut CleanupSummary, resource: &str, outcome: Result<(), PlatformError>) {
    match outcome {
        Ok(()) => {
            debug!(resource, "Deleted");
            summary.deleted += 1;
        }
        Err(e) if e.is_not_found() => {
            debug!(resource, "Already gone");
            summary.deleted += 1;
        }
        Err(e) => {
            let err = ScorecardError::Cleanup {
                resource: resource.to_string(),
                reason: e.to_string(),
            };
            warn!(error = %err, "Cleanup failed, resource may need manual removal");
            summary.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::platform::{ArtifactSpec, Platform, UnitSpec};
    use scorecard_common::types::Labels;

    async fn seed(platform: &FakePlatform, units: &[&str]) -> RunResources {
        let labels = Labels::new();
        let archive = [0u8; 4];
        platform
            .create_artifact(&ArtifactSpec {
                name: "scorecard-bundle-abc-r1",
                namespace: "default",
                digest: "abc",
                labels: &labels,
                archive: &archive,
            })
            .await
            .unwrap();

        let mut resources = RunResources::new("default");
        resources.track_artifact("scorecard-bundle-abc-r1");
        for unit in units {
            platform
                .create_unit(&UnitSpec {
                    name: unit.to_string(),
                    namespace: "default".to_string(),
                    image: "busybox".to_string(),
                    command: None,
                    labels: Labels::new(),
                    env: Labels::new(),
                    service_account: "default".to_string(),
                    artifact: "scorecard-bundle-abc-r1".to_string(),
                    untar_image: "busybox".to_string(),
                })
                .await
                .unwrap();
            resources.track_unit(*unit);
        }
        resources
    }

    #[tokio::test]
    async fn test_cleanup_deletes_units_then_artifact() {
        let platform = FakePlatform::new();
        let resources = seed(&platform, &["unit-a", "unit-b"]).await;

        let summary = cleanup(&platform, &resources).await;

        assert_eq!(summary, CleanupSummary { deleted: 3, failed: 0 });
        assert_eq!(platform.deleted_units(), vec!["unit-a", "unit-b"]);
        assert_eq!(platform.deleted_artifacts(), vec!["scorecard-bundle-abc-r1"]);
        assert_eq!(platform.live_units(), 0);
        assert_eq!(platform.live_artifacts(), 0);
    }

    #[tokio::test]
    async fn test_missing_resource_counts_as_deleted() {
        let platform = FakePlatform::new();
        let mut resources = seed(&platform, &["unit-a"]).await;
        resources.track_unit("already-gone");

        let summary = cleanup(&platform, &resources).await;
        assert_eq!(summary, CleanupSummary { deleted: 3, failed: 0 });
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let platform = FakePlatform::new().failing_deletes();
        let resources = seed(&platform, &["unit-a"]).await;

        let summary = cleanup(&platform, &resources).await;

        assert_eq!(summary, CleanupSummary { deleted: 0, failed: 2 });
        // Every resource was still attempted.
        assert_eq!(platform.deleted_units(), vec!["unit-a"]);
        assert_eq!(platform.deleted_artifacts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_delete_is_abandoned() {
        let platform = FakePlatform::new().slow_deletes(Duration::from_secs(3600));
        let resources = seed(&platform, &["unit-a"]).await;

        let started = tokio::time::Instant::now();
        let summary = cleanup(&platform, &resources).await;

        assert_eq!(summary, CleanupSummary { deleted: 0, failed: 2 });
        assert_eq!(started.elapsed(), DELETE_TIMEOUT * 2);
        // Abandoned deletes never reached the platform.
        assert!(platform.deleted_units().is_empty());
        assert_eq!(platform.live_units(), 1);
    }

    #[test]
    fn test_resources_empty_until_tracked() {
        let mut resources = RunResources::new("default");
        assert!(resources.is_empty());
        resources.track_unit("unit-a");
        assert!(!resources.is_empty());
        assert_eq!(resources.artifact(), None);
    }
}
