/// Platform Client - Abstraction over the cluster the tests run on
///
/// **Core Responsibility:**
/// Create, inspect and delete the two kinds of state a run owns:
/// - config artifacts (the packed bundle)
/// - execution units (one container per test)
///
/// The engine only ever talks to this trait. Production backends:
/// - `KubePlatform`: ConfigMap + Pod through the Kubernetes API
/// - `DockerPlatform`: containers on the local Docker daemon
use scorecard_common::types::{ExecutionPhase, Labels};
use std::future::Future;

pub mod docker;
#[cfg(test)]
pub mod fake;
pub mod kubernetes;

pub use self::docker::DockerPlatform;
pub use self::kubernetes::KubePlatform;

/// Key under which the bundle archive is stored in a config artifact.
pub const ARCHIVE_KEY: &str = "bundle.tar.gz";
/// Where test containers find the unpacked bundle.
pub const BUNDLE_MOUNT_PATH: &str = "/bundle";
/// Name of the container that runs the test image.
pub const TEST_CONTAINER_NAME: &str = "scorecard-test";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "scorecard";
pub const RUN_ID_LABEL: &str = "scorecard.io/run-id";
pub const TEST_LABEL: &str = "scorecard.io/test";
pub const DIGEST_ANNOTATION: &str = "scorecard.io/bundle-digest";

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}

/// Config artifact to publish: a named archive plus its digest.
#[derive(Debug, Clone)]
pub struct ArtifactSpec<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub digest: &'a str,
    pub labels: &'a Labels,
    pub archive: &'a [u8],
}

/// Everything a backend needs to start one test container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub labels: Labels,
    pub env: Labels,
    pub service_account: String,
    pub artifact: String,
    pub untar_image: String,
}

/// Capability set the engine needs from a cluster.
///
/// All methods are independent request/response calls; none of them
/// waits for a unit to make progress.
pub trait Platform: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn create_artifact(
        &self,
        spec: &ArtifactSpec<'_>,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    fn delete_artifact(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Submit a unit. Returns once the platform accepted it.
    fn create_unit(&self, spec: &UnitSpec) -> impl Future<Output = Result<(), PlatformError>> + Send;

    fn unit_phase(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<ExecutionPhase, PlatformError>> + Send;

    /// Captured stdout of the test container.
    fn unit_log(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<String, PlatformError>> + Send;

    fn delete_unit(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

/// Map a Kubernetes-style pod phase string onto [`ExecutionPhase`].
pub fn phase_from_str(phase: &str) -> ExecutionPhase {
    match phase {
        "Pending" => ExecutionPhase::Pending,
        "Running" => ExecutionPhase::Running,
        "Succeeded" => ExecutionPhase::Succeeded,
        "Failed" => ExecutionPhase::Failed,
        _ => ExecutionPhase::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(phase_from_str("Pending"), ExecutionPhase::Pending);
        assert_eq!(phase_from_str("Succeeded"), ExecutionPhase::Succeeded);
        assert_eq!(phase_from_str("Failed"), ExecutionPhase::Failed);
        assert_eq!(phase_from_str("Evicted"), ExecutionPhase::Unknown);
        assert_eq!(phase_from_str(""), ExecutionPhase::Unknown);
    }

    #[test]
    fn test_not_found_classification() {
        let err = PlatformError::NotFound {
            kind: "pod",
            name: "scorecard-a".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "pod 'scorecard-a' not found");
        assert!(!PlatformError::Rejected("forbidden".into()).is_not_found());
    }
}
