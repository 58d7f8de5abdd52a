/// Execution Launcher - One isolated unit per selected test
///
/// **Core Responsibility:**
/// Build the unit definition for a test and submit it. Launch never waits:
/// a unit is handed back in `Pending` as soon as the platform accepts it.
///
/// **Batch Rules:**
/// - Launches are sequential, in selection order
/// - The first rejection aborts the rest of the batch
/// - Every accepted unit is tracked before the next launch, so cleanup can
///   find it even when the batch aborts
use crate::bundle::BundleArtifact;
use crate::cleanup::RunResources;
use crate::platform::{
    Platform, UnitSpec, BUNDLE_MOUNT_PATH, MANAGED_BY_LABEL, MANAGED_BY_VALUE, RUN_ID_LABEL,
    TEST_LABEL,
};
use scorecard_common::types::{ExecutionPhase, Labels, TestSpec};
use scorecard_common::{Result, ScorecardError};
use tracing::{info, instrument};
use uuid::Uuid;

/// Longest test-name fragment kept in a unit name. Keeps the whole name a
/// valid DNS label.
const MAX_NAME_FRAGMENT: usize = 40;

/// Placement values shared by every unit of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub namespace: String,
    pub service_account: String,
    /// Helper image that unpacks the bundle archive before the test starts.
    pub untar_image: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            service_account: "default".to_string(),
            untar_image: "busybox:1.36".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    pub name: String,
    pub namespace: String,
    pub test: TestSpec,
    pub artifact: String,
    /// Last phase observed by the watcher.
    pub phase: ExecutionPhase,
}

impl ExecutionUnit {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Lowercase DNS-label form of a test name, at most 40 characters.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }

    let trimmed: String = out.trim_matches('-').chars().take(MAX_NAME_FRAGMENT).collect();
    let trimmed = trimmed.trim_end_matches('-');
    if trimmed.is_empty() {
        "test".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn unit_name(test: &TestSpec) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("scorecard-{}-{}", sanitize_name(&test.name), &suffix[..8])
}

/// Unit definition for `test`. Pure: the same inputs give the same spec.
pub fn unit_spec(
    name: &str,
    test: &TestSpec,
    artifact: &BundleArtifact,
    runtime: &RuntimeConfig,
    run_id: &str,
) -> UnitSpec {
    let mut labels = Labels::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(RUN_ID_LABEL.to_string(), run_id.to_string());
    labels.insert(TEST_LABEL.to_string(), sanitize_name(&test.name));

    let mut env = Labels::new();
    env.insert("SCORECARD_BUNDLE".to_string(), BUNDLE_MOUNT_PATH.to_string());
    env.insert("SCORECARD_TEST".to_string(), test.name.clone());

    UnitSpec {
        name: name.to_string(),
        namespace: runtime.namespace.clone(),
        image: test.image.clone(),
        command: test.command(),
        labels,
        env,
        service_account: runtime.service_account.clone(),
        artifact: artifact.name.clone(),
        untar_image: runtime.untar_image.clone(),
    }
}

pub async fn launch<P: Platform>(
    platform: &P,
    test: &TestSpec,
    artifact: &BundleArtifact,
    runtime: &RuntimeConfig,
    run_id: &str,
) -> Result<ExecutionUnit> {
    let name = unit_name(test);
    let spec = unit_spec(&name, test, artifact, runtime, run_id);

    platform
        .create_unit(&spec)
        .await
        .map_err(|e| ScorecardError::Launch {
            test: test.name.clone(),
            reason: e.to_string(),
        })?;

    info!(unit = %name, test = %test.name, image = %test.image, "Unit launched");

    Ok(ExecutionUnit {
        name,
        namespace: runtime.namespace.clone(),
        test: test.clone(),
        artifact: artifact.name.clone(),
        phase: ExecutionPhase::Pending,
    })
}

#[instrument(skip_all, fields(tests = tests.len(), namespace = %runtime.namespace))]
pub async fn launch_all<P: Platform>(
    platform: &P,
    tests: &[&TestSpec],
    artifact: &BundleArtifact,
    runtime: &RuntimeConfig,
    run_id: &str,
    resources: &mut RunResources,
) -> Result<Vec<ExecutionUnit>> {
    let mut units = Vec::with_capacity(tests.len());
    for test in tests {
        let unit = launch(platform, test, artifact, runtime, run_id).await?;
        resources.track_unit(unit.name.clone());
        units.push(unit);
    }
    Ok(units)
}
