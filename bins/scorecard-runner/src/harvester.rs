/// Result Harvester - Turn unit output into test results
///
/// **Core Responsibility:**
/// Produce exactly one `TestResult` per unit, in launch order.
///
/// **Failure Isolation:**
/// - Unit never finished → `error` placeholder, log not fetched
/// - Log retrieval failed → `error` result carrying the retrieval error
/// - Output is not a result document → `error` result, raw output kept as log
///
/// One bad unit never affects the results of the others.
use crate::launcher::ExecutionUnit;
use crate::platform::Platform;
use futures_util::future::join_all;
use scorecard_common::types::{RunReport, TestResult, TestSpec};
use scorecard_common::ScorecardError;
use tracing::{debug, instrument, warn};

/// `stopped` is why the wait ended early, if it did. It only shapes the
/// placeholder message of unfinished units.
#[instrument(skip_all, fields(units = units.len()))]
pub async fn harvest<P: Platform>(
    platform: &P,
    units: &[ExecutionUnit],
    stopped: Option<&ScorecardError>,
) -> RunReport {
    let results = join_all(units.iter().map(|unit| harvest_unit(platform, unit, stopped))).await;
    RunReport::new(results)
}

async fn harvest_unit<P: Platform>(
    platform: &P,
    unit: &ExecutionUnit,
    stopped: Option<&ScorecardError>,
) -> TestResult {
    if !unit.is_terminal() {
        warn!(unit = %unit.name, phase = %unit.phase, "Unit did not finish, skipping log");
        return TestResult::error_for(&unit.test, unfinished_reason(unit, stopped));
    }

    match platform.unit_log(&unit.namespace, &unit.name).await {
        Ok(output) => {
            let result = parse_output(&unit.test, &output);
            debug!(unit = %unit.name, state = %result.state, "Harvested result");
            result
        }
        Err(e) => {
            let err = ScorecardError::Harvest {
                unit: unit.name.clone(),
                reason: e.to_string(),
            };
            warn!(error = %err, "Log retrieval failed");
            TestResult::error_for(&unit.test, err.to_string())
        }
    }
}

fn unfinished_reason(unit: &ExecutionUnit, stopped: Option<&ScorecardError>) -> String {
    let why = match stopped {
        Some(ScorecardError::Cancelled { .. }) => "test did not finish before the run was cancelled",
        Some(ScorecardError::Query(_)) => "test status could not be queried before the wait deadline",
        _ => "test did not finish before the wait deadline",
    };
    format!("{} (last phase: {})", why, unit.phase)
}

/// Parse a test image's stdout into a result for `spec`.
///
/// Description and labels always come from the test definition. The
/// definition's name fills in when the output leaves it empty.
pub fn parse_output(spec: &TestSpec, output: &str) -> TestResult {
    match serde_json::from_str::<TestResult>(output.trim()) {
        Ok(mut result) => {
            if result.name.is_empty() {
                result.name = spec.name.clone();
            }
            result.description = spec.description.clone();
            result.labels = spec.labels.clone();
            result
        }
        Err(e) => {
            let mut result = TestResult::error_for(spec, format!("failed to parse test output: {}", e));
            result.log = output.to_string();
            result
        }
    }
}
