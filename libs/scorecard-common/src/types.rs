use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label set attached to tests and results. Ordered so output is stable.
pub type Labels = BTreeMap<String, String>;

/// One declared test: which image to run and how to find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub description: String,
}

impl TestSpec {
    /// Entrypoint split into a container command, if one was declared.
    pub fn command(&self) -> Option<Vec<String>> {
        let entrypoint = self.entrypoint.as_deref()?.trim();
        if entrypoint.is_empty() {
            return None;
        }
        Some(entrypoint.split_whitespace().map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestState::Pass => write!(f, "pass"),
            TestState::Fail => write!(f, "fail"),
            TestState::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a single test, as printed by a test image on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Labels,
    pub state: TestState,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub log: String,
}

impl TestResult {
    pub fn new(name: impl Into<String>, state: TestState) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            labels: Labels::new(),
            state,
            errors: Vec::new(),
            suggestions: Vec::new(),
            log: String::new(),
        }
    }

    /// Error-state result standing in for a test whose output could not be used.
    pub fn error_for(spec: &TestSpec, message: impl Into<String>) -> Self {
        let mut result = Self::new(spec.name.clone(), TestState::Error);
        result.description = spec.description.clone();
        result.labels = spec.labels.clone();
        result.errors.push(message.into());
        result
    }
}

/// Aggregated results of one run, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<TestResult>,
}

impl RunReport {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self { results }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn count(&self, state: TestState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }
}

/// Lifecycle phase of an execution unit as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Succeeded | ExecutionPhase::Failed)
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPhase::Pending => write!(f, "Pending"),
            ExecutionPhase::Running => write!(f, "Running"),
            ExecutionPhase::Succeeded => write!(f, "Succeeded"),
            ExecutionPhase::Failed => write!(f, "Failed"),
            ExecutionPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(entrypoint: Option<&str>) -> TestSpec {
        TestSpec {
            name: "check-a".to_string(),
            image: "quay.io/example/check:v1".to_string(),
            entrypoint: entrypoint.map(str::to_string),
            labels: Labels::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_command_splits_entrypoint() {
        let s = spec(Some("scorecard-test  olm-bundle-validation"));
        assert_eq!(
            s.command(),
            Some(vec!["scorecard-test".to_string(), "olm-bundle-validation".to_string()])
        );
    }

    #[test]
    fn test_command_absent_or_blank() {
        assert_eq!(spec(None).command(), None);
        assert_eq!(spec(Some("   ")).command(), None);
    }

    #[test]
    fn test_result_minimal_document() {
        let result: TestResult =
            serde_json::from_str(r#"{"name":"check-a","state":"pass"}"#).unwrap();
        assert_eq!(result.name, "check-a");
        assert_eq!(result.state, TestState::Pass);
        assert!(result.errors.is_empty());
        assert!(result.log.is_empty());
    }

    #[test]
    fn test_result_rejects_unknown_state() {
        let parsed = serde_json::from_str::<TestResult>(r#"{"name":"x","state":"maybe"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_error_for_copies_spec_identity() {
        let mut s = spec(None);
        s.description = "checks things".to_string();
        s.labels.insert("suite".to_string(), "x".to_string());

        let result = TestResult::error_for(&s, "boom");
        assert_eq!(result.state, TestState::Error);
        assert_eq!(result.description, "checks things");
        assert_eq!(result.labels.get("suite").map(String::as_str), Some("x"));
        assert_eq!(result.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(ExecutionPhase::Succeeded.is_terminal());
        assert!(ExecutionPhase::Failed.is_terminal());
        assert!(!ExecutionPhase::Pending.is_terminal());
        assert!(!ExecutionPhase::Running.is_terminal());
        assert!(!ExecutionPhase::Unknown.is_terminal());
    }
}
