// Scripted in-memory platform for engine tests.
//
// Behaviour is keyed by the test name label each unit carries, so tests can
// script outcomes without knowing the random unit suffix. Timing uses
// tokio's clock and works with paused time.

use super::{ArtifactSpec, Platform, PlatformError, UnitSpec, TEST_LABEL};
use scorecard_common::types::ExecutionPhase;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct UnitScript {
    /// Time after creation at which the unit turns terminal; `None` = never.
    pub finish_after: Option<Duration>,
    pub final_phase: ExecutionPhase,
    pub log: Result<String, String>,
    /// Number of initial phase queries that fail.
    pub failing_queries: usize,
    /// How long each phase query takes to answer.
    pub query_delay: Option<Duration>,
    pub reject_create: bool,
}

impl UnitScript {
    pub fn passing(name: &str) -> Self {
        Self::finishing(Duration::from_secs(2), format!(r#"{{"name":"{}","state":"pass"}}"#, name))
    }

    pub fn finishing(after: Duration, log: String) -> Self {
        Self {
            finish_after: Some(after),
            final_phase: ExecutionPhase::Succeeded,
            log: Ok(log),
            failing_queries: 0,
            query_delay: None,
            reject_create: false,
        }
    }

    pub fn never_finishing() -> Self {
        Self {
            finish_after: None,
            ..Self::passing("never")
        }
    }
}

#[derive(Debug)]
struct LiveUnit {
    spec: UnitSpec,
    created: Instant,
    script: UnitScript,
    queries: usize,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, UnitScript>,
    artifacts: HashMap<String, Vec<u8>>,
    units: HashMap<String, LiveUnit>,
    created_units: Vec<String>,
    deleted_units: Vec<String>,
    deleted_artifacts: Vec<String>,
    artifact_creates: usize,
}

#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<State>,
    reject_artifact: bool,
    fail_deletes: bool,
    delete_delay: Option<Duration>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_artifacts(mut self) -> Self {
        self.reject_artifact = true;
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Every delete takes `delay` before it is recorded.
    pub fn slow_deletes(mut self, delay: Duration) -> Self {
        self.delete_delay = Some(delay);
        self
    }

    pub fn script(self, test: &str, script: UnitScript) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(test.to_string(), script);
        self
    }

    pub fn created_units(&self) -> Vec<String> {
        self.state.lock().unwrap().created_units.clone()
    }

    pub fn created_spec(&self, unit: &str) -> Option<UnitSpec> {
        self.state.lock().unwrap().units.get(unit).map(|u| u.spec.clone())
    }

    pub fn deleted_units(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_units.clone()
    }

    pub fn deleted_artifacts(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_artifacts.clone()
    }

    pub fn artifact_creates(&self) -> usize {
        self.state.lock().unwrap().artifact_creates
    }

    pub fn artifact(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().artifacts.get(name).cloned()
    }

    pub fn live_units(&self) -> usize {
        self.state.lock().unwrap().units.len()
    }

    pub fn live_artifacts(&self) -> usize {
        self.state.lock().unwrap().artifacts.len()
    }

    async fn delete_pause(&self) {
        if let Some(delay) = self.delete_delay {
            sleep(delay).await;
        }
    }
}

impl Platform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_artifact(&self, spec: &ArtifactSpec<'_>) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.artifact_creates += 1;
        if self.reject_artifact {
            return Err(PlatformError::Rejected("configmaps is forbidden".to_string()));
        }
        state
            .artifacts
            .insert(spec.name.to_string(), spec.archive.to_vec());
        Ok(())
    }

    async fn delete_artifact(&self, _namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.delete_pause().await;
        let mut state = self.state.lock().unwrap();
        state.deleted_artifacts.push(name.to_string());
        if self.fail_deletes {
            return Err(PlatformError::Request("connection reset".to_string()));
        }
        state.artifacts.remove(name);
        Ok(())
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        let test = spec.labels.get(TEST_LABEL).cloned().unwrap_or_default();
        let script = state
            .scripts
            .get(&test)
            .cloned()
            .unwrap_or_else(|| UnitScript::passing(&test));

        if script.reject_create {
            return Err(PlatformError::Rejected(format!(
                "pods \"{}\" is forbidden: image not allowed",
                spec.name
            )));
        }
        if !state.artifacts.contains_key(&spec.artifact) {
            return Err(PlatformError::NotFound {
                kind: "configmap",
                name: spec.artifact.clone(),
            });
        }

        state.created_units.push(spec.name.clone());
        state.units.insert(
            spec.name.clone(),
            LiveUnit {
                spec: spec.clone(),
                created: Instant::now(),
                script,
                queries: 0,
            },
        );
        Ok(())
    }

    async fn unit_phase(&self, _namespace: &str, name: &str) -> Result<ExecutionPhase, PlatformError> {
        let delay = {
            let state = self.state.lock().unwrap();
            state.units.get(name).and_then(|u| u.script.query_delay)
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let unit = state.units.get_mut(name).ok_or_else(|| PlatformError::NotFound {
            kind: "pod",
            name: name.to_string(),
        })?;

        unit.queries += 1;
        if unit.queries <= unit.script.failing_queries {
            return Err(PlatformError::Request("etcdserver: request timed out".to_string()));
        }

        let phase = match unit.script.finish_after {
            Some(after) if unit.created.elapsed() >= after => unit.script.final_phase,
            _ if unit.queries == 1 => ExecutionPhase::Pending,
            _ => ExecutionPhase::Running,
        };
        Ok(phase)
    }

    async fn unit_log(&self, _namespace: &str, name: &str) -> Result<String, PlatformError> {
        let state = self.state.lock().unwrap();
        let unit = state.units.get(name).ok_or_else(|| PlatformError::NotFound {
            kind: "pod",
            name: name.to_string(),
        })?;
        unit.script.log.clone().map_err(PlatformError::Request)
    }

    async fn delete_unit(&self, _namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.delete_pause().await;
        let mut state = self.state.lock().unwrap();
        state.deleted_units.push(name.to_string());
        if self.fail_deletes {
            return Err(PlatformError::Request("connection reset".to_string()));
        }
        match state.units.remove(name) {
            Some(_) => Ok(()),
            None => Err(PlatformError::NotFound {
                kind: "pod",
                name: name.to_string(),
            }),
        }
    }
}
