// Test catalog loading for scorecard
use crate::error::{Result, ScorecardError};
use crate::types::TestSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Location of the test configuration inside a bundle, used when no
/// explicit config file is passed.
pub const BUNDLE_CONFIG_PATH: &str = "tests/scorecard/config.yaml";

/// Ordered set of declared tests, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCatalog {
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

impl TestCatalog {
    /// Parse a YAML test-definition document.
    ///
    /// Only structure is checked here; empty or duplicate names are left for
    /// selection and execution to surface.
    pub fn parse(document: &str) -> Result<Self> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(document).map_err(|e| ScorecardError::Parse(e.to_string()))
    }

    /// Load the catalog from a config file on disk
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.is_file() {
            return Err(ScorecardError::Config(format!(
                "test configuration not found: {}",
                config_path.display()
            )));
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            ScorecardError::Config(format!("failed to read {}: {}", config_path.display(), e))
        })?;

        Self::parse(&content)
    }

    /// Config path to use for a run: the explicit one, or the bundle default.
    pub fn resolve_path(explicit: Option<&Path>, bundle_dir: &Path) -> PathBuf {
        match explicit {
            Some(path) => path.to_path_buf(),
            None => bundle_dir.join(BUNDLE_CONFIG_PATH),
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tests.iter().map(|t| t.name.as_str()).collect()
    }
}
