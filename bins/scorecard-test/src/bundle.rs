// On-disk bundle as seen from inside a test image
use scorecard_common::{Result, ScorecardError};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFESTS_DIR: &str = "manifests";
pub const METADATA_DIR: &str = "metadata";
pub const ANNOTATIONS_FILE: &str = "annotations.yaml";

pub const CSV_KIND: &str = "ClusterServiceVersion";
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// One YAML document from a manifest file.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    pub document: Value,
}

impl Manifest {
    pub fn kind(&self) -> Option<&str> {
        self.document.get("kind").and_then(Value::as_str)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.document.get("apiVersion").and_then(Value::as_str)
    }

    pub fn name(&self) -> &str {
        self.document
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
    }

    /// Nested lookup by mapping keys.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.document, |value, key| value.get(*key))
    }
}

/// Manifest parse failure, kept so checks can report it.
#[derive(Debug, Clone)]
pub struct ManifestError {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub root: PathBuf,
    pub manifests: Vec<Manifest>,
    pub manifest_errors: Vec<ManifestError>,
    /// `None` when the annotations file is missing; parse errors are fatal.
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct AnnotationsFile {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

impl Bundle {
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(ScorecardError::Config(format!(
                "bundle directory {} does not exist",
                root.display()
            )));
        }

        let mut bundle = Bundle {
            root: root.to_path_buf(),
            ..Default::default()
        };

        let manifests_dir = root.join(MANIFESTS_DIR);
        if manifests_dir.is_dir() {
            for path in sorted_files(&manifests_dir)? {
                if !is_yaml(&path) {
                    continue;
                }
                match read_documents(&path) {
                    Ok(documents) => bundle.manifests.extend(
                        documents
                            .into_iter()
                            .map(|document| Manifest { path: path.clone(), document }),
                    ),
                    Err(reason) => bundle.manifest_errors.push(ManifestError { path, reason }),
                }
            }
        }

        let annotations_path = root.join(METADATA_DIR).join(ANNOTATIONS_FILE);
        if annotations_path.is_file() {
            let content = fs::read_to_string(&annotations_path).map_err(|e| {
                ScorecardError::Parse(format!("failed to read {}: {}", annotations_path.display(), e))
            })?;
            let parsed: AnnotationsFile = serde_yaml::from_str(&content).map_err(|e| {
                ScorecardError::Parse(format!("invalid {}: {}", annotations_path.display(), e))
            })?;
            bundle.annotations = Some(parsed.annotations);
        }

        Ok(bundle)
    }

    pub fn has_manifests_dir(&self) -> bool {
        self.root.join(MANIFESTS_DIR).is_dir()
    }

    pub fn has_metadata_dir(&self) -> bool {
        self.root.join(METADATA_DIR).is_dir()
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Manifest> + 'a {
        self.manifests.iter().filter(move |m| m.kind() == Some(kind))
    }
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| ScorecardError::Config(format!("cannot list {}: {}", dir.display(), e)))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ScorecardError::Config(format!("cannot list {}: {}", dir.display(), e)))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

fn read_documents(path: &Path) -> std::result::Result<Vec<Value>, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = Value::deserialize(document).map_err(|e| e.to_string())?;
        // Empty documents between separators are not manifests.
        if value.is_null() || value == Value::Mapping(Mapping::new()) {
            continue;
        }
        documents.push(value);
    }
    Ok(documents)
}
