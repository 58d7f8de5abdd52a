/// Built-in Bundle Checks
///
/// **Core Responsibility:**
/// Inspect an unpacked bundle and produce one `TestResult` per check.
///
/// **Available checks:**
/// - `olm-bundle-validation`: bundle layout, annotations and manifests
/// - `olm-crds-have-validation`: every CRD version carries an OpenAPI schema
/// - `olm-crds-have-resources`: every owned CRD lists the resources it creates
/// - `olm-spec-descriptors`: every owned CRD's spec fields have CSV descriptors
/// - `olm-status-descriptors`: same for status fields
///
/// Each check writes its progress into its own `CapturedLog`, which ends up
/// in the result's `log` field. Nothing is redirected globally.
use crate::bundle::{Bundle, Manifest, CRD_KIND, CSV_KIND};
use scorecard_common::types::{TestResult, TestState};
use serde_yaml::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

pub const BUNDLE_VALIDATION: &str = "olm-bundle-validation";
pub const CRDS_HAVE_VALIDATION: &str = "olm-crds-have-validation";
pub const CRDS_HAVE_RESOURCES: &str = "olm-crds-have-resources";
pub const SPEC_DESCRIPTORS: &str = "olm-spec-descriptors";
pub const STATUS_DESCRIPTORS: &str = "olm-status-descriptors";

/// Annotation keys a registry+v1 bundle must declare.
const REQUIRED_ANNOTATIONS: [&str; 5] = [
    "operators.operatorframework.io.bundle.mediatype.v1",
    "operators.operatorframework.io.bundle.manifests.v1",
    "operators.operatorframework.io.bundle.metadata.v1",
    "operators.operatorframework.io.bundle.package.v1",
    "operators.operatorframework.io.bundle.channels.v1",
];
const DEFAULT_CHANNEL_ANNOTATION: &str = "operators.operatorframework.io.bundle.channel.default.v1";

/// Per-check log buffer.
#[derive(Debug, Default)]
pub struct CapturedLog {
    lines: Vec<String>,
}

impl CapturedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!(line = %line, "check log");
        self.lines.push(line);
    }

    pub fn into_string(self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    BundleValidation,
    CrdsHaveValidation,
    CrdsHaveResources,
    SpecDescriptors,
    StatusDescriptors,
}

impl Check {
    pub const ALL: [Check; 5] = [
        Check::BundleValidation,
        Check::CrdsHaveValidation,
        Check::CrdsHaveResources,
        Check::SpecDescriptors,
        Check::StatusDescriptors,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Check::BundleValidation => BUNDLE_VALIDATION,
            Check::CrdsHaveValidation => CRDS_HAVE_VALIDATION,
            Check::CrdsHaveResources => CRDS_HAVE_RESOURCES,
            Check::SpecDescriptors => SPEC_DESCRIPTORS,
            Check::StatusDescriptors => STATUS_DESCRIPTORS,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Check::BundleValidation => "Validates bundle contents",
            Check::CrdsHaveValidation => "All CRDs have an OpenAPI validation subsection",
            Check::CrdsHaveResources => "All Owned CRDs contain a resources subsection",
            Check::SpecDescriptors => "All spec fields have matching descriptors in the CSV",
            Check::StatusDescriptors => "All status fields have matching descriptors in the CSV",
        }
    }

    /// Load the bundle at `dir` and run this check against it.
    pub fn run(&self, dir: &Path) -> TestResult {
        let mut log = CapturedLog::new();
        log.record(format!("loading bundle from {}", dir.display()));

        let mut result = TestResult::new(self.name(), TestState::Pass);
        result.description = self.description().to_string();

        match Bundle::load(dir) {
            Ok(bundle) => {
                log.record(format!("found {} manifest document(s)", bundle.manifests.len()));
                let findings = match self {
                    Check::BundleValidation => bundle_validation(&bundle, &mut log),
                    Check::CrdsHaveValidation => crds_have_validation(&bundle, &mut log),
                    Check::CrdsHaveResources => crds_have_resources(&bundle, &mut log),
                    Check::SpecDescriptors => descriptors(&bundle, Section::Spec, &mut log),
                    Check::StatusDescriptors => descriptors(&bundle, Section::Status, &mut log),
                };
                if !findings.errors.is_empty() {
                    result.state = TestState::Fail;
                }
                result.errors = findings.errors;
                result.suggestions = findings.suggestions;
            }
            Err(e) => {
                log.record(format!("bundle could not be loaded: {}", e));
                result.state = TestState::Error;
                result.errors.push(e.to_string());
            }
        }

        result.log = log.into_string();
        result
    }
}

impl FromStr for Check {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Check::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Check::ALL.iter().map(Check::name).collect();
                format!("unknown test '{}', available: {}", s, known.join(", "))
            })
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    suggestions: Vec<String>,
}

fn bundle_validation(bundle: &Bundle, log: &mut CapturedLog) -> Findings {
    let mut findings = Findings::default();

    if !bundle.has_manifests_dir() {
        findings.errors.push("bundle has no manifests/ directory".to_string());
    }
    if !bundle.has_metadata_dir() {
        findings.errors.push("bundle has no metadata/ directory".to_string());
    }

    match &bundle.annotations {
        None => findings
            .errors
            .push("metadata/annotations.yaml is missing".to_string()),
        Some(annotations) => {
            log.record(format!("read {} annotation(s)", annotations.len()));
            for key in REQUIRED_ANNOTATIONS {
                match annotations.get(key) {
                    Some(value) if !value.trim().is_empty() => {}
                    _ => findings
                        .errors
                        .push(format!("required annotation '{}' is missing or empty", key)),
                }
            }
            if !annotations.contains_key(DEFAULT_CHANNEL_ANNOTATION) {
                findings.suggestions.push(format!(
                    "add annotation '{}' to declare the default channel",
                    DEFAULT_CHANNEL_ANNOTATION
                ));
            }
        }
    }

    for error in &bundle.manifest_errors {
        findings
            .errors
            .push(format!("{}: {}", error.path.display(), error.reason));
    }

    for manifest in &bundle.manifests {
        if manifest.api_version().is_none() || manifest.kind().is_none() {
            findings.errors.push(format!(
                "{}: manifest has no apiVersion or kind",
                manifest.path.display()
            ));
        }
    }

    match bundle.of_kind(CSV_KIND).count() {
        0 => findings
            .errors
            .push("bundle contains no ClusterServiceVersion".to_string()),
        1 => log.record("found exactly one ClusterServiceVersion"),
        n => findings
            .errors
            .push(format!("bundle contains {} ClusterServiceVersions, expected one", n)),
    }

    if bundle.of_kind(CRD_KIND).next().is_none() {
        findings
            .suggestions
            .push("bundle ships no CustomResourceDefinitions".to_string());
    }

    findings
}

fn crds_have_validation(bundle: &Bundle, log: &mut CapturedLog) -> Findings {
    let mut findings = Findings::default();

    for crd in bundle.of_kind(CRD_KIND) {
        log.record(format!("checking CRD {}", crd.name()));
        for missing in versions_without_schema(crd) {
            findings.errors.push(format!(
                "CRD {} version {} has no openAPIV3Schema",
                crd.name(),
                missing
            ));
        }
    }

    if findings.errors.is_empty() && bundle.of_kind(CRD_KIND).next().is_none() {
        log.record("no CRDs to check");
    }
    findings
}

/// Versions of a CRD that lack a schema. Handles a top-level
/// `spec.validation` (v1beta1) as well as per-version `schema` (v1).
fn versions_without_schema(crd: &Manifest) -> Vec<String> {
    let has_schema = |value: Option<&Value>| value.and_then(|v| v.get("openAPIV3Schema")).is_some();

    if has_schema(crd.lookup(&["spec", "validation"])) {
        return Vec::new();
    }

    match crd.lookup(&["spec", "versions"]).and_then(Value::as_sequence) {
        Some(versions) if !versions.is_empty() => versions
            .iter()
            .filter(|v| !has_schema(v.get("schema")))
            .map(|v| v.get("name").and_then(Value::as_str).unwrap_or("<unnamed>").to_string())
            .collect(),
        _ => {
            let version = crd
                .lookup(&["spec", "version"])
                .and_then(Value::as_str)
                .unwrap_or("<unspecified>");
            vec![version.to_string()]
        }
    }
}

fn crds_have_resources(bundle: &Bundle, log: &mut CapturedLog) -> Findings {
    let mut findings = Findings::default();

    let Some(csv) = bundle.of_kind(CSV_KIND).next() else {
        findings
            .errors
            .push("bundle contains no ClusterServiceVersion".to_string());
        return findings;
    };

    let owned = csv
        .lookup(&["spec", "customresourcedefinitions", "owned"])
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default();

    if owned.is_empty() {
        findings
            .suggestions
            .push(format!("CSV {} declares no owned CRDs", csv.name()));
        return findings;
    }

    for crd in &owned {
        let name = crd.get("name").and_then(Value::as_str).unwrap_or("<unnamed>");
        let resources = crd
            .get("resources")
            .and_then(Value::as_sequence)
            .map(|r| r.len())
            .unwrap_or(0);
        log.record(format!("owned CRD {} lists {} resource(s)", name, resources));
        if resources == 0 {
            findings
                .errors
                .push(format!("owned CRD {} has no resources listed", name));
        }
    }
    findings
}

/// Top-level object of a custom resource that descriptors annotate.
#[derive(Debug, Clone, Copy)]
enum Section {
    Spec,
    Status,
}

impl Section {
    fn field(self) -> &'static str {
        match self {
            Section::Spec => "spec",
            Section::Status => "status",
        }
    }

    fn descriptors_key(self) -> &'static str {
        match self {
            Section::Spec => "specDescriptors",
            Section::Status => "statusDescriptors",
        }
    }
}

/// Every owned CRD must carry descriptors for `section`, and every field
/// its schema declares under that section must be covered by one.
fn descriptors(bundle: &Bundle, section: Section, log: &mut CapturedLog) -> Findings {
    let mut findings = Findings::default();

    let Some(csv) = bundle.of_kind(CSV_KIND).next() else {
        findings
            .errors
            .push("bundle contains no ClusterServiceVersion".to_string());
        return findings;
    };

    let owned = csv
        .lookup(&["spec", "customresourcedefinitions", "owned"])
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default();

    if owned.is_empty() {
        findings
            .suggestions
            .push(format!("CSV {} declares no owned CRDs", csv.name()));
        return findings;
    }

    for crd in &owned {
        let name = crd.get("name").and_then(Value::as_str).unwrap_or("<unnamed>");
        let covered: Vec<&str> = crd
            .get(section.descriptors_key())
            .and_then(Value::as_sequence)
            .map(|list| {
                list.iter()
                    .filter_map(|d| d.get("path").and_then(Value::as_str))
                    .map(top_level_field)
                    .collect()
            })
            .unwrap_or_default();
        log.record(format!(
            "owned CRD {} has {} {}",
            name,
            covered.len(),
            section.descriptors_key()
        ));

        if covered.is_empty() {
            findings
                .errors
                .push(format!("owned CRD {} has no {}", name, section.descriptors_key()));
            continue;
        }

        let version = crd.get("version").and_then(Value::as_str);
        let definition = bundle.of_kind(CRD_KIND).find(|m| m.name() == name);
        for field in definition
            .map(|m| schema_fields(m, version, section))
            .unwrap_or_default()
        {
            if !covered.contains(&field.as_str()) {
                findings.errors.push(format!(
                    "{} field '{}' of {} has no matching descriptor",
                    section.field(),
                    field,
                    name
                ));
            }
        }
    }
    findings
}

/// `replicas.count` and `nodes[0]` both describe a top-level field.
fn top_level_field(path: &str) -> &str {
    path.split(['.', '[']).next().unwrap_or(path)
}

/// Property names the CRD schema declares under `section`, for `version`
/// when given, else the first version carrying a schema.
fn schema_fields(crd: &Manifest, version: Option<&str>, section: Section) -> Vec<String> {
    let versioned = crd
        .lookup(&["spec", "versions"])
        .and_then(Value::as_sequence)
        .and_then(|versions| {
            versions
                .iter()
                .filter(|v| version.is_none() || v.get("name").and_then(Value::as_str) == version)
                .find_map(|v| v.get("schema").and_then(|s| s.get("openAPIV3Schema")))
        });
    let schema = versioned.or_else(|| {
        crd.lookup(&["spec", "validation"])
            .and_then(|v| v.get("openAPIV3Schema"))
    });

    schema
        .and_then(|s| s.get("properties"))
        .and_then(|p| p.get(section.field()))
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_mapping)
        .map(|props| {
            props
                .iter()
                .filter_map(|(key, _)| key.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::fixtures;
    use std::fs;

    fn valid_bundle() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_bundle(dir.path());
        dir
    }

    #[test]
    fn test_names_round_trip() {
        for check in Check::ALL {
            assert_eq!(check.name().parse::<Check>().unwrap(), check);
        }
        let err = "olm-scorecard-magic".parse::<Check>().unwrap_err();
        assert!(err.contains("available: olm-bundle-validation"));
    }

    #[test]
    fn test_valid_bundle_passes_every_check() {
        let dir = valid_bundle();
        for check in Check::ALL {
            let result = check.run(dir.path());
            assert_eq!(result.state, TestState::Pass, "{}: {:?}", check, result.errors);
            assert_eq!(result.name, check.name());
            assert!(!result.log.is_empty());
        }
    }

    #[test]
    fn test_bundle_validation_reports_missing_annotations() {
        let dir = valid_bundle();
        fs::write(
            dir.path().join("metadata/annotations.yaml"),
            "annotations:\n  operators.operatorframework.io.bundle.package.v1: memcached\n",
        )
        .unwrap();

        let result = Check::BundleValidation.run(dir.path());
        assert_eq!(result.state, TestState::Fail);
        assert_eq!(result.errors.len(), 4);
        assert!(result.suggestions.iter().any(|s| s.contains("default channel")));
    }

    #[test]
    fn test_bundle_validation_requires_single_csv() {
        let dir = valid_bundle();
        fs::write(dir.path().join("manifests/csv2.yaml"), fixtures::CSV).unwrap();

        let result = Check::BundleValidation.run(dir.path());
        assert_eq!(result.state, TestState::Fail);
        assert!(result.errors[0].contains("2 ClusterServiceVersions"));
    }

    #[test]
    fn test_crd_without_schema_fails() {
        let dir = valid_bundle();
        fs::write(
            dir.path().join("manifests/crd.yaml"),
            r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: memcacheds.cache.example.com
spec:
  versions:
    - name: v1alpha1
      schema:
        openAPIV3Schema:
          type: object
    - name: v1beta1
"#,
        )
        .unwrap();

        let result = Check::CrdsHaveValidation.run(dir.path());
        assert_eq!(result.state, TestState::Fail);
        assert_eq!(
            result.errors,
            vec!["CRD memcacheds.cache.example.com version v1beta1 has no openAPIV3Schema"]
        );
    }

    #[test]
    fn test_legacy_crd_validation_block_passes() {
        let dir = valid_bundle();
        fs::write(
            dir.path().join("manifests/crd.yaml"),
            r#"
apiVersion: apiextensions.k8s.io/v1beta1
kind: CustomResourceDefinition
metadata:
  name: memcacheds.cache.example.com
spec:
  version: v1alpha1
  validation:
    openAPIV3Schema:
      type: object
"#,
        )
        .unwrap();

        assert_eq!(Check::CrdsHaveValidation.run(dir.path()).state, TestState::Pass);
    }

    #[test]
    fn test_owned_crd_without_resources_fails() {
        let dir = valid_bundle();
        let csv = fixtures::CSV.replace(
            "        resources:\n          - kind: Deployment\n            version: v1\n",
            "",
        );
        fs::write(dir.path().join("manifests/csv.yaml"), csv).unwrap();

        let result = Check::CrdsHaveResources.run(dir.path());
        assert_eq!(result.state, TestState::Fail);
        assert!(result.errors[0].contains("memcacheds.cache.example.com"));
        assert!(result.log.contains("lists 0 resource(s)"));
    }

    #[test]
    fn test_missing_bundle_is_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let result = Check::BundleValidation.run(&dir.path().join("absent"));
        assert_eq!(result.state, TestState::Error);
        assert!(result.log.contains("could not be loaded"));
    }

    #[test]
    fn test_logs_are_per_check() {
        let dir = valid_bundle();
        let first = Check::CrdsHaveResources.run(dir.path());
        let second = Check::CrdsHaveValidation.run(dir.path());
        assert!(first.log.contains("owned CRD"));
        assert!(!second.log.contains("owned CRD"));
    }

    #[test]
    fn test_descriptor_checks_cover_schema_fields() {
        let dir = valid_bundle();
        assert_eq!(Check::SpecDescriptors.run(dir.path()).state, TestState::Pass);
        assert_eq!(Check::StatusDescriptors.run(dir.path()).state, TestState::Pass);
    }

    #[test]
    fn test_missing_descriptor_list_fails() {
        let dir = valid_bundle();
        let csv = fixtures::CSV.replace(
            "        statusDescriptors:\n          - path: nodes\n            displayName: Nodes\n",
            "",
        );
        fs::write(dir.path().join("manifests/csv.yaml"), csv).unwrap();

        let result = Check::StatusDescriptors.run(dir.path());
        assert_eq!(result.state, TestState::Fail);
        assert_eq!(
            result.errors,
            vec!["owned CRD memcacheds.cache.example.com has no statusDescriptors"]
        );
        // Spec descriptors are unaffected.
        assert_eq!(Check::SpecDescriptors.run(dir.path()).state, TestState::Pass);
    }

    #[test]
    fn test_spec_field_without_descriptor_fails() {
        let dir = valid_bundle();
        let crd = fixtures::CRD.replace(
            "                  size:\n                    type: integer\n",
            "                  size:\n                    type: integer\n                  image:\n                    type: string\n",
        );
        fs::write(dir.path().join("manifests/crd.yaml"), crd).unwrap();

        let result = Check::SpecDescriptors.run(dir.path());
        assert_eq!(result.state, TestState::Fail);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("spec field 'image'"));
    }

    #[test]
    fn test_nested_descriptor_path_covers_top_level_field() {
        assert_eq!(top_level_field("size"), "size");
        assert_eq!(top_level_field("replicas.count"), "replicas");
        assert_eq!(top_level_field("nodes[0]"), "nodes");
    }
}
