//! Kubernetes backend: the bundle becomes a ConfigMap, each test a Pod.
//!
//! Pod layout:
//! - volume `scorecard-bundle` projects the ConfigMap (one `bundle.tar.gz` file)
//! - init container `scorecard-untar` unpacks it into the `scorecard-untar`
//!   emptyDir
//! - container `scorecard-test` runs the test image with the emptyDir mounted
//!   read-only at `/bundle`
//!
//! Pods never restart, so the phase stops at `Succeeded` or `Failed`.

use super::{
    phase_from_str, ArtifactSpec, Platform, PlatformError, UnitSpec, ARCHIVE_KEY,
    BUNDLE_MOUNT_PATH, DIGEST_ANNOTATION, TEST_CONTAINER_NAME,
};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use scorecard_common::types::ExecutionPhase;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const BUNDLE_VOLUME: &str = "scorecard-bundle";
const UNTAR_VOLUME: &str = "scorecard-untar";
const UNTAR_CONTAINER_NAME: &str = "scorecard-untar";
const ARCHIVE_MOUNT_PATH: &str = "/scorecard";

pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using an explicit kubeconfig, or the usual in-cluster /
    /// `KUBECONFIG` / `~/.kube/config` discovery when none is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, PlatformError> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    PlatformError::Request(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| PlatformError::Request(format!("invalid kubeconfig: {}", e)))?;
                Client::try_from(config)
                    .map_err(|e| PlatformError::Request(format!("failed to build client: {}", e)))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| PlatformError::Request(format!("could not get Kube connection: {}", e)))?,
        };

        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl Platform for KubePlatform {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create_artifact(&self, spec: &ArtifactSpec<'_>) -> Result<(), PlatformError> {
        let config_map = config_map_definition(spec);
        self.config_maps(spec.namespace)
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(|e| map_error(e, "configmap", spec.name))?;
        debug!(configmap = spec.name, namespace = spec.namespace, "ConfigMap created");
        Ok(())
    }

    async fn delete_artifact(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(e, "configmap", name))?;
        Ok(())
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<(), PlatformError> {
        let pod = pod_definition(spec)?;
        self.pods(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| map_error(e, "pod", &spec.name))?;
        debug!(pod = %spec.name, namespace = %spec.namespace, "Pod created");
        Ok(())
    }

    async fn unit_phase(&self, namespace: &str, name: &str) -> Result<ExecutionPhase, PlatformError> {
        let pod = self
            .pods(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, "pod", name))?;

        let phase = pod
            .status
            .and_then(|s| s.phase)
            .map(|p| phase_from_str(&p))
            .unwrap_or(ExecutionPhase::Pending);
        Ok(phase)
    }

    async fn unit_log(&self, namespace: &str, name: &str) -> Result<String, PlatformError> {
        let params = LogParams {
            container: Some(TEST_CONTAINER_NAME.to_string()),
            ..Default::default()
        };
        self.pods(namespace)
            .logs(name, &params)
            .await
            .map_err(|e| map_error(e, "pod", name))
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(e, "pod", name))?;
        Ok(())
    }
}

/// Immutable ConfigMap carrying the bundle archive as binary data.
pub fn config_map_definition(spec: &ArtifactSpec<'_>) -> ConfigMap {
    let mut annotations = BTreeMap::new();
    annotations.insert(DIGEST_ANNOTATION.to_string(), spec.digest.to_string());

    let mut binary_data = BTreeMap::new();
    binary_data.insert(ARCHIVE_KEY.to_string(), ByteString(spec.archive.to_vec()));

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(spec.name.to_string()),
            namespace: Some(spec.namespace.to_string()),
            labels: Some(spec.labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        binary_data: Some(binary_data),
        immutable: Some(true),
        ..Default::default()
    }
}

pub fn pod_definition(spec: &UnitSpec) -> Result<Pod, PlatformError> {
    let env: Vec<_> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut container = json!({
        "name": TEST_CONTAINER_NAME,
        "image": spec.image,
        "imagePullPolicy": "IfNotPresent",
        "env": env,
        "volumeMounts": [
            { "name": UNTAR_VOLUME, "mountPath": BUNDLE_MOUNT_PATH, "readOnly": true }
        ],
    });
    if let Some(command) = &spec.command {
        container["command"] = json!(command);
    }

    let archive_path = format!("{}/{}", ARCHIVE_MOUNT_PATH, ARCHIVE_KEY);
    let definition = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": spec.labels,
        },
        "spec": {
            "serviceAccountName": spec.service_account,
            "restartPolicy": "Never",
            "initContainers": [{
                "name": UNTAR_CONTAINER_NAME,
                "image": spec.untar_image,
                "command": ["tar", "xzf", archive_path, "-C", BUNDLE_MOUNT_PATH],
                "volumeMounts": [
                    { "name": BUNDLE_VOLUME, "mountPath": ARCHIVE_MOUNT_PATH, "readOnly": true },
                    { "name": UNTAR_VOLUME, "mountPath": BUNDLE_MOUNT_PATH }
                ],
            }],
            "containers": [container],
            "volumes": [
                { "name": BUNDLE_VOLUME, "configMap": { "name": spec.artifact } },
                { "name": UNTAR_VOLUME, "emptyDir": {} }
            ],
        },
    });

    serde_json::from_value(definition)
        .map_err(|e| PlatformError::Rejected(format!("invalid pod definition for '{}': {}", spec.name, e)))
}

fn map_error(err: kube::Error, kind: &'static str, name: &str) -> PlatformError {
    match err {
        kube::Error::Api(response) if response.code == 404 => PlatformError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) => PlatformError::Rejected(format!(
            "{} '{}': {} ({})",
            kind, name, response.message, response.reason
        )),
        other => PlatformError::Request(format!("{} '{}': {}", kind, name, other)),
    }
}
