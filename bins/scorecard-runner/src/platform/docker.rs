/// Docker backend for local runs.
///
/// **Mapping onto the platform contract:**
/// - Config artifact: the Docker daemon has no config object outside swarm,
///   so artifacts live in this process, re-rooted under `bundle/`.
/// - Execution unit: one container per test, named after the unit. The
///   artifact is uploaded into the container before it starts, so the test
///   sees the bundle at `/bundle` exactly like on Kubernetes.
/// - Phase: derived from the container state and exit code.
///
/// Namespace, service account and untar image have no Docker equivalent;
/// the namespace is only recorded as a label.
use super::{ArtifactSpec, Platform, PlatformError, UnitSpec, BUNDLE_MOUNT_PATH};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::ContainerStateStatusEnum;
use bollard::Docker;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures_util::stream::StreamExt;
use scorecard_common::types::ExecutionPhase;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const NAMESPACE_LABEL: &str = "scorecard.io/namespace";

/// Removes a half-created container unless disarmed.
///
/// Creation is several calls (create, upload, start); if any later step
/// fails the container must not be left behind.
struct ContainerGuard<'a> {
    docker: &'a Docker,
    name: String,
    armed: bool,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, name: &str) -> Self {
        Self {
            docker,
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Drop cannot await; removal happens on the runtime in the background.
        let docker = self.docker.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&name, Some(options)).await {
                warn!(container = %name, error = %e, "Failed to remove partially created container");
            }
        });
    }
}

pub struct DockerPlatform {
    docker: Docker,
    artifacts: RwLock<HashMap<String, Bytes>>,
}

impl DockerPlatform {
    pub fn connect() -> Result<Self, PlatformError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            PlatformError::Request(format!("failed to connect to Docker daemon: {}", e))
        })?;
        Ok(Self {
            docker,
            artifacts: RwLock::new(HashMap::new()),
        })
    }

    fn artifact_key(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }

    /// Pull the image if it is not present locally
    async fn ensure_image(&self, image: &str) -> Result<(), PlatformError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| map_error(e, "image", image))?;
        }

        info!(image, "Image pulled");
        Ok(())
    }
}

impl Platform for DockerPlatform {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create_artifact(&self, spec: &ArtifactSpec<'_>) -> Result<(), PlatformError> {
        let key = Self::artifact_key(spec.namespace, spec.name);
        let rooted = reroot_archive(spec.archive, BUNDLE_MOUNT_PATH.trim_start_matches('/'))?;

        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(&key) {
            return Err(PlatformError::Rejected(format!(
                "artifact '{}' already exists",
                spec.name
            )));
        }
        artifacts.insert(key, Bytes::from(rooted));
        debug!(artifact = spec.name, digest = spec.digest, "Artifact registered");
        Ok(())
    }

    async fn delete_artifact(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        let key = Self::artifact_key(namespace, name);
        match self.artifacts.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => Err(PlatformError::NotFound {
                kind: "artifact",
                name: name.to_string(),
            }),
        }
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<(), PlatformError> {
        let archive = self
            .artifacts
            .read()
            .await
            .get(&Self::artifact_key(&spec.namespace, &spec.artifact))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: "artifact",
                name: spec.artifact.clone(),
            })?;

        self.ensure_image(&spec.image).await?;

        let mut labels: HashMap<String, String> =
            spec.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        labels.insert(NAMESPACE_LABEL.to_string(), spec.namespace.clone());

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: spec.command.clone(),
            env: Some(env),
            labels: Some(labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_error(e, "container", &spec.name))?;

        let guard = ContainerGuard::new(&self.docker, &spec.name);

        let upload = UploadToContainerOptions {
            path: "/",
            ..Default::default()
        };
        self.docker
            .upload_to_container(&spec.name, Some(upload), archive)
            .await
            .map_err(|e| map_error(e, "container", &spec.name))?;

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error(e, "container", &spec.name))?;

        guard.disarm();
        debug!(container = %spec.name, image = %spec.image, "Container started");
        Ok(())
    }

    async fn unit_phase(&self, _namespace: &str, name: &str) -> Result<ExecutionPhase, PlatformError> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(e, "container", name))?;

        let Some(state) = inspect.state else {
            return Ok(ExecutionPhase::Unknown);
        };
        Ok(phase_from_state(state.status, state.exit_code))
    }

    async fn unit_log(&self, _namespace: &str, name: &str) -> Result<String, PlatformError> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: false,
            follow: false,
            ..Default::default()
        });

        let mut stdout = String::new();
        let mut stream = self.docker.logs(name, options);
        while let Some(output) = stream.next().await {
            match output.map_err(|e| map_error(e, "container", name))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok(stdout)
    }

    async fn delete_unit(&self, _namespace: &str, name: &str) -> Result<(), PlatformError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_error(e, "container", name))
    }
}

fn phase_from_state(status: Option<ContainerStateStatusEnum>, exit_code: Option<i64>) -> ExecutionPhase {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ExecutionPhase::Pending,
        Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::RESTARTING)
        | Some(ContainerStateStatusEnum::PAUSED)
        | Some(ContainerStateStatusEnum::REMOVING) => ExecutionPhase::Running,
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            if exit_code == Some(0) {
                ExecutionPhase::Succeeded
            } else {
                ExecutionPhase::Failed
            }
        }
        _ => ExecutionPhase::Unknown,
    }
}

/// Unpack a gzipped bundle archive and repack it with every entry under
/// `root/`, uncompressed, ready for `upload_to_container` at `/`.
fn reroot_archive(archive: &[u8], root: &str) -> Result<Vec<u8>, PlatformError> {
    let invalid = |e: std::io::Error| PlatformError::Rejected(format!("invalid bundle archive: {}", e));

    let mut source = tar::Archive::new(GzDecoder::new(archive));
    let mut builder = tar::Builder::new(Vec::new());

    let mut root_header = tar::Header::new_gnu();
    root_header.set_entry_type(tar::EntryType::Directory);
    root_header.set_mode(0o755);
    root_header.set_size(0);
    root_header.set_mtime(0);
    builder
        .append_data(&mut root_header, format!("{}/", root), std::io::empty())
        .map_err(invalid)?;

    for entry in source.entries().map_err(invalid)? {
        let mut entry = entry.map_err(invalid)?;
        let path = Path::new(root).join(entry.path().map_err(invalid)?);
        let mut header = entry.header().clone();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(invalid)?;
        builder
            .append_data(&mut header, path, data.as_slice())
            .map_err(invalid)?;
    }

    builder.into_inner().map_err(invalid)
}

fn map_error(err: DockerError, kind: &'static str, name: &str) -> PlatformError {
    match err {
        DockerError::DockerResponseServerError { status_code: 404, .. } => PlatformError::NotFound {
            kind,
            name: name.to_string(),
        },
        DockerError::DockerResponseServerError { status_code, message } if status_code < 500 => {
            PlatformError::Rejected(format!("{} '{}': {} ({})", kind, name, message, status_code))
        }
        other => PlatformError::Request(format!("{} '{}': {}", kind, name, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gz_archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_reroot_archive_prefixes_entries() {
        let archive = gz_archive(&[("manifests/csv.yaml", "kind: CSV"), ("metadata/annotations.yaml", "a: b")]);
        let rooted = reroot_archive(&archive, "bundle").unwrap();

        let mut reader = tar::Archive::new(rooted.as_slice());
        let mut paths = Vec::new();
        let mut csv = String::new();
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
            if path.ends_with("csv.yaml") {
                entry.read_to_string(&mut csv).unwrap();
            }
            paths.push(path);
        }

        assert_eq!(
            paths,
            vec!["bundle", "bundle/manifests/csv.yaml", "bundle/metadata/annotations.yaml"]
        );
        assert_eq!(csv, "kind: CSV");
    }

    #[test]
    fn test_reroot_rejects_garbage() {
        let err = reroot_archive(b"not a gzip stream", "bundle").unwrap_err();
        assert!(matches!(err, PlatformError::Rejected(_)));
    }

    #[test]
    fn test_phase_from_container_state() {
        use ContainerStateStatusEnum::*;
        assert_eq!(phase_from_state(Some(CREATED), None), ExecutionPhase::Pending);
        assert_eq!(phase_from_state(Some(RUNNING), None), ExecutionPhase::Running);
        assert_eq!(phase_from_state(Some(EXITED), Some(0)), ExecutionPhase::Succeeded);
        assert_eq!(phase_from_state(Some(EXITED), Some(1)), ExecutionPhase::Failed);
        assert_eq!(phase_from_state(Some(DEAD), None), ExecutionPhase::Failed);
        assert_eq!(phase_from_state(None, None), ExecutionPhase::Unknown);
    }

    #[test]
    fn test_not_found_mapping() {
        let err = map_error(
            DockerError::DockerResponseServerError {
                status_code: 404,
                message: "No such container".to_string(),
            },
            "container",
            "scorecard-a",
        );
        assert!(err.is_not_found());
    }
}
