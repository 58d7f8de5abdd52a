/// Bundle Materializer - Package bundle content as a config artifact
///
/// **Core Responsibility:**
/// Turn a bundle source into one content-addressed archive and publish it
/// once per run. Every execution unit of the run references the artifact
/// by name and sees the same bytes.
///
/// **Archive Rules:**
/// 1. Entries are sorted by path, owners are root, mtimes are zero
/// 2. Files are 0644, directories 0755
/// 3. The gzip header carries no timestamp
///
/// Same directory content therefore always yields the same digest.
use crate::platform::{ArtifactSpec, Platform, MANAGED_BY_LABEL, MANAGED_BY_VALUE, RUN_ID_LABEL};
use flate2::write::GzEncoder;
use flate2::Compression;
use scorecard_common::types::Labels;
use scorecard_common::{Result, ScorecardError};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// The API server caps a whole ConfigMap object at 1 MiB.
const CONFIG_MAP_LIMIT: usize = 1024 * 1024;
const CONFIG_MAP_HEADROOM: usize = 16 * 1024;

/// `binaryData` is stored base64-encoded, so the raw archive gets 3/4 of
/// what is left after metadata headroom.
pub const MAX_ARCHIVE_BYTES: usize = (CONFIG_MAP_LIMIT - CONFIG_MAP_HEADROOM) / 4 * 3;

/// Where bundle content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
    Directory(PathBuf),
}

impl fmt::Display for BundleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleSource::Directory(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Packed bundle content plus its digest.
#[derive(Debug, Clone)]
pub struct BundleArchive {
    bytes: Vec<u8>,
    digest: String,
    files: usize,
}

impl BundleArchive {
    pub fn pack(source: &BundleSource) -> Result<Self> {
        match source {
            BundleSource::Directory(dir) => Self::pack_directory(dir),
        }
    }

    fn pack_directory(dir: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(dir)
            .map_err(|e| materialize_error(format!("cannot read bundle {}: {}", dir.display(), e)))?;
        if !metadata.is_dir() {
            return Err(materialize_error(format!("bundle {} is not a directory", dir.display())));
        }

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut files = 0;

        let walker = WalkDir::new(dir).min_depth(1).follow_links(true).sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| materialize_error(format!("failed to walk bundle: {}", e)))?;
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| materialize_error(format!("unexpected path {}: {}", entry.path().display(), e)))?;

            let mut header = tar::Header::new_gnu();
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);

            if entry.file_type().is_dir() {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder
                    .append_data(&mut header, relative.join(""), std::io::empty())
                    .map_err(|e| archive_error(relative, e))?;
            } else if entry.file_type().is_file() {
                let data = std::fs::read(entry.path())
                    .map_err(|e| materialize_error(format!("cannot read {}: {}", entry.path().display(), e)))?;
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                builder
                    .append_data(&mut header, relative, data.as_slice())
                    .map_err(|e| archive_error(relative, e))?;
                files += 1;
            } else {
                debug!(path = %entry.path().display(), "Skipping special file");
            }
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| materialize_error(format!("failed to finish archive: {}", e)))?;
        let bytes = encoder
            .finish()
            .map_err(|e| materialize_error(format!("failed to compress archive: {}", e)))?;

        if bytes.len() > MAX_ARCHIVE_BYTES {
            return Err(materialize_error(format!(
                "bundle archive is {} bytes, limit is {}",
                bytes.len(),
                MAX_ARCHIVE_BYTES
            )));
        }

        let digest = hex::encode(Sha256::digest(&bytes));
        Ok(Self { bytes, digest, files })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex SHA-256 of the compressed archive.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn files(&self) -> usize {
        self.files
    }

    #[cfg(test)]
    pub fn entries(&self) -> Vec<String> {
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(self.bytes.as_slice()));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let path = e.unwrap().path().unwrap().to_string_lossy().into_owned();
                path.trim_end_matches('/').to_string()
            })
            .collect()
    }
}

/// Published config artifact. Owned by the run that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact {
    pub name: String,
    pub namespace: String,
    pub digest: String,
}

/// Artifact names carry the digest prefix for humans and the run id for
/// uniqueness, so concurrent runs never share or delete each other's state.
pub fn artifact_name(digest: &str, run_id: &str) -> String {
    let short = digest.get(..12).unwrap_or(digest);
    format!("scorecard-bundle-{}-{}", short, run_id)
}

#[instrument(skip(platform, archive), fields(platform = platform.name(), digest = %archive.digest()))]
pub async fn materialize<P: Platform>(
    platform: &P,
    archive: &BundleArchive,
    namespace: &str,
    run_id: &str,
) -> Result<BundleArtifact> {
    let name = artifact_name(archive.digest(), run_id);

    let mut labels = Labels::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(RUN_ID_LABEL.to_string(), run_id.to_string());

    let spec = ArtifactSpec {
        name: &name,
        namespace,
        digest: archive.digest(),
        labels: &labels,
        archive: archive.bytes(),
    };
    platform
        .create_artifact(&spec)
        .await
        .map_err(|e| materialize_error(format!("failed to create config artifact '{}': {}", name, e)))?;

    info!(
        artifact = %name,
        namespace,
        size = archive.size(),
        files = archive.files(),
        "Bundle artifact created"
    );

    Ok(BundleArtifact {
        name,
        namespace: namespace.to_string(),
        digest: archive.digest().to_string(),
    })
}

fn materialize_error(reason: String) -> ScorecardError {
    ScorecardError::Materialize(reason)
}

fn archive_error(path: &Path, err: std::io::Error) -> ScorecardError {
    materialize_error(format!("failed to archive {}: {}", path.display(), err))
}
