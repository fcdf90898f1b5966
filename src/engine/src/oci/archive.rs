//! Loading images exported from a node's container runtime.
//!
//! `ctr images export` writes an OCI image layout tar; `docker save` writes
//! either an OCI layout (Docker 25+) or the classic `manifest.json` archive.
//! Both are unpacked into a temporary directory and read into memory.

use std::path::{Component, Path, PathBuf};

use image_syncer_core::error::{Result, SyncError};
use oci_distribution::client::{Config, ImageLayer};
use oci_distribution::manifest::OciImageManifest;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::registry::host_architecture;

const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
const DOCKER_LAYER_TAR_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar";
const DOCKER_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Maximum depth of nested image indexes followed in an OCI layout.
const MAX_INDEX_DEPTH: usize = 4;

/// An image held in memory, ready to be pushed.
pub struct LocalImage {
    layers: Vec<ImageLayer>,
    config: Config,
    manifest: Option<OciImageManifest>,
}

impl LocalImage {
    pub fn new(layers: Vec<ImageLayer>, config: Config, manifest: Option<OciImageManifest>) -> Self {
        Self {
            layers,
            config,
            manifest,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn manifest(&self) -> Option<&OciImageManifest> {
        self.manifest.as_ref()
    }

    pub fn into_parts(self) -> (Vec<ImageLayer>, Config, Option<OciImageManifest>) {
        (self.layers, self.config, self.manifest)
    }
}

/// Entry of a `docker save` manifest.json.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerArchiveEntry {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// Load an exported image archive into memory.
///
/// Extraction runs on a blocking thread; the extraction directory is removed
/// before this returns.
pub async fn load_archive(path: &Path) -> Result<LocalImage> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_archive(&path))
        .await
        .map_err(|e| SyncError::ArchiveError(format!("Archive loader panicked: {}", e)))?
}

fn read_archive(path: &Path) -> Result<LocalImage> {
    let tmp_dir = tempfile::tempdir()
        .map_err(|e| SyncError::ArchiveError(format!("Failed to create temp directory: {}", e)))?;

    let file = std::fs::File::open(path).map_err(|e| {
        SyncError::ArchiveError(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut archive = tar::Archive::new(file);
    archive
        .unpack(tmp_dir.path())
        .map_err(|e| SyncError::ArchiveError(format!("Failed to extract archive: {}", e)))?;

    let root = tmp_dir.path();
    if root.join("index.json").is_file() {
        read_oci_layout(root)
    } else if root.join("manifest.json").is_file() {
        read_docker_archive(root)
    } else {
        Err(SyncError::ArchiveError(
            "Archive contains neither index.json nor manifest.json".to_string(),
        ))
    }
}

/// Read an OCI image layout directory (index.json → manifest → config + layers).
fn read_oci_layout(root: &Path) -> Result<LocalImage> {
    let index: serde_json::Value =
        serde_json::from_slice(&read_file(&root.join("index.json"), "index.json")?)?;
    let manifest_digest = resolve_manifest(root, &index, 0)?;

    let manifest_data = read_blob(root, &manifest_digest)?;
    let mut manifest: OciImageManifest = serde_json::from_slice(&manifest_data)?;
    if manifest.media_type.is_none() {
        manifest.media_type = Some(oci_distribution::manifest::OCI_IMAGE_MEDIA_TYPE.to_string());
    }

    let config_data = read_blob(root, &manifest.config.digest)?;
    let config = Config::new(config_data, manifest.config.media_type.clone(), None);

    let mut layers = Vec::with_capacity(manifest.layers.len());
    for layer_desc in &manifest.layers {
        let layer_data = read_blob(root, &layer_desc.digest)?;

        tracing::debug!(
            digest = %layer_desc.digest,
            size = layer_data.len(),
            "Read layer from runtime export"
        );

        layers.push(ImageLayer::new(layer_data, layer_desc.media_type.clone(), None));
    }

    Ok(LocalImage::new(layers, config, Some(manifest)))
}

/// Follow an index (and nested indexes) to a single image manifest digest.
///
/// Prefers the linux manifest for the host architecture; otherwise takes the
/// first manifest whose blob is actually present in the layout.
fn resolve_manifest(root: &Path, index: &serde_json::Value, depth: usize) -> Result<String> {
    if depth > MAX_INDEX_DEPTH {
        return Err(SyncError::ArchiveError(
            "Image index nesting too deep".to_string(),
        ));
    }

    let entries = index["manifests"]
        .as_array()
        .ok_or_else(|| SyncError::ArchiveError("No manifests in image index".to_string()))?;

    let arch = host_architecture();
    let preferred = entries.iter().find(|entry| {
        entry["platform"]["os"] == "linux" && entry["platform"]["architecture"] == arch
    });

    for entry in preferred.into_iter().chain(entries.iter()) {
        let Some(digest) = entry["digest"].as_str() else {
            continue;
        };
        if !blob_path(root, digest)?.is_file() {
            continue;
        }

        let media_type = entry["mediaType"].as_str().unwrap_or_default();
        if media_type == OCI_INDEX_MEDIA_TYPE || media_type == DOCKER_MANIFEST_LIST_MEDIA_TYPE {
            let nested: serde_json::Value = serde_json::from_slice(&read_blob(root, digest)?)?;
            return resolve_manifest(root, &nested, depth + 1);
        }
        return Ok(digest.to_string());
    }

    Err(SyncError::ArchiveError(
        "No image manifest present in archive".to_string(),
    ))
}

/// Read a classic `docker save` archive and synthesize a manifest for it.
fn read_docker_archive(root: &Path) -> Result<LocalImage> {
    let entries: Vec<DockerArchiveEntry> =
        serde_json::from_slice(&read_file(&root.join("manifest.json"), "manifest.json")?)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::ArchiveError("Empty manifest.json".to_string()))?;

    tracing::debug!(
        repo_tags = ?entry.repo_tags,
        layers = entry.layers.len(),
        "Reading docker archive"
    );

    let config_data = read_file(&archive_path(root, &entry.config)?, "image config")?;
    let config_descriptor = descriptor(DOCKER_CONFIG_MEDIA_TYPE, &config_data);

    let mut layers = Vec::with_capacity(entry.layers.len());
    let mut layer_descriptors = Vec::with_capacity(entry.layers.len());
    for layer_path in &entry.layers {
        let data = read_file(&archive_path(root, layer_path)?, layer_path)?;
        let media_type = if data.starts_with(&[0x1f, 0x8b]) {
            DOCKER_LAYER_GZIP_MEDIA_TYPE
        } else {
            DOCKER_LAYER_TAR_MEDIA_TYPE
        };
        layer_descriptors.push(descriptor(media_type, &data));
        layers.push(ImageLayer::new(data, media_type.to_string(), None));
    }

    let manifest: OciImageManifest = serde_json::from_value(serde_json::json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_MANIFEST_MEDIA_TYPE,
        "config": config_descriptor,
        "layers": layer_descriptors,
    }))?;

    let config = Config::new(config_data, DOCKER_CONFIG_MEDIA_TYPE.to_string(), None);
    Ok(LocalImage::new(layers, config, Some(manifest)))
}

/// Content descriptor JSON for a blob.
fn descriptor(media_type: &str, data: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "mediaType": media_type,
        "digest": sha256_digest(data),
        "size": data.len(),
    })
}

/// `sha256:<hex>` digest of a blob.
pub(crate) fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Path of a blob inside an OCI layout.
fn blob_path(root: &Path, digest: &str) -> Result<PathBuf> {
    let (algorithm, hex) = digest
        .split_once(':')
        .ok_or_else(|| SyncError::ArchiveError(format!("Invalid digest '{}'", digest)))?;
    archive_path(root, &format!("blobs/{}/{}", algorithm, hex))
}

fn read_blob(root: &Path, digest: &str) -> Result<Vec<u8>> {
    read_file(&blob_path(root, digest)?, digest)
}

/// Resolve a path recorded inside the archive, refusing to leave `root`.
fn archive_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SyncError::ArchiveError(format!(
            "Path '{}' escapes the archive",
            relative.display()
        )));
    }
    Ok(root.join(relative))
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| SyncError::ArchiveError(format!("Failed to read {}: {}", what, e)))
}
