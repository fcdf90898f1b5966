//! OCI registry client for existence checks, copies and pushes.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GHCR, private registries).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use image_syncer_core::error::{Result, SyncError};
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{ImageIndexEntry, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};

use super::archive::LocalImage;
use super::reference::ImageReference;
use crate::metrics::MetricsSink;

/// Operation labels recorded in the metrics sink.
pub mod operations {
    pub const CHECK_EXISTS: &str = "check_exists";
    pub const COPY: &str = "copy";
    pub const PUSH_FROM_RUNTIME: &str = "push_from_runtime";
}

/// Registry operations the sync engine depends on.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Whether the manifest for `reference` exists.
    ///
    /// "Not found" is `Ok(false)`; transport and auth failures are errors.
    async fn exists(&self, reference: &ImageReference) -> Result<bool>;

    /// Copy manifest, config and layers from `source` to `target`.
    async fn copy(&self, source: &ImageReference, target: &ImageReference) -> Result<()>;

    /// Push an image loaded from a local archive to `target`.
    async fn push(&self, image: LocalImage, target: &ImageReference) -> Result<()>;
}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// `RegistryClient` backed by `oci-distribution`.
///
/// The configured credentials are only sent to the target registry; every
/// other registry is accessed anonymously.
pub struct OciRegistryClient {
    client: Client,
    target_host: String,
    target_auth: RegistryAuth,
    metrics: Arc<dyn MetricsSink>,
}

impl OciRegistryClient {
    /// Create a client for the given target registry.
    ///
    /// Hosts in `insecure_registries` are reached over plain HTTP.
    pub fn new(
        target_host: impl Into<String>,
        target_auth: RegistryAuth,
        insecure_registries: Vec<String>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries)
        };
        let config = ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            target_host: target_host.into(),
            target_auth,
            metrics,
        }
    }

    fn auth_for(&self, reference: &ImageReference) -> OciRegistryAuth {
        if reference.is_hosted_on(&self.target_host) {
            self.target_auth.to_oci_auth()
        } else {
            RegistryAuth::anonymous().to_oci_auth()
        }
    }

    /// Pull config and layer blobs for a manifest into memory.
    async fn pull_image_content(
        &self,
        oci_ref: &Reference,
        manifest: &OciImageManifest,
        registry: &str,
    ) -> Result<(Config, Vec<ImageLayer>)> {
        let mut config_data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, &manifest.config, &mut config_data)
            .await
            .map_err(|e| SyncError::RegistryError {
                registry: registry.to_string(),
                message: format!("Failed to pull config blob: {}", e),
            })?;
        let config = Config::new(config_data, manifest.config.media_type.clone(), None);

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            tracing::debug!(
                digest = %layer.digest,
                size = layer.size,
                "Pulling layer"
            );

            let mut layer_data: Vec<u8> = Vec::new();
            self.client
                .pull_blob(oci_ref, layer, &mut layer_data)
                .await
                .map_err(|e| SyncError::RegistryError {
                    registry: registry.to_string(),
                    message: format!("Failed to pull layer {}: {}", layer.digest, e),
                })?;

            layers.push(ImageLayer::new(layer_data, layer.media_type.clone(), None));
        }

        Ok((config, layers))
    }

    async fn copy_inner(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
        let source_ref = to_oci_reference(source)?;
        let target_ref = to_oci_reference(target)?;

        let (manifest, digest) = self
            .client
            .pull_image_manifest(&source_ref, &self.auth_for(source))
            .await
            .map_err(|e| SyncError::RegistryError {
                registry: source.registry.clone(),
                message: format!("Failed to pull manifest: {}", e),
            })?;

        tracing::debug!(
            source = %source,
            digest = %digest,
            layers = manifest.layers.len(),
            "Pulled source manifest"
        );

        let (config, layers) = self
            .pull_image_content(&source_ref, &manifest, &source.registry)
            .await?;

        self.client
            .push(
                &target_ref,
                &layers,
                config,
                &self.auth_for(target),
                Some(manifest),
            )
            .await
            .map_err(|e| SyncError::RegistryError {
                registry: target.registry.clone(),
                message: format!("Failed to push image: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn exists(&self, reference: &ImageReference) -> Result<bool> {
        let start = Instant::now();
        let oci_ref = to_oci_reference(reference)?;

        let result = self
            .client
            .fetch_manifest_digest(&oci_ref, &self.auth_for(reference))
            .await;
        self.metrics
            .operation_duration(operations::CHECK_EXISTS, start.elapsed());

        match result {
            Ok(digest) => {
                tracing::trace!(reference = %reference, digest = %digest, "Manifest found");
                Ok(true)
            }
            Err(e) => {
                let message = e.to_string();
                let missing = matches!(e, OciDistributionError::ImageManifestNotFoundError(_));
                if missing || is_not_found(&message) {
                    Ok(false)
                } else {
                    Err(SyncError::RegistryError {
                        registry: reference.registry.clone(),
                        message: format!("Failed to check if image exists: {}", message),
                    })
                }
            }
        }
    }

    async fn copy(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
        let start = Instant::now();

        tracing::info!(source = %source, target = %target, "Copying image");

        let result = self.copy_inner(source, target).await;
        self.metrics
            .operation_duration(operations::COPY, start.elapsed());
        result
    }

    async fn push(&self, image: LocalImage, target: &ImageReference) -> Result<()> {
        let start = Instant::now();
        let oci_ref = to_oci_reference(target)?;
        let (layers, config, manifest) = image.into_parts();

        tracing::info!(
            target = %target,
            layers = layers.len(),
            "Pushing image to registry"
        );

        let result = self
            .client
            .push(&oci_ref, &layers, config, &self.auth_for(target), manifest)
            .await
            .map_err(|e| SyncError::RegistryError {
                registry: target.registry.clone(),
                message: format!("Failed to push image: {}", e),
            });
        self.metrics
            .operation_duration(operations::PUSH_FROM_RUNTIME, start.elapsed());

        let response = result?;
        tracing::info!(
            target = %target,
            manifest_url = %response.manifest_url,
            "Image pushed successfully"
        );
        Ok(())
    }
}

/// Whether a registry error message means the manifest or repository is absent.
pub(crate) fn is_not_found(message: &str) -> bool {
    message.contains("MANIFEST_UNKNOWN")
        || message.contains("NAME_UNKNOWN")
        || message.to_ascii_lowercase().contains("not found")
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.tag, &reference.digest) {
        (_, Some(digest)) => format!("{}/{}@{}", reference.registry, reference.repository, digest),
        (Some(tag), None) => format!("{}/{}:{}", reference.registry, reference.repository, tag),
        (None, None) => format!("{}/{}:latest", reference.registry, reference.repository),
    };

    ref_str.parse::<Reference>().map_err(|e| {
        SyncError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Platform resolver that selects linux images matching the host architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = host_architecture();

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}

/// OCI architecture name of the running host.
pub(crate) fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
