//! Moving an image into the target registry.
//!
//! Two paths exist: a registry-to-registry copy, and a restore that exports
//! the image from the node's runtime and pushes it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image_syncer_core::error::{Result, SyncError};
use tempfile::TempPath;

use crate::export::RuntimeExporter;
use crate::oci::{load_archive, ImageReference, RegistryClient};

/// The two transfer paths the sync decision chooses between.
#[async_trait]
pub trait ImageTransfer: Send + Sync {
    /// Copy `source` to `target` through the registries.
    async fn copy(&self, source: &ImageReference, target: &ImageReference) -> Result<()>;

    /// Rebuild `target` from the copy of `source` cached by the local runtime.
    async fn restore(&self, source: &ImageReference, target: &ImageReference) -> Result<()>;
}

/// Transfer implementation backed by a registry client and a runtime exporter.
pub struct TransferExecutor {
    registry: Arc<dyn RegistryClient>,
    exporter: Arc<dyn RuntimeExporter>,
    temp_dir: PathBuf,
}

impl TransferExecutor {
    pub fn new(registry: Arc<dyn RegistryClient>, exporter: Arc<dyn RuntimeExporter>) -> Self {
        Self {
            registry,
            exporter,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Directory for export archives (default: the system temp dir).
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Reserve a unique archive path; the file is removed when dropped.
    fn archive_path(&self) -> Result<TempPath> {
        let prefix = format!("image-{}-", chrono::Utc::now().timestamp());
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tar")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| {
                SyncError::ArchiveError(format!(
                    "Failed to create export archive in {}: {}",
                    self.temp_dir.display(),
                    e
                ))
            })?;
        Ok(file.into_temp_path())
    }
}

#[async_trait]
impl ImageTransfer for TransferExecutor {
    async fn copy(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
        self.registry.copy(source, target).await
    }

    async fn restore(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
        let archive = self.archive_path()?;

        self.exporter
            .export(&source.full_reference(), &archive)
            .await?;

        let image = load_archive(&archive).await?;
        tracing::debug!(
            source = %source,
            layers = image.layer_count(),
            "Loaded image from runtime export"
        );

        self.registry.push(image, target).await?;

        // Explicit close surfaces removal errors; drop covers the error paths.
        if let Err(e) = archive.close() {
            tracing::warn!(error = %e, "Failed to remove export archive");
        }
        Ok(())
    }
}
