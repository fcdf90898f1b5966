//! Per-image sync decision.
//!
//! ```text
//! check target ──► exists ─────────────────────► Skip
//!        │
//!        └──► missing ──► source on target host? ──► Restore
//!                               │
//!                               └──► no ──────────► Copy
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use image_syncer_core::error::{Result, SyncError};
use image_syncer_core::TransferMethod;

use crate::metrics::MetricsSink;
use crate::oci::{ImageReference, RegistryClient};
use crate::transfer::ImageTransfer;

/// Answers whether an image is already present in the target registry.
#[async_trait]
pub trait ExistenceOracle: Send + Sync {
    /// `Ok(false)` means not found; `Err` means the check itself failed.
    async fn exists(&self, reference: &ImageReference) -> Result<bool>;
}

#[async_trait]
impl<T: RegistryClient + ?Sized> ExistenceOracle for T {
    async fn exists(&self, reference: &ImageReference) -> Result<bool> {
        RegistryClient::exists(self, reference).await
    }
}

/// What to do with one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Skip,
    Copy,
    Restore,
}

/// Successful result of syncing one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Already present in the target registry.
    Skipped,
    /// Transferred by the given method.
    Synced(TransferMethod),
}

/// Runs the decision and the chosen transfer for single images.
pub struct ImageSyncer {
    target_host: String,
    oracle: Arc<dyn ExistenceOracle>,
    transfer: Arc<dyn ImageTransfer>,
    metrics: Arc<dyn MetricsSink>,
}

impl ImageSyncer {
    pub fn new(
        target_host: impl Into<String>,
        oracle: Arc<dyn ExistenceOracle>,
        transfer: Arc<dyn ImageTransfer>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            target_host: target_host.into(),
            oracle,
            transfer,
            metrics,
        }
    }

    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    /// Where `source` should live in the target registry.
    pub fn target_for(&self, source: &ImageReference) -> ImageReference {
        source.retarget(&self.target_host)
    }

    /// Choose the action for `source` given its computed `target`.
    ///
    /// A failed existence check is treated as "missing".
    pub async fn decide(&self, source: &ImageReference, target: &ImageReference) -> SyncAction {
        match self.oracle.exists(target).await {
            Ok(true) => return SyncAction::Skip,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    target = %target,
                    error = %e,
                    "Failed to check image in target registry, assuming missing"
                );
            }
        }

        if source.is_hosted_on(&self.target_host) {
            SyncAction::Restore
        } else {
            SyncAction::Copy
        }
    }

    /// Decide and transfer one image.
    ///
    /// Transfer errors are wrapped with the method that was attempted.
    pub async fn sync_image(&self, source: &ImageReference) -> Result<SyncOutcome> {
        let target = self.target_for(source);

        let method = match self.decide(source, &target).await {
            SyncAction::Skip => {
                tracing::debug!(image = %source, "Image already present in target registry");
                self.metrics.image_skipped(&source.registry);
                return Ok(SyncOutcome::Skipped);
            }
            SyncAction::Copy => TransferMethod::Copy,
            SyncAction::Restore => {
                tracing::info!(
                    image = %source,
                    "Image missing from its own registry, restoring from runtime"
                );
                TransferMethod::Restore
            }
        };

        let result = match method {
            TransferMethod::Copy => self.transfer.copy(source, &target).await,
            TransferMethod::Restore => self.transfer.restore(source, &target).await,
        };
        result.map_err(|e| SyncError::transfer(method, e))?;

        tracing::info!(source = %source, target = %target, method = %method, "Image synced");
        self.metrics.image_synced(&source.registry);
        Ok(SyncOutcome::Synced(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use std::sync::Mutex;

    enum Presence {
        Present,
        Missing,
        Broken,
    }

    struct FakeOracle(Presence);

    #[async_trait]
    impl ExistenceOracle for FakeOracle {
        async fn exists(&self, reference: &ImageReference) -> Result<bool> {
            match self.0 {
                Presence::Present => Ok(true),
                Presence::Missing => Ok(false),
                Presence::Broken => Err(SyncError::RegistryError {
                    registry: reference.registry.clone(),
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingTransfer {
        calls: Mutex<Vec<(TransferMethod, String, String)>>,
        fail: bool,
    }

    impl RecordingTransfer {
        fn record(&self, method: TransferMethod, src: &ImageReference, dst: &ImageReference) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((method, src.to_string(), dst.to_string()));
            if self.fail {
                Err(SyncError::RegistryError {
                    registry: dst.registry.clone(),
                    message: "unauthorized".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ImageTransfer for RecordingTransfer {
        async fn copy(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
            self.record(TransferMethod::Copy, source, target)
        }

        async fn restore(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
            self.record(TransferMethod::Restore, source, target)
        }
    }

    fn syncer(presence: Presence, transfer: Arc<RecordingTransfer>) -> ImageSyncer {
        ImageSyncer::new(
            "registry.internal",
            Arc::new(FakeOracle(presence)),
            transfer,
            Arc::new(NoopMetrics),
        )
    }

    fn reference(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_foreign_missing_image_is_copied() {
        let transfer = Arc::new(RecordingTransfer::default());
        let syncer = syncer(Presence::Missing, transfer.clone());

        let outcome = syncer
            .sync_image(&reference("docker.io/library/nginx:1.25"))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Synced(TransferMethod::Copy));
        assert_eq!(
            transfer.calls.lock().unwrap().as_slice(),
            &[(
                TransferMethod::Copy,
                "docker.io/library/nginx:1.25".to_string(),
                "registry.internal/library/nginx:1.25".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_own_missing_image_is_restored() {
        let transfer = Arc::new(RecordingTransfer::default());
        let syncer = syncer(Presence::Missing, transfer.clone());

        let outcome = syncer
            .sync_image(&reference("registry.internal/app:v2"))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Synced(TransferMethod::Restore));
        let calls = transfer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, TransferMethod::Restore);
        assert_eq!(calls[0].2, "registry.internal/app:v2");
    }

    #[tokio::test]
    async fn test_present_image_is_skipped_for_any_host() {
        for image in ["ghcr.io/org/tool:1.0", "registry.internal/app:v2"] {
            let transfer = Arc::new(RecordingTransfer::default());
            let syncer = syncer(Presence::Present, transfer.clone());

            let outcome = syncer.sync_image(&reference(image)).await.unwrap();

            assert_eq!(outcome, SyncOutcome::Skipped);
            assert!(transfer.calls.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_check_assumes_missing() {
        let transfer = Arc::new(RecordingTransfer::default());
        let syncer = syncer(Presence::Broken, transfer.clone());
        let source = reference("quay.io/org/app:3");

        assert_eq!(
            syncer.decide(&source, &syncer.target_for(&source)).await,
            SyncAction::Copy
        );
        syncer.sync_image(&source).await.unwrap();
        assert_eq!(transfer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_check_on_own_image_restores() {
        let transfer = Arc::new(RecordingTransfer::default());
        let syncer = syncer(Presence::Broken, transfer.clone());
        let source = reference("registry.internal/app:v2");

        assert_eq!(
            syncer.decide(&source, &syncer.target_for(&source)).await,
            SyncAction::Restore
        );
        let outcome = syncer.sync_image(&source).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Synced(TransferMethod::Restore));
        let calls = transfer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, TransferMethod::Restore);
    }

    #[tokio::test]
    async fn test_docker_hub_alias_target_restores() {
        let syncer = ImageSyncer::new(
            "index.docker.io",
            Arc::new(FakeOracle(Presence::Missing)),
            Arc::new(RecordingTransfer::default()),
            Arc::new(NoopMetrics),
        );
        let source = reference("nginx:1.25");

        assert_eq!(
            syncer.decide(&source, &syncer.target_for(&source)).await,
            SyncAction::Restore
        );
    }

    #[tokio::test]
    async fn test_transfer_error_is_tagged_with_method() {
        let transfer = Arc::new(RecordingTransfer {
            fail: true,
            ..Default::default()
        });
        let syncer = syncer(Presence::Missing, transfer);

        let err = syncer
            .sync_image(&reference("registry.internal/app:v2"))
            .await
            .unwrap_err();

        assert_eq!(err.failure_reason(), "restore_failed");
        assert!(err.to_string().starts_with("restore failed"));
    }
}
