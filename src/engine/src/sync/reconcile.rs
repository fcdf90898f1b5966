//! The periodic reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use image_syncer_core::config::DEFAULT_SYNC_PERIOD;
use image_syncer_core::error::{Result, SyncError};
use image_syncer_core::{SyncConfig, TransferMethod};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::decision::{ImageSyncer, SyncOutcome};
use super::executor::{BoundedExecutor, TaskOutcome, TaskResult};
use super::retry::RetryPolicy;
use crate::inventory::WorkloadInventory;
use crate::metrics::MetricsSink;
use crate::oci::ImageReference;

/// Counts for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub copied: usize,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl CycleReport {
    pub fn synced(&self) -> usize {
        self.copied + self.restored
    }

    fn record(&mut self, result: &TaskResult<Result<SyncOutcome>>) {
        match &result.outcome {
            TaskOutcome::Completed(Ok(SyncOutcome::Skipped)) => self.skipped += 1,
            TaskOutcome::Completed(Ok(SyncOutcome::Synced(TransferMethod::Copy))) => {
                self.copied += 1
            }
            TaskOutcome::Completed(Ok(SyncOutcome::Synced(TransferMethod::Restore))) => {
                self.restored += 1
            }
            TaskOutcome::Completed(Err(e)) if e.is_cancelled() => self.abandoned += 1,
            TaskOutcome::Completed(Err(_)) => self.failed += 1,
            TaskOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Discovers images each period and syncs them into the target registry.
pub struct Reconciler {
    inventory: Arc<dyn WorkloadInventory>,
    syncer: Arc<ImageSyncer>,
    metrics: Arc<dyn MetricsSink>,
    namespaces: Vec<String>,
    deployments: Vec<String>,
    period: Duration,
    retry: RetryPolicy,
    executor: BoundedExecutor,
}

impl Reconciler {
    pub fn new(
        inventory: Arc<dyn WorkloadInventory>,
        syncer: Arc<ImageSyncer>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inventory,
            syncer,
            metrics,
            namespaces: Vec::new(),
            deployments: Vec::new(),
            period: DEFAULT_SYNC_PERIOD,
            retry: RetryPolicy::default(),
            executor: BoundedExecutor::default(),
        }
    }

    /// Take scope, period, retry and concurrency settings from `config`.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.namespaces = config.namespaces.clone();
        self.deployments = config.deployments.clone();
        self.period = config.sync_period;
        self.retry = RetryPolicy::new(config.max_retries, config.retry_delay);
        self.executor = BoundedExecutor::new(config.concurrency);
        self
    }

    pub fn with_scope(mut self, namespaces: Vec<String>, deployments: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self.deployments = deployments;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.executor = BoundedExecutor::new(concurrency);
        self
    }

    /// Run cycles until `cancel` fires.
    ///
    /// The first cycle starts immediately. Cycle failures are logged and the
    /// loop keeps going. Always ends with [`SyncError::Cancelled`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            period = ?self.period,
            concurrency = self.executor.concurrency(),
            target = %self.syncer.target_host(),
            "Starting reconciliation loop"
        );

        self.run_logged(&cancel).await;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciliation loop stopped");
                    return Err(SyncError::Cancelled);
                }
                _ = ticker.tick() => self.run_logged(&cancel).await,
            }
        }
    }

    async fn run_logged(&self, cancel: &CancellationToken) {
        match self.run_cycle(cancel).await {
            Ok(report) => tracing::info!(
                discovered = report.discovered,
                copied = report.copied,
                restored = report.restored,
                skipped = report.skipped,
                failed = report.failed,
                abandoned = report.abandoned,
                "Sync cycle completed"
            ),
            Err(e) if e.is_cancelled() => tracing::debug!("Sync cycle cancelled"),
            Err(e) => tracing::error!(error = %e, "Sync cycle failed"),
        }
    }

    /// Run a single discovery and sync pass.
    ///
    /// The cycle duration is recorded however the pass ends.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let start = Instant::now();
        let result = self.sync_discovered(cancel).await;
        self.metrics.cycle_completed(start.elapsed());
        result
    }

    async fn sync_discovered(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let mut images = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            images = self.inventory.list_images(&self.namespaces, &self.deployments) => images?,
        };
        images.sort();
        images.dedup();

        report.discovered = images.len();
        self.metrics.images_discovered(images.len());

        if images.is_empty() {
            tracing::warn!(namespaces = ?self.namespaces, "No images found to sync");
            return Ok(report);
        }

        tracing::info!(count = images.len(), "Syncing images");

        let syncer = self.syncer.clone();
        let metrics = self.metrics.clone();
        let retry = self.retry;
        let task_cancel = cancel.clone();

        let results = self
            .executor
            .run(images, cancel, move |image| {
                let syncer = syncer.clone();
                let metrics = metrics.clone();
                let cancel = task_cancel.clone();
                async move { sync_with_retry(&syncer, metrics.as_ref(), retry, &cancel, &image).await }
            })
            .await;

        for result in &results {
            report.record(result);
        }

        Ok(report)
    }
}

/// Parse, then run the decision pipeline under the retry policy.
async fn sync_with_retry(
    syncer: &ImageSyncer,
    metrics: &dyn MetricsSink,
    retry: RetryPolicy,
    cancel: &CancellationToken,
    image: &str,
) -> Result<SyncOutcome> {
    let source = match ImageReference::parse(image) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(image = %image, error = %e, "Skipping unparseable image reference");
            metrics.image_failed("unknown", e.failure_reason());
            return Err(e);
        }
    };

    let result = retry
        .run(cancel, image, |_attempt| syncer.sync_image(&source))
        .await;

    if let Err(e) = &result {
        if !e.is_cancelled() {
            tracing::error!(
                image = %image,
                attempts = retry.max_attempts(),
                error = %e,
                "Failed to sync image"
            );
            metrics.image_failed(&source.registry, e.failure_reason());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crate::sync::decision::ExistenceOracle;
    use crate::transfer::ImageTransfer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Missing;

    #[async_trait]
    impl ExistenceOracle for Missing {
        async fn exists(&self, _reference: &ImageReference) -> Result<bool> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct CountingTransfer {
        copies: AtomicUsize,
        fail_for: Option<&'static str>,
    }

    #[async_trait]
    impl ImageTransfer for CountingTransfer {
        async fn copy(&self, source: &ImageReference, _target: &ImageReference) -> Result<()> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            match self.fail_for {
                Some(repo) if source.repository == repo => {
                    Err(SyncError::Other("blob upload failed".to_string()))
                }
                _ => Ok(()),
            }
        }

        async fn restore(&self, _source: &ImageReference, _target: &ImageReference) -> Result<()> {
            Ok(())
        }
    }

    /// Inventory that fails on demand and counts calls.
    #[derive(Default)]
    struct ScriptedInventory {
        images: Vec<String>,
        fail: bool,
        calls: AtomicUsize,
        scopes: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl WorkloadInventory for ScriptedInventory {
        async fn list_images(
            &self,
            namespaces: &[String],
            _deployments: &[String],
        ) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.scopes.lock().unwrap().push(namespaces.to_vec());
            if self.fail {
                return Err(SyncError::DiscoveryError("apiserver unavailable".to_string()));
            }
            Ok(self.images.clone())
        }
    }

    /// Inventory whose listing never finishes.
    struct StalledInventory;

    #[async_trait]
    impl WorkloadInventory for StalledInventory {
        async fn list_images(
            &self,
            _namespaces: &[String],
            _deployments: &[String],
        ) -> Result<Vec<String>> {
            std::future::pending::<Result<Vec<String>>>().await
        }
    }

    #[derive(Default)]
    struct CycleCounter {
        cycles: AtomicUsize,
    }

    impl MetricsSink for CycleCounter {
        fn image_synced(&self, _source_registry: &str) {}
        fn image_skipped(&self, _source_registry: &str) {}
        fn image_failed(&self, _source_registry: &str, _reason: &str) {}
        fn images_discovered(&self, _count: usize) {}
        fn cycle_completed(&self, _duration: Duration) {
            self.cycles.fetch_add(1, Ordering::SeqCst);
        }
        fn operation_duration(&self, _operation: &str, _duration: Duration) {}
    }

    fn syncer(transfer: Arc<CountingTransfer>) -> Arc<ImageSyncer> {
        Arc::new(ImageSyncer::new(
            "registry.internal",
            Arc::new(Missing),
            transfer,
            Arc::new(NoopMetrics),
        ))
    }

    fn reconciler(inventory: Arc<ScriptedInventory>, transfer: Arc<CountingTransfer>) -> Reconciler {
        Reconciler::new(inventory, syncer(transfer), Arc::new(NoopMetrics))
            .with_scope(vec!["default".to_string()], Vec::new())
            .with_retry(RetryPolicy::new(1, Duration::from_secs(10)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_reports_per_image_outcomes() {
        let inventory = Arc::new(ScriptedInventory {
            images: vec![
                "nginx:1.25".to_string(),
                "redis:7".to_string(),
                "nginx:1.25".to_string(),
                "registry.internal/app:v2".to_string(),
            ],
            ..Default::default()
        });
        let transfer = Arc::new(CountingTransfer {
            fail_for: Some("library/redis"),
            ..Default::default()
        });

        let report = reconciler(inventory.clone(), transfer.clone())
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            report,
            CycleReport {
                discovered: 3,
                copied: 1,
                restored: 1,
                failed: 1,
                ..Default::default()
            }
        );
        // nginx once, redis twice (one retry).
        assert_eq!(transfer.copies.load(Ordering::SeqCst), 3);
        assert_eq!(
            inventory.scopes.lock().unwrap().as_slice(),
            &[vec!["default".to_string()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cycle_does_nothing() {
        let inventory = Arc::new(ScriptedInventory::default());
        let transfer = Arc::new(CountingTransfer::default());

        let report = reconciler(inventory, transfer.clone())
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report, CycleReport::default());
        assert_eq!(transfer.copies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_reference_fails_without_retry() {
        let inventory = Arc::new(ScriptedInventory {
            images: vec!["registry.internal/app:".to_string()],
            ..Default::default()
        });
        let transfer = Arc::new(CountingTransfer::default());

        let report = reconciler(inventory, transfer.clone())
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(transfer.copies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_discovery_failure_and_stops_on_cancel() {
        let inventory = Arc::new(ScriptedInventory {
            fail: true,
            ..Default::default()
        });
        let reconciler = reconciler(inventory.clone(), Arc::new(CountingTransfer::default()))
            .with_period(Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            canceller.cancel();
        });

        let err = reconciler.run(cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        // Immediate cycle plus ticks at 60s and 120s.
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_stalled_discovery() {
        let reconciler = Reconciler::new(
            Arc::new(StalledInventory),
            syncer(Arc::new(CountingTransfer::default())),
            Arc::new(NoopMetrics),
        );
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(3), reconciler.run(cancel))
            .await
            .expect("loop did not stop while discovery was stalled");

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_duration_recorded_on_every_exit() {
        let metrics = Arc::new(CycleCounter::default());
        let transfer = Arc::new(CountingTransfer::default());

        let empty = Reconciler::new(
            Arc::new(ScriptedInventory::default()),
            syncer(transfer.clone()),
            metrics.clone(),
        );
        empty.run_cycle(&CancellationToken::new()).await.unwrap();

        let failing = Reconciler::new(
            Arc::new(ScriptedInventory {
                fail: true,
                ..Default::default()
            }),
            syncer(transfer.clone()),
            metrics.clone(),
        );
        assert!(failing.run_cycle(&CancellationToken::new()).await.is_err());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stalled = Reconciler::new(Arc::new(StalledInventory), syncer(transfer), metrics.clone());
        assert!(stalled.run_cycle(&cancel).await.unwrap_err().is_cancelled());

        assert_eq!(metrics.cycles.load(Ordering::SeqCst), 3);
    }
}
