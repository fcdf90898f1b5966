//! Image Syncer Engine
//!
//! Keeps a target registry populated with every image the cluster's workloads
//! run. Images from other registries are copied; images that should already
//! live in the target registry but are missing are restored from the node's
//! container runtime.

pub mod export;
pub mod inventory;
pub mod metrics;
pub mod oci;
pub mod socket;
pub mod sync;
pub mod transfer;

// Re-export common types
pub use export::{CommandExporter, RuntimeExporter};
pub use inventory::{KubernetesInventory, StaticInventory, WorkloadInventory};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use oci::{load_archive, ImageReference, LocalImage, OciRegistryClient, RegistryAuth, RegistryClient};
pub use socket::{default_socket_candidates, resolve_runtime_socket, RuntimeEndpoint, SocketCandidate};
pub use sync::{
    BoundedExecutor, CycleReport, ExistenceOracle, ImageSyncer, Reconciler, RetryPolicy,
    SyncAction, SyncOutcome,
};
pub use transfer::{ImageTransfer, TransferExecutor};
