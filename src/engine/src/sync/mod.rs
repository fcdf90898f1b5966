//! Sync core: per-image decision, retry, bounded fan-out and the periodic loop.

pub mod decision;
pub mod executor;
pub mod reconcile;
pub mod retry;

pub use decision::{ExistenceOracle, ImageSyncer, SyncAction, SyncOutcome};
pub use executor::{BoundedExecutor, TaskOutcome, TaskResult};
pub use reconcile::{CycleReport, Reconciler};
pub use retry::RetryPolicy;
