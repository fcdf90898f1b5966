//! Image Syncer Core - Foundational Types
//!
//! Error taxonomy, configuration model and value types shared by the
//! sync engine and the process entry point.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use types::{RuntimeKind, TransferMethod};

/// Image syncer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
