use std::path::PathBuf;

use thiserror::Error;

use crate::types::{RuntimeKind, TransferMethod};

/// Image syncer error types
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Explicitly configured runtime socket is missing
    #[error("Configured runtime socket does not exist: {}", .path.display())]
    SocketNotFound { path: PathBuf },

    /// No candidate runtime socket exists
    #[error(
        "Failed to auto-detect container runtime socket. Tried paths: [{}]. \
         Set CONTAINERD_SOCKET_PATH (or --runtime-socket) explicitly",
        join_paths(.tried)
    )]
    SocketAutoDetect { tried: Vec<PathBuf> },

    /// Workload inventory could not be listed
    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Local runtime export failed
    #[error("Failed to export image from {runtime}: {message}, output: {output}")]
    ExportError {
        runtime: RuntimeKind,
        message: String,
        output: String,
    },

    /// Exported archive could not be read
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// A transfer path failed
    #[error("{method} failed: {source}")]
    Transfer {
        method: TransferMethod,
        #[source]
        source: Box<SyncError>,
    },

    /// Operation cancelled by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Wrap an error with the transfer path that produced it.
    pub fn transfer(method: TransferMethod, source: SyncError) -> Self {
        match source {
            SyncError::Cancelled => SyncError::Cancelled,
            source => SyncError::Transfer {
                method,
                source: Box::new(source),
            },
        }
    }

    /// Whether this error is the result of cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::Transfer { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Metrics label for a failed image sync.
    pub fn failure_reason(&self) -> &'static str {
        match self {
            SyncError::Transfer { method, .. } => method.failure_reason(),
            _ => "other",
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

/// Result type alias for image syncer operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = SyncError::ConfigError("TARGET_REGISTRY_URL is required".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: TARGET_REGISTRY_URL is required"
        );
    }

    #[test]
    fn test_socket_not_found_display() {
        let error = SyncError::SocketNotFound {
            path: PathBuf::from("/run/missing.sock"),
        };
        assert_eq!(
            error.to_string(),
            "Configured runtime socket does not exist: /run/missing.sock"
        );
    }

    #[test]
    fn test_socket_auto_detect_lists_every_path() {
        let error = SyncError::SocketAutoDetect {
            tried: vec![
                PathBuf::from("/run/containerd/containerd.sock"),
                PathBuf::from("/run/docker.sock"),
            ],
        };
        let msg = error.to_string();
        assert!(msg.contains("/run/containerd/containerd.sock"));
        assert!(msg.contains("/run/docker.sock"));
        assert!(msg.contains("CONTAINERD_SOCKET_PATH"));
    }

    #[test]
    fn test_registry_error_display() {
        let error = SyncError::RegistryError {
            registry: "registry.internal".to_string(),
            message: "unauthorized".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: registry.internal - unauthorized"
        );
    }

    #[test]
    fn test_export_error_includes_output() {
        let error = SyncError::ExportError {
            runtime: RuntimeKind::Containerd,
            message: "exit status: 1".to_string(),
            output: "ctr: image not found".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("containerd"));
        assert!(msg.contains("ctr: image not found"));
    }

    #[test]
    fn test_transfer_wraps_source() {
        let error = SyncError::transfer(
            TransferMethod::Copy,
            SyncError::RegistryError {
                registry: "docker.io".to_string(),
                message: "manifest unknown".to_string(),
            },
        );
        assert_eq!(
            error.to_string(),
            "copy failed: Registry error: docker.io - manifest unknown"
        );
        assert_eq!(error.failure_reason(), "copy_failed");
    }

    #[test]
    fn test_transfer_keeps_cancellation() {
        let error = SyncError::transfer(TransferMethod::Restore, SyncError::Cancelled);
        assert!(matches!(error, SyncError::Cancelled));
        assert!(error.is_cancelled());
    }

    #[test]
    fn test_failure_reason_restore() {
        let error = SyncError::transfer(
            TransferMethod::Restore,
            SyncError::ArchiveError("no index.json".to_string()),
        );
        assert_eq!(error.failure_reason(), "restore_failed");
        assert!(!error.is_cancelled());
    }

    #[test]
    fn test_failure_reason_other() {
        let error = SyncError::InvalidReference("::".to_string());
        assert_eq!(error.failure_reason(), "other");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: SyncError = io_error.into();
        assert!(matches!(error, SyncError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: SyncError = result.unwrap_err().into();
        assert!(matches!(error, SyncError::SerializationError(_)));
    }
}
