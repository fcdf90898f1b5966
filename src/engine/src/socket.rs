//! Runtime socket discovery.
//!
//! The syncer runs as a node agent with the host filesystem usually mounted
//! under `/host`. Candidates are probed in order; the first existing socket
//! wins.

use std::path::{Path, PathBuf};

use image_syncer_core::error::{Result, SyncError};
use image_syncer_core::RuntimeKind;

/// File name that marks a Docker engine socket.
const DOCKER_SOCKET_NAME: &str = "docker.sock";

/// A socket path to probe and the runtime expected behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketCandidate {
    pub path: PathBuf,
    pub kind: RuntimeKind,
}

impl SocketCandidate {
    pub fn new(path: impl Into<PathBuf>, kind: RuntimeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Resolved connection to the node's container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEndpoint {
    pub socket: PathBuf,
    pub kind: RuntimeKind,
}

/// Well-known runtime sockets, host-mounted layouts first.
///
/// Covers stock containerd, k0s, k3s, MicroK8s and Docker.
pub fn default_socket_candidates() -> Vec<SocketCandidate> {
    const LAYOUTS: &[(&str, RuntimeKind)] = &[
        ("run/containerd/containerd.sock", RuntimeKind::Containerd),
        ("run/k0s/containerd.sock", RuntimeKind::Containerd),
        ("run/k3s/containerd/containerd.sock", RuntimeKind::Containerd),
        (
            "var/snap/microk8s/common/run/containerd.sock",
            RuntimeKind::Containerd,
        ),
        ("run/docker.sock", RuntimeKind::Docker),
    ];

    ["/host/", "/"]
        .iter()
        .flat_map(|prefix| {
            LAYOUTS
                .iter()
                .map(move |(layout, kind)| SocketCandidate::new(format!("{prefix}{layout}"), *kind))
        })
        .collect()
}

/// Infer the runtime kind from a socket path's file name.
pub fn classify_socket(path: &Path) -> RuntimeKind {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(DOCKER_SOCKET_NAME) => RuntimeKind::Docker,
        _ => RuntimeKind::Containerd,
    }
}

/// Find the runtime socket.
///
/// An explicit override must exist; no fallback to the candidates is
/// attempted. Without an override, the first existing candidate is used.
pub fn resolve_runtime_socket(
    override_path: Option<&Path>,
    candidates: &[SocketCandidate],
) -> Result<RuntimeEndpoint> {
    if let Some(path) = override_path {
        if !path.exists() {
            return Err(SyncError::SocketNotFound {
                path: path.to_path_buf(),
            });
        }
        let endpoint = RuntimeEndpoint {
            socket: path.to_path_buf(),
            kind: classify_socket(path),
        };
        tracing::info!(
            socket = %endpoint.socket.display(),
            runtime = %endpoint.kind,
            "Using configured runtime socket"
        );
        return Ok(endpoint);
    }

    for candidate in candidates {
        if candidate.path.exists() {
            tracing::info!(
                socket = %candidate.path.display(),
                runtime = %candidate.kind,
                "Detected runtime socket"
            );
            return Ok(RuntimeEndpoint {
                socket: candidate.path.clone(),
                kind: candidate.kind,
            });
        }
        tracing::debug!(socket = %candidate.path.display(), "Runtime socket not present");
    }

    Err(SyncError::SocketAutoDetect {
        tried: candidates.iter().map(|c| c.path.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_default_candidates_order() {
        let candidates = default_socket_candidates();
        assert_eq!(candidates.len(), 10);
        assert_eq!(
            candidates[0].path,
            PathBuf::from("/host/run/containerd/containerd.sock")
        );
        assert_eq!(candidates[4].path, PathBuf::from("/host/run/docker.sock"));
        assert_eq!(candidates[4].kind, RuntimeKind::Docker);
        assert_eq!(
            candidates[5].path,
            PathBuf::from("/run/containerd/containerd.sock")
        );
        assert_eq!(candidates[9].path, PathBuf::from("/run/docker.sock"));
        assert!(candidates[..4]
            .iter()
            .all(|c| c.kind == RuntimeKind::Containerd));
    }

    #[test]
    fn test_classify_socket() {
        assert_eq!(
            classify_socket(Path::new("/var/run/docker.sock")),
            RuntimeKind::Docker
        );
        assert_eq!(
            classify_socket(Path::new("/run/k3s/containerd/containerd.sock")),
            RuntimeKind::Containerd
        );
        assert_eq!(
            classify_socket(Path::new("/run/docker.sock.bak")),
            RuntimeKind::Containerd
        );
    }

    #[test]
    fn test_override_must_exist() {
        let dir = TempDir::new().unwrap();
        let present = touch(&dir, "present.sock");
        let missing = dir.path().join("missing.sock");
        let candidates = vec![SocketCandidate::new(&present, RuntimeKind::Containerd)];

        let err = resolve_runtime_socket(Some(&missing), &candidates).unwrap_err();
        assert!(matches!(err, SyncError::SocketNotFound { ref path } if *path == missing));
    }

    #[test]
    fn test_override_classifies_docker() {
        let dir = TempDir::new().unwrap();
        let docker = touch(&dir, "docker.sock");

        let endpoint = resolve_runtime_socket(Some(&docker), &[]).unwrap();
        assert_eq!(endpoint.socket, docker);
        assert_eq!(endpoint.kind, RuntimeKind::Docker);
    }

    #[test]
    fn test_first_existing_candidate_wins() {
        let dir = TempDir::new().unwrap();
        let k3s = touch(&dir, "k3s/containerd.sock");
        let docker = touch(&dir, "docker.sock");
        let candidates = vec![
            SocketCandidate::new(dir.path().join("containerd.sock"), RuntimeKind::Containerd),
            SocketCandidate::new(&docker, RuntimeKind::Docker),
            SocketCandidate::new(&k3s, RuntimeKind::Containerd),
        ];

        let endpoint = resolve_runtime_socket(None, &candidates).unwrap();
        assert_eq!(endpoint.socket, docker);
        assert_eq!(endpoint.kind, RuntimeKind::Docker);
    }

    #[test]
    fn test_no_candidate_lists_all_paths() {
        let dir = TempDir::new().unwrap();
        let candidates = vec![
            SocketCandidate::new(dir.path().join("a.sock"), RuntimeKind::Containerd),
            SocketCandidate::new(dir.path().join("b.sock"), RuntimeKind::Docker),
        ];

        let err = resolve_runtime_socket(None, &candidates).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("a.sock"));
        assert!(message.contains("b.sock"));
        assert!(matches!(err, SyncError::SocketAutoDetect { ref tried } if tried.len() == 2));
    }
}
