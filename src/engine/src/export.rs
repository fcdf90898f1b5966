//! Exporting images from the node's container runtime.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image_syncer_core::error::{Result, SyncError};
use image_syncer_core::RuntimeKind;
use tokio::process::Command;

use crate::socket::RuntimeEndpoint;

/// Containerd namespace used by the kubelet.
pub const KUBERNETES_NAMESPACE: &str = "k8s.io";

/// Writes a locally cached image to an archive file.
#[async_trait]
pub trait RuntimeExporter: Send + Sync {
    async fn export(&self, image: &str, destination: &Path) -> Result<()>;
}

/// Exporter that shells out to `ctr` or `docker`.
#[derive(Debug, Clone)]
pub struct CommandExporter {
    endpoint: RuntimeEndpoint,
    ctr_binary: PathBuf,
    docker_binary: PathBuf,
}

impl CommandExporter {
    pub fn new(endpoint: RuntimeEndpoint) -> Self {
        Self {
            endpoint,
            ctr_binary: PathBuf::from("ctr"),
            docker_binary: PathBuf::from("docker"),
        }
    }

    /// Override the CLI binaries (defaults: `ctr`, `docker` from `PATH`).
    pub fn with_binaries(mut self, ctr: impl Into<PathBuf>, docker: impl Into<PathBuf>) -> Self {
        self.ctr_binary = ctr.into();
        self.docker_binary = docker.into();
        self
    }

    pub fn endpoint(&self) -> &RuntimeEndpoint {
        &self.endpoint
    }

    fn command(&self, image: &str, destination: &Path) -> Command {
        let mut cmd = match self.endpoint.kind {
            RuntimeKind::Containerd => {
                let mut cmd = Command::new(&self.ctr_binary);
                cmd.args(["-n", KUBERNETES_NAMESPACE, "images", "export"])
                    .arg(destination)
                    .arg(image)
                    .env("CONTAINERD_ADDRESS", &self.endpoint.socket);
                cmd
            }
            RuntimeKind::Docker => {
                let mut cmd = Command::new(&self.docker_binary);
                cmd.args(["save", "-o"])
                    .arg(destination)
                    .arg(image)
                    .env(
                        "DOCKER_HOST",
                        format!("unix://{}", self.endpoint.socket.display()),
                    );
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RuntimeExporter for CommandExporter {
    async fn export(&self, image: &str, destination: &Path) -> Result<()> {
        let runtime = self.endpoint.kind;

        tracing::info!(
            image = %image,
            runtime = %runtime,
            destination = %destination.display(),
            "Exporting image from runtime"
        );

        let output = self
            .command(image, destination)
            .output()
            .await
            .map_err(|e| SyncError::ExportError {
                runtime,
                message: format!("failed to start export command: {}", e),
                output: String::new(),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(SyncError::ExportError {
                runtime,
                message: format!("export command exited with {}", output.status),
                output: combined.trim().to_string(),
            });
        }

        Ok(())
    }
}
