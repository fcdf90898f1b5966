//! Discovering the images that running workloads use.

use std::collections::BTreeSet;

use async_trait::async_trait;
use image_syncer_core::error::{Result, SyncError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PodSpec;
use kube::api::ListParams;
use kube::{Api, Client};

/// Source of image references to keep in sync.
#[async_trait]
pub trait WorkloadInventory: Send + Sync {
    /// Deduplicated, sorted image references used by workloads in
    /// `namespaces`, optionally restricted to the named `deployments`.
    ///
    /// Nothing found is `Ok` with an empty list.
    async fn list_images(&self, namespaces: &[String], deployments: &[String])
        -> Result<Vec<String>>;
}

/// Reads Deployments from the Kubernetes API.
#[derive(Clone)]
pub struct KubernetesInventory {
    client: Client,
}

impl KubernetesInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            SyncError::DiscoveryError(format!("Failed to create Kubernetes client: {}", e))
        })?;
        Ok(Self::new(client))
    }

    async fn namespace_deployments(
        &self,
        namespace: &str,
        names: &[String],
    ) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);

        if names.is_empty() {
            let list = api.list(&ListParams::default()).await.map_err(|e| {
                SyncError::DiscoveryError(format!(
                    "Failed to list deployments in namespace {}: {}",
                    namespace, e
                ))
            })?;
            return Ok(list.items);
        }

        let mut found = Vec::with_capacity(names.len());
        for name in names {
            match api.get(name).await {
                Ok(deployment) => found.push(deployment),
                Err(e) => tracing::warn!(
                    namespace = %namespace,
                    deployment = %name,
                    error = %e,
                    "Failed to get deployment"
                ),
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl WorkloadInventory for KubernetesInventory {
    async fn list_images(
        &self,
        namespaces: &[String],
        deployments: &[String],
    ) -> Result<Vec<String>> {
        let mut images = BTreeSet::new();

        for namespace in namespaces {
            match self.namespace_deployments(namespace, deployments).await {
                Ok(found) => {
                    for deployment in &found {
                        images.extend(deployment_images(deployment));
                    }
                }
                Err(e) => {
                    tracing::warn!(namespace = %namespace, error = %e, "Skipping namespace");
                }
            }
        }

        tracing::debug!(count = images.len(), "Collected workload images");
        Ok(images.into_iter().collect())
    }
}

/// Images of a Deployment's pod template, init containers included.
pub fn deployment_images(deployment: &Deployment) -> Vec<String> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .map(pod_images)
        .unwrap_or_default()
}

fn pod_images(pod: &PodSpec) -> Vec<String> {
    pod.init_containers
        .iter()
        .flatten()
        .chain(pod.containers.iter())
        .filter_map(|c| c.image.as_deref())
        .map(str::trim)
        .filter(|image| !image.is_empty())
        .map(String::from)
        .collect()
}

/// Fixed image list, for one-off runs without a cluster.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    images: Vec<String>,
}

impl StaticInventory {
    pub fn new(images: impl IntoIterator<Item = String>) -> Self {
        let unique: BTreeSet<String> = images
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        Self {
            images: unique.into_iter().collect(),
        }
    }
}

#[async_trait]
impl WorkloadInventory for StaticInventory {
    async fn list_images(
        &self,
        _namespaces: &[String],
        _deployments: &[String],
    ) -> Result<Vec<String>> {
        Ok(self.images.clone())
    }
}
