//! Container image reference parsing.
//!
//! Parses image references like `ghcr.io/org/app:v1.0` into structured components
//! and computes where an image lands in the target registry.

use image_syncer_core::error::{Result, SyncError};

/// Registry assumed for unqualified names.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag assumed when a reference names neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// Hostnames that all mean Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Parsed container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io", "registry.internal:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse and normalize a reference as it appears in a pod spec.
    ///
    /// ```text
    /// redis:7                         docker.io/library/redis:7
    /// bitnami/kubectl                 docker.io/bitnami/kubectl:latest
    /// registry.internal/app:v2        registry.internal/app:v2
    /// quay.io/org/tool@sha256:...     quay.io/org/tool@sha256:...
    /// ```
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SyncError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }

        // Digest comes after the last '@'
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !digest_part.contains(':') {
                    return Err(SyncError::InvalidReference(format!(
                        "invalid digest in '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if tag.as_deref() == Some("") {
            return Err(SyncError::InvalidReference(format!(
                "empty tag in '{}'",
                reference
            )));
        }

        let (registry, repository) = split_registry_repository(name, reference)?;

        // Bare names get the default tag
        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Tag, falling back to `latest` for digest-only references.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Whether the registry is one of the Docker Hub aliases.
    pub fn is_docker_hub(&self) -> bool {
        DOCKER_HUB_ALIASES.contains(&self.registry.as_str())
    }

    /// Whether this image lives on `host`, treating Docker Hub aliases as equal.
    pub fn is_hosted_on(&self, host: &str) -> bool {
        let host = host.trim_end_matches('/');
        if self.registry.eq_ignore_ascii_case(host) {
            return true;
        }
        self.is_docker_hub() && DOCKER_HUB_ALIASES.contains(&host)
    }

    /// Compute the destination of this image in the `target_host` registry.
    ///
    /// The repository path after the source host is kept as is, so Docker Hub
    /// images keep their `library/` prefix. The tag is preserved and any digest
    /// is dropped.
    pub fn retarget(&self, target_host: &str) -> ImageReference {
        ImageReference {
            registry: target_host.trim_end_matches('/').to_string(),
            repository: self.repository.clone(),
            tag: Some(self.tag_or_default().to_string()),
            digest: None,
        }
    }

    /// `registry/repository[:tag][@digest]`
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `name[:tag]`, only considering a colon after the last slash.
fn split_tag(name_tag: &str) -> (&str, Option<String>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    let last_segment = &name_tag[last_segment_start..];

    match last_segment.rfind(':') {
        Some(colon_pos) => (
            &name_tag[..last_segment_start + colon_pos],
            Some(last_segment[colon_pos + 1..].to_string()),
        ),
        None => (name_tag, None),
    }
}

/// Separate the registry host from the repository path.
fn split_registry_repository(name: &str, reference: &str) -> Result<(String, String)> {
    // A first segment with a dot, a port or `localhost` is a host
    if let Some(slash_pos) = name.find('/') {
        let first = &name[..slash_pos];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repo = &name[slash_pos + 1..];
            if repo.is_empty() || repo.split('/').any(str::is_empty) {
                return Err(SyncError::InvalidReference(format!(
                    "empty repository in '{}'",
                    reference
                )));
            }
            return Ok((first.to_string(), repo.to_string()));
        }
    }

    if name.is_empty() || name.split('/').any(str::is_empty) {
        return Err(SyncError::InvalidReference(format!(
            "empty repository in '{}'",
            reference
        )));
    }

    // No registry detected, use default
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        // Official Docker Hub images live under library/
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}
