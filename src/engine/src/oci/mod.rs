//! OCI image handling: references, registry access and runtime archives.
//!
//! ```text
//! source ref ──► retarget ──► target ref
//!     │                          │
//!     ├── copy ─────────────────►│   registry to registry, in memory
//!     │                          │
//!     └── runtime export ──► load_archive ──► push
//! ```

pub mod archive;
pub mod reference;
pub mod registry;

pub use archive::{load_archive, LocalImage};
pub use reference::ImageReference;
pub use registry::{OciRegistryClient, RegistryAuth, RegistryClient};
