//! Collaborator traits the migration is written against.
//!
//! The concrete bindings live in [`crate::engine_client`], [`crate::ctr`],
//! [`crate::host`] and [`crate::quota`]. Tests substitute in-memory fakes.
//!
//! Implementations must be `Send + Sync` to allow use across async tasks.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use cutover_core::{ContainerDetail, ContainerSummary, EngineInfo, ImageDetail, Volume};

use crate::config::PullPolicy;
use crate::MigrateError;

/// The engine containers are migrated away from.
#[async_trait]
pub trait SourceRuntime: Send + Sync {
    /// Storage driver and root directory.
    async fn info(&self) -> Result<EngineInfo, MigrateError>;

    /// Every container, running or not.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, MigrateError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, MigrateError>;

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetail, MigrateError>;

    async fn list_volumes(&self) -> Result<Vec<Volume>, MigrateError>;

    /// Single volume; some drivers only report a size here.
    async fn inspect_volume(&self, name: &str) -> Result<Volume, MigrateError>;

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), MigrateError>;

    async fn start(&self, id: &str) -> Result<(), MigrateError>;
}

/// A mount returned for an active snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotMount {
    pub kind: String,
    pub source: String,
    pub options: Vec<String>,
}

/// What the content daemon knows about a pulled image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub name: String,
    /// Uncompressed layer digests, bottom layer first.
    pub diff_ids: Vec<String>,
}

/// The private content/snapshot daemon used to prepare target layers.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn pull(&self, reference: &str, policy: PullPolicy) -> Result<(), MigrateError>;

    async fn get_image(&self, reference: &str) -> Result<ImageInfo, MigrateError>;

    /// Create an active snapshot `key` on top of `parent` (a chain ID).
    async fn create_snapshot(&self, key: &str, parent: &str) -> Result<(), MigrateError>;

    /// Succeeds if the snapshot exists.
    async fn get_snapshot(&self, key: &str) -> Result<(), MigrateError>;

    async fn remove_snapshot(&self, key: &str) -> Result<(), MigrateError>;

    async fn mounts(&self, key: &str) -> Result<Vec<SnapshotMount>, MigrateError>;

    /// Register a container record named `id`, rooted at `rootfs`, so a
    /// running task can be adopted.
    async fn create_container(&self, id: &str, rootfs: &Path) -> Result<(), MigrateError>;

    /// Succeeds if the container record exists.
    async fn get_container(&self, id: &str) -> Result<(), MigrateError>;

    async fn delete_container(&self, id: &str) -> Result<(), MigrateError>;
}

/// The engine containers are migrated to.
#[async_trait]
pub trait TargetRuntime: Send + Sync {
    async fn start_container(&self, id: &str) -> Result<(), MigrateError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), MigrateError>;
}

/// Host operations performed through the OS.
#[async_trait]
pub trait HostOps: Send + Sync {
    /// Move every immediate child of `src` into `dst`. Returns the number moved.
    async fn move_dir_contents(&self, src: &Path, dst: &Path) -> Result<usize, MigrateError>;

    async fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), MigrateError>;

    async fn stop_service(&self, name: &str) -> Result<(), MigrateError>;

    async fn start_service(&self, name: &str) -> Result<(), MigrateError>;

    async fn remove_package(&self, name: &str) -> Result<(), MigrateError>;

    async fn install_package(&self, path: &str) -> Result<(), MigrateError>;

    async fn remove_bridge(&self, device: &str) -> Result<(), MigrateError>;

    /// Block until `socket` accepts a connection or `timeout` elapses.
    async fn wait_ready(&self, socket: &Path, timeout: Duration) -> Result<(), MigrateError>;
}

/// Filesystem project quota support.
#[async_trait]
pub trait QuotaDriver: Send + Sync {
    /// Make sure quotas can be set on the filesystem holding `dir`.
    async fn start(&self, dir: &Path) -> Result<(), MigrateError>;

    /// Bind project `id` to `dir` so new files inherit it.
    async fn set_subtree(&self, dir: &Path, id: u32) -> Result<(), MigrateError>;

    /// Set the hard block limit of project `id`.
    async fn set_limit(&self, dir: &Path, limit_kib: u64, id: u32) -> Result<(), MigrateError>;

    /// Tag one existing file or directory with project `id`.
    async fn set_file_attr(&self, path: &Path, id: u32) -> Result<(), MigrateError>;
}
