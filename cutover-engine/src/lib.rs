//! Migration engine for moving a host's containers from one container
//! engine to another.
//!
//! Talks to the source engine over its Unix socket, drives a private content
//! daemon to create snapshots for every container, applies project quotas,
//! registers volumes and pod sandboxes with the target, and cuts over by
//! moving writable layers and swapping the engine packages.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod config;
pub mod ctr;
pub mod engine_client;
pub mod error;
pub mod exec;
pub mod fsutil;
pub mod handle;
pub mod host;
pub mod job;
pub mod migrator;
pub mod orchestrator;
pub mod pipeline;
pub mod quota;
pub mod readiness;
pub mod sandboxes;
mod unix_client;
pub mod volumes;

pub use backend::{ContentStore, HostOps, ImageInfo, QuotaDriver, SnapshotMount, SourceRuntime, TargetRuntime};
pub use config::{MigrationKind, MigratorConfig, PullPolicy};
pub use ctr::CtrClient;
pub use engine_client::EngineClient;
pub use error::MigrateError;
pub use handle::{DaemonHandle, DaemonSpec};
pub use host::SystemHost;
pub use job::{MigrationJob, Phase, UpperDirMapping};
pub use migrator::{Collaborators, Migrator};
pub use orchestrator::Orchestrator;
pub use quota::ProjectQuota;
