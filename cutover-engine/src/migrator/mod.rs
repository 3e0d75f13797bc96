//! Migration strategies.
//!
//! Every strategy implements the same four-phase [`Migrator`] contract and is
//! selected by its configuration tag through [`build`], so the orchestrator
//! never branches on the strategy.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{ContentStore, HostOps, QuotaDriver, SourceRuntime, TargetRuntime};
use crate::config::{MigrationKind, MigratorConfig};
use crate::handle::DaemonHandle;
use crate::job::MigrationJob;
use crate::MigrateError;

pub mod cold;
pub mod common;
pub mod live;

pub use cold::ColdMigrator;
pub use live::LiveMigrator;

/// The collaborators a strategy works through.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceRuntime>,
    pub content: Arc<dyn ContentStore>,
    pub target: Arc<dyn TargetRuntime>,
    pub host: Arc<dyn HostOps>,
    pub quota: Arc<dyn QuotaDriver>,
    /// The content daemon process, released before the source engine goes away.
    pub daemon: Arc<Mutex<DaemonHandle>>,
}

impl Collaborators {
    /// Stop the content daemon if this run started it.
    pub async fn release_daemon(&self) {
        self.daemon.lock().await.release().await;
    }
}

/// Four-phase migration contract.
///
/// Phases run in order against one [`MigrationJob`]. `revert` undoes a failed
/// `migrate` and is never called after `post_migrate` has started.
#[async_trait]
pub trait Migrator: Send + Sync {
    fn kind(&self) -> MigrationKind;

    /// Translate and prepare every source container. Nothing destructive.
    async fn pre_migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError>;

    /// Cut over: stop containers and hand their data to the target layout.
    async fn migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError>;

    /// Swap the engines and bring containers up under the target.
    async fn post_migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError>;

    /// Undo `migrate`.
    async fn revert(&self, job: &mut MigrationJob) -> Result<(), MigrateError>;
}

type Constructor = fn(MigratorConfig, Collaborators) -> Box<dyn Migrator>;

fn cold_migrator(config: MigratorConfig, deps: Collaborators) -> Box<dyn Migrator> {
    Box::new(ColdMigrator::new(config, deps))
}

fn live_migrator(config: MigratorConfig, deps: Collaborators) -> Box<dyn Migrator> {
    Box::new(LiveMigrator::new(config, deps))
}

const REGISTRY: [(MigrationKind, Constructor); 2] = [
    (MigrationKind::Cold, cold_migrator),
    (MigrationKind::Live, live_migrator),
];

/// Tags of every registered strategy.
#[must_use]
pub fn registered() -> Vec<&'static str> {
    REGISTRY.iter().map(|(kind, _)| kind.tag()).collect()
}

/// Build the strategy registered under `tag`.
///
/// # Errors
/// Returns [`MigrateError::UnknownKind`] for an unregistered tag.
pub fn build(tag: &str, config: MigratorConfig, deps: Collaborators) -> Result<Box<dyn Migrator>, MigrateError> {
    let kind: MigrationKind = tag.parse()?;
    let (_, constructor) = REGISTRY
        .iter()
        .find(|(registered, _)| *registered == kind)
        .ok_or_else(|| MigrateError::UnknownKind(tag.to_owned()))?;
    tracing::info!(strategy = %kind, "migration strategy selected");
    Ok(constructor(config, deps))
}
