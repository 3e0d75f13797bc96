//! Live migration: running containers keep running and are adopted by the
//! target engine through their existing root filesystems.

use std::path::Path;

use async_trait::async_trait;

use cutover_core::{ContainerStatus, VolumeRefs};

use crate::config::{MigrationKind, MigratorConfig};
use crate::job::MigrationJob;
use crate::sandboxes::is_sandbox;
use crate::MigrateError;

use super::{common, Collaborators, Migrator};

pub struct LiveMigrator {
    config: MigratorConfig,
    deps: Collaborators,
}

impl LiveMigrator {
    #[must_use]
    pub fn new(config: MigratorConfig, deps: Collaborators) -> Self {
        Self { config, deps }
    }

    /// Create the content daemon's container record, replacing a stale one.
    async fn adopt(&self, id: &str, rootfs: &Path) -> Result<(), MigrateError> {
        match self.deps.content.get_container(id).await {
            Ok(()) => {
                tracing::debug!(container = %id, "replacing existing content record");
                self.deps.content.delete_container(id).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.deps.content.create_container(id, rootfs).await
    }
}

#[async_trait]
impl Migrator for LiveMigrator {
    fn kind(&self) -> MigrationKind {
        MigrationKind::Live
    }

    async fn pre_migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError> {
        let containers = self.deps.source.list_containers().await?;
        if containers.is_empty() {
            tracing::info!("no containers on host, nothing to convert");
            return Ok(());
        }

        let mut refs = VolumeRefs::new();
        let mut sandboxes = Vec::new();
        for summary in &containers {
            let record = common::translate_container(self.deps.source.as_ref(), &summary.id).await?;
            let running = record.state.as_ref().is_some_and(|s| s.status == ContainerStatus::Running);
            job.record_container(&record.id, running);
            refs.count(&record);

            if running {
                self.adopt(&record.id, Path::new(&record.base_fs)).await?;
                tracing::info!(container = %record.id, rootfs = %record.base_fs, "running container adopted");
            }
            common::persist_record(job, &record)?;
            if is_sandbox(&record) {
                sandboxes.push(record);
            }
        }
        tracing::info!(containers = job.container_count(), "live preparation finished");

        common::register_auxiliary(&self.deps, job, &refs, &sandboxes).await
    }

    async fn migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError> {
        common::migrate_network_db(self.deps.host.as_ref(), job).await
    }

    async fn post_migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError> {
        let deleted = common::swap_engines(&self.deps, &self.config, job).await?;
        tracing::info!(adopted = job.running().len(), deleted = deleted.len(), "containers left running");
        Ok(())
    }

    async fn revert(&self, _job: &mut MigrationJob) -> Result<(), MigrateError> {
        tracing::info!("live migration leaves source containers untouched, nothing to revert");
        Ok(())
    }
}
