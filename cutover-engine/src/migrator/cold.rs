//! Cold migration: stop everything, move the writable layers, start again
//! under the target engine.

use async_trait::async_trait;

use cutover_core::{ContainerStatus, VolumeRefs};

use crate::config::{MigrationKind, MigratorConfig};
use crate::job::MigrationJob;
use crate::pipeline::Preparer;
use crate::sandboxes::is_sandbox;
use crate::{fsutil, MigrateError};

use super::{common, Collaborators, Migrator};

/// Runtime state directory of a target task; the container's rootfs lives below it.
const TASK_STATE_DIR: &str = "containerd/state/io.containerd.runtime.v1.linux/default";

pub struct ColdMigrator {
    config: MigratorConfig,
    deps: Collaborators,
}

impl ColdMigrator {
    #[must_use]
    pub fn new(config: MigratorConfig, deps: Collaborators) -> Self {
        Self { config, deps }
    }
}

#[async_trait]
impl Migrator for ColdMigrator {
    fn kind(&self) -> MigrationKind {
        MigrationKind::Cold
    }

    async fn pre_migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError> {
        let containers = self.deps.source.list_containers().await?;
        if containers.is_empty() {
            tracing::info!("no containers on host, nothing to convert");
            return Ok(());
        }
        tracing::debug!(count = containers.len(), "listed source containers");

        let preparer = Preparer::new(self.deps.content.as_ref(), self.deps.quota.as_ref(), &self.config);
        let mut refs = VolumeRefs::new();
        let mut sandboxes = Vec::new();

        for summary in &containers {
            let mut record = common::translate_container(self.deps.source.as_ref(), &summary.id).await?;
            let running = record.state.as_ref().is_some_and(|s| s.status == ContainerStatus::Running);
            job.record_container(&record.id, running);
            refs.count(&record);

            tracing::info!(container = %record.id, name = %record.name, running, "preparing container");
            preparer.prepare(job, &mut record).await?;

            record.base_fs = job
                .target_home()
                .join(TASK_STATE_DIR)
                .join(&record.id)
                .join("rootfs")
                .to_string_lossy()
                .into_owned();
            record.rootfs_provided = false;

            common::persist_record(job, &record)?;
            tracing::info!(container = %record.id, "container prepared");
            if is_sandbox(&record) {
                sandboxes.push(record);
            }
        }

        common::register_auxiliary(&self.deps, job, &refs, &sandboxes).await
    }

    async fn migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError> {
        for id in job.running() {
            tracing::info!(container = %id, "stopping container");
            match self.deps.source.stop(id, self.config.stop_timeout).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => tracing::warn!(container = %id, "container already gone"),
                Err(e) => return Err(e),
            }
        }

        common::migrate_network_db(self.deps.host.as_ref(), job).await?;

        for mapping in job.mappings() {
            if let Err(e) = fsutil::write_marker(&mapping.source_dir).await {
                tracing::warn!(dir = %mapping.source_dir.display(), "failed to write migration marker: {e}");
            }
            let moved = self
                .deps
                .host
                .move_dir_contents(&mapping.source_dir, &mapping.target_dir)
                .await?;
            tracing::info!(container = %mapping.container_id, moved, "writable layer moved");
        }
        Ok(())
    }

    async fn post_migrate(&self, job: &mut MigrationJob) -> Result<(), MigrateError> {
        let deleted = common::swap_engines(&self.deps, &self.config, job).await?;

        if let Err(e) = self.deps.host.remove_bridge(&self.config.bridge_device).await {
            tracing::error!(device = %self.config.bridge_device, "failed to remove bridge: {e}");
        }

        for id in job.running().iter().filter(|id| !deleted.contains(id)) {
            tracing::info!(container = %id, "starting container on target");
            self.deps.target.start_container(id).await?;
        }
        Ok(())
    }

    async fn revert(&self, job: &mut MigrationJob) -> Result<(), MigrateError> {
        let mut first_error = None;
        for mapping in job.mappings() {
            if mapping.source_dir.as_os_str().is_empty() || mapping.target_dir.as_os_str().is_empty() {
                tracing::warn!(container = %mapping.container_id, "incomplete mapping was never moved, skipped");
                continue;
            }
            match self
                .deps
                .host
                .move_dir_contents(&mapping.target_dir, &mapping.source_dir)
                .await
            {
                Ok(moved) => tracing::info!(container = %mapping.container_id, moved, "writable layer moved back"),
                Err(e) => {
                    tracing::error!(container = %mapping.container_id, "failed to move writable layer back: {e}");
                    first_error.get_or_insert(e);
                }
            }
            if let Err(e) = fsutil::remove_marker(&mapping.source_dir).await {
                tracing::error!(dir = %mapping.source_dir.display(), "failed to remove migration marker: {e}");
                first_error.get_or_insert(e);
            }
        }

        for id in job.running() {
            tracing::info!(container = %id, "restarting source container");
            if let Err(e) = self.deps.source.start(id).await {
                tracing::error!(container = %id, "failed to restart container: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
