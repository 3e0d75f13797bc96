//! Phase-guarding orchestrator around a [`Migrator`].
//!
//! Owns the [`MigrationJob`] and enforces `Init → Prepared → Migrated →
//! PostMigrated`, with `Migrated → Reverted` taken only when `migrate` itself
//! fails. A failed post-migration is never reverted.

use std::path::Path;

use crate::backend::SourceRuntime;
use crate::config::MigratorConfig;
use crate::job::{MigrationJob, Phase};
use crate::migrator::{self, common, Collaborators, Migrator};
use crate::pipeline::Preparer;
use crate::MigrateError;

/// Runs the phases of one migration in order.
pub struct Orchestrator {
    migrator: Box<dyn Migrator>,
    deps: Collaborators,
    config: MigratorConfig,
    job: MigrationJob,
}

impl Orchestrator {
    /// Validate the source host and lay out the target home.
    ///
    /// Returns a fresh job rooted at the source engine's root directory.
    ///
    /// # Errors
    /// Returns [`MigrateError::Precondition`] when the host cannot be
    /// migrated, or an I/O error while preparing the target home.
    pub async fn check_host(source: &dyn SourceRuntime, config: &MigratorConfig) -> Result<MigrationJob, MigrateError> {
        let info = common::preflight(source, config).await?;
        let source_root = Path::new(&info.root_dir);
        let home = common::target_home(source_root);
        common::prepare_target_home(&home, &config.target_config_file).await?;
        tracing::info!(source = %source_root.display(), target = %home.display(), "migration job created");
        Ok(MigrationJob::new(source_root, home))
    }

    /// Build the orchestrator for the strategy named by `config.kind`.
    ///
    /// # Errors
    /// Returns [`MigrateError::UnknownKind`] if no strategy is registered for it.
    pub fn new(config: MigratorConfig, deps: Collaborators, job: MigrationJob) -> Result<Self, MigrateError> {
        let migrator = migrator::build(config.kind.tag(), config.clone(), deps.clone())?;
        Ok(Self { migrator, deps, config, job })
    }

    #[must_use]
    pub fn job(&self) -> &MigrationJob {
        &self.job
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.job.phase()
    }

    fn expect_phase(&self, attempted: &'static str, expected: Phase) -> Result<(), MigrateError> {
        let current = self.job.phase();
        if current == expected {
            Ok(())
        } else {
            Err(MigrateError::Phase { attempted, current })
        }
    }

    /// Translate and prepare every container.
    ///
    /// # Errors
    /// Returns [`MigrateError::Phase`] unless the job is fresh, or the first
    /// preparation failure.
    pub async fn prepare(&mut self) -> Result<(), MigrateError> {
        self.expect_phase("pre-migrate", Phase::Init)?;
        tracing::info!(strategy = %self.migrator.kind(), "pre-migrate started");
        self.migrator.pre_migrate(&mut self.job).await?;
        self.job.set_phase(Phase::Prepared);
        tracing::info!(
            containers = self.job.container_count(),
            running = self.job.running().len(),
            mappings = self.job.mappings().len(),
            "pre-migrate finished"
        );
        Ok(())
    }

    /// Cut over. On failure the cut-over is reverted and the original error returned.
    ///
    /// # Errors
    /// Returns [`MigrateError::Phase`] unless the job is prepared, or the
    /// cut-over failure.
    pub async fn migrate(&mut self) -> Result<(), MigrateError> {
        self.expect_phase("migrate", Phase::Prepared)?;
        tracing::info!("migrate started");
        match self.migrator.migrate(&mut self.job).await {
            Ok(()) => {
                self.job.set_phase(Phase::Migrated);
                tracing::info!("migrate finished");
                Ok(())
            }
            Err(e) => {
                tracing::error!("migrate failed, reverting: {e}");
                if let Err(revert) = self.migrator.revert(&mut self.job).await {
                    tracing::error!("revert incomplete, manual intervention required: {revert}");
                }
                self.job.set_phase(Phase::Reverted);
                Err(e)
            }
        }
    }

    /// Swap the engines and start containers under the target.
    ///
    /// # Errors
    /// Returns [`MigrateError::Phase`] unless the cut-over completed, or the
    /// first post-migration failure. Nothing is reverted.
    pub async fn post_migrate(&mut self) -> Result<(), MigrateError> {
        self.expect_phase("post-migrate", Phase::Migrated)?;
        tracing::info!("post-migrate started");
        self.migrator.post_migrate(&mut self.job).await?;
        self.job.set_phase(Phase::PostMigrated);
        tracing::info!("post-migrate finished");
        Ok(())
    }

    /// Run every phase in order.
    ///
    /// # Errors
    /// Returns the first phase failure.
    pub async fn run(&mut self) -> Result<(), MigrateError> {
        self.prepare().await?;
        self.migrate().await?;
        self.post_migrate().await
    }

    /// Pull every container image into the content daemon without migrating.
    ///
    /// # Errors
    /// Fails only if the source containers cannot be listed.
    pub async fn pull_images(&self) -> Result<usize, MigrateError> {
        let preparer = Preparer::new(self.deps.content.as_ref(), self.deps.quota.as_ref(), &self.config);
        preparer.prepare_images(self.deps.source.as_ref()).await
    }

    /// Stop the content daemon if this run started it. Safe to call more than once.
    pub async fn cleanup(&self) {
        self.deps.release_daemon().await;
    }
}
