//! Wires the concrete collaborators together and runs one mode.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use cutover_engine::{
    Collaborators, CtrClient, DaemonHandle, DaemonSpec, EngineClient, MigrationKind, MigratorConfig, Orchestrator,
    ProjectQuota, SystemHost,
};

use crate::error::CliError;

/// What the run accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    ImagesPulled(usize),
    Prepared,
    Migrated,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImagesPulled(n) => write!(f, "{n} image(s) pulled"),
            Self::Prepared => f.write_str(
                "data prepared: images pulled, snapshots created, quotas set, container metadata converted",
            ),
            Self::Migrated => f.write_str("done"),
        }
    }
}

/// Which part of the migration to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PullImages,
    PrepareOnly,
    MigrateAll,
}

impl Mode {
    #[must_use]
    pub fn select(pull_images: bool, migrate_all: bool) -> Self {
        match (pull_images, migrate_all) {
            (true, _) => Self::PullImages,
            (false, false) => Self::PrepareOnly,
            (false, true) => Self::MigrateAll,
        }
    }
}

/// The content daemon this run talks to: a private one for cold migration,
/// the source engine's own for live migration.
async fn content_daemon(config: &MigratorConfig, home: &Path) -> Result<DaemonHandle, CliError> {
    match config.kind {
        MigrationKind::Cold => {
            let spec = DaemonSpec::under_home(
                &config.content_daemon_bin,
                &config.content_socket,
                home,
                config.debug,
            );
            Ok(DaemonHandle::spawn(&spec).await?)
        }
        MigrationKind::Live => Ok(DaemonHandle::detached(config.host_content_socket.clone())),
    }
}

/// Run `mode` with `config` against this host.
///
/// # Errors
/// Returns [`CliError::Migrate`] when the run stopped before the engine
/// swap (a failed cut-over has been reverted by then), and
/// [`CliError::ManualIntervention`] when post-migration failed.
pub async fn run(config: MigratorConfig, mode: Mode) -> Result<Outcome, CliError> {
    let source = Arc::new(EngineClient::new(config.source_socket.clone()));
    let job = Orchestrator::check_host(source.as_ref(), &config).await?;

    let daemon = Arc::new(Mutex::new(content_daemon(&config, job.target_home()).await?));
    let content = match CtrClient::connect(
        &config.content_cli_bin,
        config.active_content_socket(),
        config.image_proxy.clone(),
    )
    .await
    {
        Ok(content) => content,
        Err(e) => {
            daemon.lock().await.release().await;
            return Err(e.into());
        }
    };

    let deps = Collaborators {
        source,
        content: Arc::new(content),
        target: Arc::new(EngineClient::new(config.target_socket.clone())),
        host: Arc::new(SystemHost),
        quota: Arc::new(ProjectQuota::default()),
        daemon,
    };
    let result = match Orchestrator::new(config, deps.clone(), job) {
        Ok(mut orchestrator) => drive(&mut orchestrator, mode).await,
        Err(e) => Err(e.into()),
    };
    deps.release_daemon().await;
    result
}

async fn drive(orchestrator: &mut Orchestrator, mode: Mode) -> Result<Outcome, CliError> {
    match mode {
        Mode::PullImages => Ok(Outcome::ImagesPulled(orchestrator.pull_images().await?)),
        Mode::PrepareOnly => {
            orchestrator.prepare().await?;
            Ok(Outcome::Prepared)
        }
        Mode::MigrateAll => {
            orchestrator.prepare().await?;
            orchestrator.migrate().await?;
            orchestrator.post_migrate().await.map_err(CliError::ManualIntervention)?;
            Ok(Outcome::Migrated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_images_wins_over_migrate_all() {
        assert_eq!(Mode::select(true, true), Mode::PullImages);
        assert_eq!(Mode::select(false, false), Mode::PrepareOnly);
        assert_eq!(Mode::select(false, true), Mode::MigrateAll);
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(Outcome::Migrated.to_string(), "done");
        assert_eq!(Outcome::ImagesPulled(3).to_string(), "3 image(s) pulled");
    }
}
