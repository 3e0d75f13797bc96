//! Steps shared by the migration strategies.

use std::path::{Path, PathBuf};

use cutover_core::volume::{REMOTE_DISK_DRIVER, SUPPORTED_DRIVERS};
use cutover_core::{translate, ContainerRecord, EngineInfo, VolumeRefs};

use crate::backend::{HostOps, SourceRuntime, TargetRuntime};
use crate::config::MigratorConfig;
use crate::job::MigrationJob;
use crate::sandboxes::SandboxStore;
use crate::{fsutil, volumes, MigrateError};

use super::Collaborators;

const SUPPORTED_STORAGE_DRIVERS: [&str; 2] = ["overlay", "overlay2"];
const NETWORK_DB: &str = "local-kv.db";
const META_FILE: &str = "meta.json";

/// Check that the source host can be migrated at all.
///
/// # Errors
/// Returns [`MigrateError::Precondition`] for an empty root directory, a
/// non-overlay storage driver, an unsupported volume driver, or remote-disk
/// volumes without `allow_remote_disks`.
pub async fn preflight(source: &dyn SourceRuntime, config: &MigratorConfig) -> Result<EngineInfo, MigrateError> {
    let info = source.info().await?;
    if info.root_dir.is_empty() {
        return Err(MigrateError::Precondition("source engine root dir is empty".to_owned()));
    }
    if !SUPPORTED_STORAGE_DRIVERS.contains(&info.driver.as_str()) {
        return Err(MigrateError::Precondition(format!(
            "storage driver {:?} is not supported, only overlay and overlay2 are",
            info.driver
        )));
    }

    let volumes = source.list_volumes().await?;
    if let Some(v) = volumes.iter().find(|v| !SUPPORTED_DRIVERS.contains(&v.driver.as_str())) {
        return Err(MigrateError::Precondition(format!(
            "volume {} uses unsupported driver {}",
            v.name, v.driver
        )));
    }
    let remote = volumes.iter().filter(|v| v.driver == REMOTE_DISK_DRIVER).count();
    if remote > 0 {
        if !config.allow_remote_disks {
            return Err(MigrateError::Precondition(format!(
                "{remote} remote disk volume(s) present; migrate them first or allow remote disks"
            )));
        }
        tracing::warn!(remote, "remote disk volumes will be left unregistered");
    }

    tracing::info!(driver = %info.driver, root = %info.root_dir, volumes = volumes.len(), "preflight passed");
    Ok(info)
}

/// Target home next to the source root: `/var/lib/docker` → `/var/lib/pouch`.
#[must_use]
pub fn target_home(source_root: &Path) -> PathBuf {
    match (source_root.file_name(), source_root.parent()) {
        (Some(name), Some(parent)) if name == "docker" => parent.join("pouch"),
        _ => source_root.join("pouch"),
    }
}

/// Create the target home and point the target daemon config at it.
///
/// A missing config file is left alone.
///
/// # Errors
/// Returns [`MigrateError::Io`] or [`MigrateError::Precondition`] when the
/// config file is not a JSON object.
pub async fn prepare_target_home(home: &Path, config_file: &Path) -> Result<(), MigrateError> {
    tokio::fs::create_dir_all(home).await?;

    let raw = match tokio::fs::read(config_file).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(file = %config_file.display(), "target daemon config not found, home dir not rewritten");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let mut doc: serde_json::Value = serde_json::from_slice(&raw)?;
    let Some(object) = doc.as_object_mut() else {
        return Err(MigrateError::Precondition(format!("{} is not a JSON object", config_file.display())));
    };
    object.insert("home-dir".to_owned(), serde_json::Value::String(home.to_string_lossy().into_owned()));
    tokio::fs::write(config_file, serde_json::to_vec_pretty(&doc)?).await?;
    tracing::info!(file = %config_file.display(), home = %home.display(), "target home dir configured");
    Ok(())
}

/// Inspect and translate one source container.
///
/// # Errors
/// Propagates inspect and translation failures.
pub async fn translate_container(source: &dyn SourceRuntime, id: &str) -> Result<ContainerRecord, MigrateError> {
    let detail = source.inspect(id).await?;
    Ok(translate(&detail)?)
}

/// Write `<home>/containers/<id>/meta.json`.
///
/// # Errors
/// Returns [`MigrateError::Io`] or [`MigrateError::Encode`].
pub fn persist_record(job: &MigrationJob, record: &ContainerRecord) -> Result<(), MigrateError> {
    fsutil::save_json(&job.containers_dir().join(&record.id), META_FILE, record)
}

/// Register volumes and the sandbox-shaped containers among `sandboxes`.
///
/// # Errors
/// Volume registration errors propagate; sandbox failures are only logged.
pub async fn register_auxiliary(
    deps: &Collaborators,
    job: &MigrationJob,
    refs: &VolumeRefs,
    sandboxes: &[ContainerRecord],
) -> Result<(), MigrateError> {
    let volumes = deps.source.list_volumes().await?;
    volumes::register_volumes(deps.source.as_ref(), job.target_home(), &volumes, refs).await?;
    SandboxStore::new(job.target_home())
        .register_all(sandboxes)
        .await;
    Ok(())
}

/// Copy the source network state database into the target home, replacing
/// any earlier copy.
///
/// # Errors
/// A missing source database is an error.
pub async fn migrate_network_db(host: &dyn HostOps, job: &MigrationJob) -> Result<(), MigrateError> {
    let src = job.source_root().join("network/files").join(NETWORK_DB);
    let dst = job.target_home().join("network/files").join(NETWORK_DB);
    host.copy_file(&src, &dst).await?;
    tracing::info!(src = %src.display(), dst = %dst.display(), "network state copied");
    Ok(())
}

/// Copy each file to `<file>.bk`. Absent files are skipped.
///
/// # Errors
/// Returns [`MigrateError::Io`] when a file's existence cannot be checked,
/// and the first copy failure of a file that exists.
pub async fn backup_files(host: &dyn HostOps, files: &[PathBuf]) -> Result<(), MigrateError> {
    for file in files {
        if !tokio::fs::try_exists(file).await? {
            tracing::warn!(file = %file.display(), "nothing to back up");
            continue;
        }
        let mut backup = file.clone().into_os_string();
        backup.push(".bk");
        host.copy_file(file, Path::new(&backup)).await?;
        tracing::debug!(file = %file.display(), "backed up");
    }
    Ok(())
}

/// Stop a service, retrying a fixed number of times.
///
/// # Errors
/// Returns the last failure once every attempt failed.
pub async fn stop_service(host: &dyn HostOps, name: &str, attempts: u32) -> Result<(), MigrateError> {
    let mut last = None;
    for attempt in 1..=attempts.max(1) {
        match host.stop_service(name).await {
            Ok(()) => {
                tracing::info!(service = %name, attempt, "service stopped");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(service = %name, attempt, "failed to stop service: {e}");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| MigrateError::Precondition(format!("service {name} was not stopped"))))
}

/// Force-remove containers from the target, tolerating ones it does not know.
///
/// # Errors
/// Returns the first failure other than "not found".
pub async fn remove_deleted(target: &dyn TargetRuntime, deleted: &[String]) -> Result<(), MigrateError> {
    tracing::info!(count = deleted.len(), "containers deleted during cut-over");
    for id in deleted {
        match target.remove_container(id, true).await {
            Ok(()) => tracing::info!(container = %id, "removed from target"),
            Err(e) if e.is_not_found() => tracing::debug!(container = %id, "already absent on target"),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Shared first half of post-migration: release the content daemon, find
/// containers deleted since preparation, replace the source engine with the
/// target and drop the deleted containers from it.
///
/// Returns the IDs of the deleted containers.
///
/// # Errors
/// Any failure is returned as is; nothing is reverted.
pub async fn swap_engines(
    deps: &Collaborators,
    config: &MigratorConfig,
    job: &mut MigrationJob,
) -> Result<Vec<String>, MigrateError> {
    deps.release_daemon().await;

    let listed = deps.source.list_containers().await?;
    let deleted = job.reconcile(listed.iter().map(|c| c.id.as_str()));

    backup_files(deps.host.as_ref(), &config.backup_files).await?;
    stop_service(deps.host.as_ref(), &config.source_service, config.service_stop_attempts).await?;

    if config.dry_run {
        tracing::warn!(package = %config.source_package, "dry run, source package kept");
    } else {
        tracing::info!(package = %config.source_package, "removing source package");
        deps.host.remove_package(&config.source_package).await?;
    }

    tracing::info!(package = %config.target_package, "installing target package");
    deps.host.install_package(&config.target_package).await?;
    deps.host.start_service(&config.target_service).await?;
    deps.host.wait_ready(&config.target_socket, config.readiness_timeout).await?;

    remove_deleted(deps.target.as_ref(), &deleted).await?;
    Ok(deleted)
}
