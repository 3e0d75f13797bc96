//! Filesystem helpers: layer moves, marker files and record persistence.

use std::io::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::exec;
use crate::MigrateError;

/// Breadcrumb written into a source layer right before it is moved.
pub const MARKER_FILE: &str = "cutover-migrated.txt";

fn move_err(src: &Path, dst: &Path, reason: impl Into<String>) -> MigrateError {
    MigrateError::Move {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        reason: reason.into(),
    }
}

/// Move every immediate child of `src` (dotfiles included) into `dst`.
///
/// The directory `src` itself stays in place. An absent or empty `src` moves
/// nothing. Children are renamed; a child on another filesystem is handed to
/// `mv`.
///
/// # Errors
/// Returns [`MigrateError::Move`] if either path is empty, `dst` is not an
/// existing directory, or a child cannot be moved.
pub async fn move_dir_contents(src: &Path, dst: &Path) -> Result<usize, MigrateError> {
    if src.as_os_str().is_empty() || dst.as_os_str().is_empty() {
        return Err(move_err(src, dst, "source and destination must be set"));
    }
    if !tokio::fs::metadata(dst).await.is_ok_and(|m| m.is_dir()) {
        return Err(move_err(src, dst, "destination is not a directory"));
    }

    let mut entries = match tokio::fs::read_dir(src).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(src = %src.display(), "nothing to move, source is absent");
            return Ok(0);
        }
        Err(e) => return Err(move_err(src, dst, e.to_string())),
    };

    let mut moved = 0usize;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| move_err(src, dst, e.to_string()))?
    {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                exec::run("mv", [from.as_os_str(), dst.as_os_str()]).await?;
            }
            Err(e) => {
                return Err(move_err(&from, &to, e.to_string()));
            }
        }
        moved += 1;
    }

    tracing::debug!(src = %src.display(), dst = %dst.display(), moved, "moved directory contents");
    Ok(moved)
}

/// Drop the migration marker into `dir`.
///
/// # Errors
/// Returns [`MigrateError::Io`] if the file cannot be created.
pub async fn write_marker(dir: &Path) -> Result<(), MigrateError> {
    let body = format!("migrated at {}\n", chrono::Utc::now().to_rfc3339());
    tokio::fs::write(dir.join(MARKER_FILE), body).await?;
    Ok(())
}

/// Remove the migration marker from `dir`. An absent marker is not an error.
///
/// # Errors
/// Returns [`MigrateError::Io`] if the marker exists but cannot be removed.
pub async fn remove_marker(dir: &Path) -> Result<(), MigrateError> {
    match tokio::fs::remove_file(dir.join(MARKER_FILE)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Serialize `value` to `<dir>/<file>`, truncating and syncing it to disk.
///
/// # Errors
/// Returns [`MigrateError::Encode`] or [`MigrateError::Io`].
pub fn save_json<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<(), MigrateError> {
    std::fs::create_dir_all(dir)?;
    let bytes = serde_json::to_vec(value)?;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dir.join(file))?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    Ok(())
}

/// Copy `src` to `dst`, creating the parent of `dst` and replacing an existing file.
///
/// # Errors
/// Returns [`MigrateError::Io`] on any failure.
pub async fn copy_file(src: &Path, dst: &Path) -> Result<(), MigrateError> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(src, dst).await?;
    Ok(())
}
