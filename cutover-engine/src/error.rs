//! Error types for the engine crate.

use std::path::PathBuf;

use cutover_core::CoreError;

use crate::job::Phase;

/// Errors that can occur while preparing, cutting over or reverting a migration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MigrateError {
    /// The host cannot be migrated as it is.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An engine API request failed. `status` is the HTTP status when one was received.
    #[error("API request {request} failed: {message}")]
    Api {
        request: String,
        status: Option<u16>,
        message: String,
    },

    /// An external command exited unsuccessfully or could not be started.
    #[error("command `{command}` failed ({status}): {output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    /// The content daemon reported something the migration cannot use.
    #[error("content daemon: {0}")]
    Content(String),

    /// Snapshot preparation failed.
    #[error("snapshot {id}: {reason}")]
    Snapshot { id: String, reason: String },

    /// Quota setup failed for a directory.
    #[error("quota on {dir}: {reason}")]
    Quota { dir: PathBuf, reason: String },

    /// Moving a writable layer failed.
    #[error("move {src} -> {dst}: {reason}")]
    Move {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },

    /// A phase was invoked out of order.
    #[error("phase {attempted} is not allowed after {current}")]
    Phase { attempted: &'static str, current: Phase },

    /// The target daemon socket did not accept connections in time.
    #[error("timed out after {secs}s waiting for {socket}")]
    DaemonTimeout { socket: PathBuf, secs: u64 },

    /// No migrator is registered under the given tag.
    #[error("unknown migration type {0:?}")]
    UnknownKind(String),

    /// Translation or record derivation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Volume store failure.
    #[error("volume store: {0}")]
    Store(#[from] rusqlite::Error),

    /// Record serialization failure.
    #[error("encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// True if the error reports that the addressed object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status: Some(404), .. } => true,
            Self::Api { message, .. } | Self::Content(message) => {
                message.to_ascii_lowercase().contains("not found")
            }
            Self::Command { output, .. } => output.to_ascii_lowercase().contains("not found"),
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn command(command: impl Into<String>, status: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Command { command: command.into(), status: status.into(), output: output.into() }
    }
}
