//! Daemon handle: owns the private content daemon process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::MigrateError;

/// How long to wait for a freshly spawned daemon to create its socket.
const SOCKET_APPEAR_TIMEOUT: Duration = Duration::from_secs(10);

/// Command line of the content daemon.
#[derive(Debug, Clone)]
pub struct DaemonSpec {
    pub binary: PathBuf,
    pub socket: PathBuf,
    pub root: PathBuf,
    pub state: PathBuf,
    pub debug: bool,
}

impl DaemonSpec {
    /// Daemon rooted under `<home>/containerd`.
    #[must_use]
    pub fn under_home(binary: &Path, socket: &Path, home: &Path, debug: bool) -> Self {
        Self {
            binary: binary.to_path_buf(),
            socket: socket.to_path_buf(),
            root: home.join("containerd/root"),
            state: home.join("containerd/state"),
            debug,
        }
    }
}

/// A handle to a spawned daemon.
///
/// The child's exit is awaited on a background task that only logs. Call
/// [`DaemonHandle::release`] to stop it; release is idempotent and is a no-op
/// for a handle that never owned a process.
#[derive(Debug)]
#[non_exhaustive]
pub struct DaemonHandle {
    /// Socket the daemon serves on.
    pub socket_path: PathBuf,

    /// Timestamp when the daemon was started.
    pub started_at: DateTime<Utc>,

    kill: Option<oneshot::Sender<()>>,
    waiter: Option<JoinHandle<()>>,
}

impl DaemonHandle {
    /// A handle that owns no process.
    #[must_use]
    pub fn detached(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            started_at: Utc::now(),
            kill: None,
            waiter: None,
        }
    }

    /// Spawn the daemon and wait for its socket to appear.
    ///
    /// # Errors
    /// Returns [`MigrateError::Io`] if the process cannot be started, or
    /// [`MigrateError::DaemonTimeout`] if the socket does not appear.
    pub async fn spawn(spec: &DaemonSpec) -> Result<Self, MigrateError> {
        match tokio::fs::remove_file(&spec.socket).await {
            Ok(()) => tracing::debug!(socket = %spec.socket.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&spec.root).await?;
        tokio::fs::create_dir_all(&spec.state).await?;

        tracing::info!(
            binary = %spec.binary.display(),
            socket = %spec.socket.display(),
            "starting content daemon"
        );

        let mut child = Command::new(&spec.binary)
            .arg("-a")
            .arg(&spec.socket)
            .arg("--root")
            .arg(&spec.root)
            .arg("--state")
            .arg(&spec.state)
            .arg("-l")
            .arg(if spec.debug { "debug" } else { "info" })
            .env_remove("NOTIFY_SOCKET")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let waiter = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => tracing::info!(?pid, %status, "content daemon exited"),
                    Err(e) => tracing::warn!(?pid, "waiting for content daemon failed: {e}"),
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(?pid, "failed to kill content daemon: {e}");
                    } else {
                        tracing::debug!(?pid, "content daemon killed");
                    }
                }
            }
        });

        let mut handle = Self {
            socket_path: spec.socket.clone(),
            started_at: Utc::now(),
            kill: Some(kill_tx),
            waiter: Some(waiter),
        };

        if let Err(e) = wait_for_socket(&spec.socket, SOCKET_APPEAR_TIMEOUT).await {
            handle.release().await;
            return Err(e);
        }
        tracing::info!(socket = %spec.socket.display(), "content daemon ready");
        Ok(handle)
    }

    /// True while the handle still owns a process.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.kill.is_some()
    }

    /// Stop the daemon and remove its socket.
    pub async fn release(&mut self) {
        let Some(kill) = self.kill.take() else {
            return;
        };
        let _ = kill.send(());
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.await;
        }
        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(socket = %self.socket_path.display(), "failed to remove socket: {e}");
            }
        }
    }
}

/// Wait for a socket file to appear.
async fn wait_for_socket(socket_path: &Path, timeout: Duration) -> Result<(), MigrateError> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if socket_path.exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(MigrateError::DaemonTimeout {
        socket: socket_path.to_path_buf(),
        secs: timeout.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detached_release_is_a_no_op() {
        let mut handle = DaemonHandle::detached("/tmp/cutover-never-created.sock");
        assert!(!handle.is_owned());
        handle.release().await;
        handle.release().await;
        assert!(!handle.is_owned());
    }

    #[tokio::test]
    async fn spawn_fails_when_socket_never_appears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = DaemonSpec {
            binary: PathBuf::from("sleep"),
            socket: dir.path().join("never.sock"),
            root: dir.path().join("root"),
            state: dir.path().join("state"),
            debug: false,
        };
        // `sleep` rejects the daemon flags and exits; the socket never appears.
        let result = tokio::time::timeout(Duration::from_secs(30), DaemonHandle::spawn(&spec)).await;
        assert!(matches!(result, Ok(Err(MigrateError::DaemonTimeout { .. }))));
    }

    #[tokio::test]
    async fn release_twice_after_spawn_is_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("fake.sock");
        let script = dir.path().join("fake-daemon.sh");
        std::fs::write(&script, "#!/bin/sh\ntouch \"$2\"\nexec sleep 30\n").expect("write script");
        let mut perms = std::fs::metadata(&script).expect("metadata").permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");

        let spec = DaemonSpec {
            binary: script,
            socket: socket.clone(),
            root: dir.path().join("root"),
            state: dir.path().join("state"),
            debug: true,
        };
        let mut handle = match DaemonHandle::spawn(&spec).await {
            Ok(h) => h,
            Err(e) => panic!("spawn failed: {e}"),
        };
        assert!(handle.is_owned());
        handle.release().await;
        assert!(!socket.exists(), "release must remove the socket");
        handle.release().await;
    }
}
