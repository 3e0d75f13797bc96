//! Readiness polling for a daemon API socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::sync::oneshot;

use crate::MigrateError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait until `socket` accepts a connection.
///
/// A background task polls the socket and signals on a rendezvous channel;
/// the first of that signal and `timeout` wins. The poller is aborted when the
/// timeout fires.
///
/// # Errors
/// Returns [`MigrateError::DaemonTimeout`] if no connection succeeds in time.
pub async fn wait_until_ready(socket: &Path, timeout: Duration) -> Result<(), MigrateError> {
    let (ready_tx, ready_rx) = oneshot::channel::<()>();
    let path: PathBuf = socket.to_path_buf();

    let poller = tokio::spawn(async move {
        loop {
            if UnixStream::connect(&path).await.is_ok() {
                let _ = ready_tx.send(());
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    match tokio::time::timeout(timeout, ready_rx).await {
        Ok(Ok(())) => {
            tracing::info!(socket = %socket.display(), "daemon socket is accepting connections");
            Ok(())
        }
        Ok(Err(_)) | Err(_) => {
            poller.abort();
            Err(MigrateError::DaemonTimeout {
                socket: socket.to_path_buf(),
                secs: timeout.as_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn ready_when_listener_appears_later() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sock = dir.path().join("late.sock");
        let bind_path = sock.clone();
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = UnixListener::bind(&bind_path).expect("bind");
            let _ = listener.accept().await;
        });

        let result = wait_until_ready(&sock, Duration::from_secs(10)).await;
        assert!(result.is_ok(), "expected ready, got {result:?}");
        server.abort();
    }

    #[tokio::test]
    async fn times_out_without_listener() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sock = dir.path().join("absent.sock");
        let result = wait_until_ready(&sock, Duration::from_millis(300)).await;
        assert!(matches!(result, Err(MigrateError::DaemonTimeout { .. })));
    }
}
