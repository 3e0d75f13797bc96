//! Host operations through the OS command surface.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::HostOps;
use crate::{exec, fsutil, readiness, MigrateError};

/// [`HostOps`] for an rpm/systemd host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

#[async_trait]
impl HostOps for SystemHost {
    async fn move_dir_contents(&self, src: &Path, dst: &Path) -> Result<usize, MigrateError> {
        fsutil::move_dir_contents(src, dst).await
    }

    async fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), MigrateError> {
        fsutil::copy_file(src, dst).await
    }

    async fn stop_service(&self, name: &str) -> Result<(), MigrateError> {
        exec::run("systemctl", ["stop", name]).await.map(drop)
    }

    async fn start_service(&self, name: &str) -> Result<(), MigrateError> {
        exec::run("systemctl", ["restart", name]).await.map(drop)
    }

    async fn remove_package(&self, name: &str) -> Result<(), MigrateError> {
        exec::run("yum", ["remove", "-y", name]).await.map(drop)
    }

    async fn install_package(&self, path: &str) -> Result<(), MigrateError> {
        exec::run("yum", ["install", "-y", path]).await.map(drop)
    }

    async fn remove_bridge(&self, device: &str) -> Result<(), MigrateError> {
        exec::run("ip", ["link", "del", device]).await.map(drop)
    }

    async fn wait_ready(&self, socket: &Path, timeout: Duration) -> Result<(), MigrateError> {
        readiness::wait_until_ready(socket, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_replaces_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("local-kv.db");
        let dst = dir.path().join("pouch/network/files/local-kv.db");
        std::fs::write(&src, b"new").expect("write");
        std::fs::create_dir_all(dst.parent().expect("parent")).expect("mkdir");
        std::fs::write(&dst, b"stale content").expect("write");

        SystemHost.copy_file(&src, &dst).await.expect("copy");
        assert_eq!(std::fs::read(&dst).expect("read"), b"new");
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = SystemHost.copy_file(&dir.path().join("absent"), &dir.path().join("dst")).await;
        assert!(result.is_err_and(|e| e.is_not_found()));
    }
}
