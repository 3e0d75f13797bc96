//! CRI pod sandbox registration.
//!
//! Every sandbox-shaped container gets a record under
//! `<home>/sandboxes-meta/<id>/meta.json` and a resolver file under
//! `<home>/sandboxes/<id>/resolv.conf`. Sandbox metadata is auxiliary state:
//! failures are logged and the run goes on.

use std::path::{Path, PathBuf};

use cutover_core::translate::{POUCH_TYPE_LABEL, TYPE_SANDBOX};
use cutover_core::{is_sandbox_name, ContainerRecord, SandboxRecord};

use crate::fsutil;
use crate::MigrateError;

const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";
const META_FILE: &str = "meta.json";

/// True for containers that are pod sandboxes.
#[must_use]
pub fn is_sandbox(container: &ContainerRecord) -> bool {
    container.label(POUCH_TYPE_LABEL) == Some(TYPE_SANDBOX) || is_sandbox_name(&container.name)
}

/// Writes sandbox records and files below a target home directory.
#[derive(Debug, Clone)]
pub struct SandboxStore {
    meta_dir: PathBuf,
    files_dir: PathBuf,
    host_resolv_conf: PathBuf,
}

impl SandboxStore {
    #[must_use]
    pub fn new(home: &Path) -> Self {
        Self {
            meta_dir: home.join("sandboxes-meta"),
            files_dir: home.join("sandboxes"),
            host_resolv_conf: PathBuf::from(HOST_RESOLV_CONF),
        }
    }

    /// Resolver file copied for sandboxes that have none of their own.
    #[must_use]
    pub fn with_host_resolv_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_resolv_conf = path.into();
        self
    }

    /// Register one sandbox: write its record, then its resolver file.
    ///
    /// # Errors
    /// Returns the error of the first step that failed.
    pub async fn register(&self, container: &ContainerRecord) -> Result<(), MigrateError> {
        let record = SandboxRecord::from_container(container)?;
        fsutil::save_json(&self.meta_dir.join(&record.id), META_FILE, &record)?;

        let source = if container.resolv_conf_path.is_empty() {
            self.host_resolv_conf.as_path()
        } else {
            Path::new(&container.resolv_conf_path)
        };
        let target = self.files_dir.join(&record.id).join("resolv.conf");
        if let Err(e) = fsutil::copy_file(source, &target).await {
            tracing::error!(sandbox = %record.id, src = %source.display(), "failed to set up sandbox files: {e}");
        }
        Ok(())
    }

    /// Register every sandbox among `containers`; returns how many succeeded.
    pub async fn register_all<'a>(&self, containers: impl IntoIterator<Item = &'a ContainerRecord>) -> usize {
        let mut registered = 0usize;
        for container in containers.into_iter().filter(|c| is_sandbox(c)) {
            match self.register(container).await {
                Ok(()) => registered += 1,
                Err(e) => tracing::error!(container = %container.id, "failed to register sandbox: {e}"),
            }
        }
        tracing::info!(sandboxes = registered, "sandbox metadata written");
        registered
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cutover_core::record::ContainerConfig;

    use super::*;

    fn container(id: &str, name: &str, resolv: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.to_owned(),
            name: name.to_owned(),
            resolv_conf_path: resolv.to_owned(),
            config: Some(ContainerConfig {
                labels: BTreeMap::from([("app".to_owned(), "web".to_owned())]),
                ..ContainerConfig::default()
            }),
            ..ContainerRecord::default()
        }
    }

    #[tokio::test]
    async fn sandbox_without_resolv_conf_copies_the_host_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = dir.path().join("host-resolv.conf");
        std::fs::write(&host, "nameserver 10.0.0.2\n").expect("write");
        let home = dir.path().join("pouch");
        let store = SandboxStore::new(&home).with_host_resolv_conf(&host);

        let containers = [
            container("s1", "k8s_POD_web_prod_1a2b_0", ""),
            container("c1", "k8s_web_web_prod_1a2b_0", ""),
        ];
        assert_eq!(store.register_all(&containers).await, 1);

        let meta = std::fs::read_to_string(home.join("sandboxes-meta/s1/meta.json")).expect("meta");
        let record: SandboxRecord = serde_json::from_str(&meta).expect("decode");
        assert_eq!(record.config.metadata.name, "web");
        assert_eq!(record.config.log_directory, "/var/log/pods/1a2b");
        assert_eq!(
            std::fs::read_to_string(home.join("sandboxes/s1/resolv.conf")).expect("resolv"),
            "nameserver 10.0.0.2\n"
        );
        assert!(!home.join("sandboxes-meta/c1").exists());
    }

    #[tokio::test]
    async fn malformed_sandbox_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SandboxStore::new(dir.path());
        let mut bad = container("s2", "k8s_POD_web_prod_uid_notanumber", "");
        if let Some(config) = bad.config.as_mut() {
            config.labels.insert(POUCH_TYPE_LABEL.to_owned(), TYPE_SANDBOX.to_owned());
        }
        assert_eq!(store.register_all([&bad]).await, 0);
    }

    #[tokio::test]
    async fn missing_resolver_file_still_registers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SandboxStore::new(dir.path()).with_host_resolv_conf(dir.path().join("absent"));
        let sandbox = container("s3", "k8s_POD_db_prod_9f_2", "");
        assert!(store.register(&sandbox).await.is_ok());
        assert!(dir.path().join("sandboxes-meta/s3/meta.json").exists());
    }
}
