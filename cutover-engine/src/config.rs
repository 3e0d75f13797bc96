//! Migration configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MigrateError;

/// Which migration strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MigrationKind {
    /// Stop every container, move its writable layer, restart it on the target.
    #[default]
    #[serde(rename = "cold-migrate")]
    Cold,
    /// Take running containers over in place without stopping them.
    #[serde(rename = "live-migrate")]
    Live,
}

impl MigrationKind {
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Cold => "cold-migrate",
            Self::Live => "live-migrate",
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for MigrationKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cold-migrate" => Ok(Self::Cold),
            "live-migrate" => Ok(Self::Live),
            other => Err(MigrateError::UnknownKind(other.to_owned())),
        }
    }
}

/// How much of an image the content daemon fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Manifest, config and every layer, unpacked.
    #[default]
    Full,
    /// Manifest and config only.
    ManifestOnly,
}

/// Every tunable of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MigratorConfig {
    pub kind: MigrationKind,

    /// Source engine package name, removed after cut-over.
    pub source_package: String,
    /// Target engine package path or name, installed after cut-over.
    pub target_package: String,
    pub source_service: String,
    pub target_service: String,

    /// Do everything except removing the source package.
    pub dry_run: bool,
    /// Run the content daemon with debug logging.
    pub debug: bool,

    pub pull_policy: PullPolicy,
    /// Images that are always fully pulled regardless of `pull_policy`.
    pub repull_images: BTreeSet<String>,
    /// HTTP(S) proxy for image pulls.
    pub image_proxy: Option<String>,
    pub default_registry: String,
    pub default_namespace: String,

    pub source_socket: PathBuf,
    pub target_socket: PathBuf,
    pub content_socket: PathBuf,
    /// Content daemon already run by the source engine; live migration adopts
    /// containers through it instead of a private daemon.
    pub host_content_socket: PathBuf,
    pub content_daemon_bin: PathBuf,
    pub content_cli_bin: PathBuf,
    /// Target daemon config rewritten to point at the new home directory.
    pub target_config_file: PathBuf,

    pub readiness_timeout: Duration,
    pub stop_timeout: Duration,
    pub service_stop_attempts: u32,

    /// Files copied to `<file>.bk` before the source package is removed.
    pub backup_files: Vec<PathBuf>,
    /// Bridge device removed once the target daemon is up.
    pub bridge_device: String,

    /// Proceed when remote-disk volumes exist; they are left unregistered.
    pub allow_remote_disks: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            kind: MigrationKind::Cold,
            source_package: "docker".to_owned(),
            target_package: "pouch".to_owned(),
            source_service: "docker".to_owned(),
            target_service: "pouch".to_owned(),
            dry_run: false,
            debug: false,
            pull_policy: PullPolicy::Full,
            repull_images: BTreeSet::new(),
            image_proxy: None,
            default_registry: cutover_core::image::DEFAULT_REGISTRY.to_owned(),
            default_namespace: cutover_core::image::DEFAULT_NAMESPACE.to_owned(),
            source_socket: PathBuf::from("/var/run/docker.sock"),
            target_socket: PathBuf::from("/var/run/pouchd.sock"),
            content_socket: PathBuf::from("/tmp/containerd-migrator.socket"),
            host_content_socket: PathBuf::from("/var/run/docker/containerd/docker-containerd.sock"),
            content_daemon_bin: PathBuf::from("/usr/local/bin/containerd"),
            content_cli_bin: PathBuf::from("ctr"),
            target_config_file: PathBuf::from("/etc/pouch/config.json"),
            readiness_timeout: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(1),
            service_stop_attempts: 3,
            backup_files: vec![
                PathBuf::from("/etc/sysconfig/docker"),
                PathBuf::from("/etc/docker/daemon.json"),
            ],
            bridge_device: "docker0".to_owned(),
            allow_remote_disks: false,
        }
    }
}

impl MigratorConfig {
    /// Socket of the content daemon this run talks to.
    #[must_use]
    pub fn active_content_socket(&self) -> &Path {
        match self.kind {
            MigrationKind::Cold => &self.content_socket,
            MigrationKind::Live => &self.host_content_socket,
        }
    }

    /// Pull policy for one image, honoring the re-pull override set.
    #[must_use]
    pub fn pull_policy_for(&self, image: &str) -> PullPolicy {
        if self.repull_images.contains(image) {
            PullPolicy::Full
        } else {
            self.pull_policy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for kind in [MigrationKind::Cold, MigrationKind::Live] {
            assert_eq!(kind.tag().parse::<MigrationKind>().ok(), Some(kind));
        }
        assert!(matches!(
            "hot-migrate".parse::<MigrationKind>(),
            Err(MigrateError::UnknownKind(_))
        ));
    }

    #[test]
    fn repull_overrides_manifest_only() {
        let mut config = MigratorConfig { pull_policy: PullPolicy::ManifestOnly, ..MigratorConfig::default() };
        config.repull_images.insert("nginx:1.25".to_owned());
        assert_eq!(config.pull_policy_for("nginx:1.25"), PullPolicy::Full);
        assert_eq!(config.pull_policy_for("busybox"), PullPolicy::ManifestOnly);
    }

    #[test]
    fn defaults_match_the_host_layout() {
        let config = MigratorConfig::default();
        assert_eq!(config.kind, MigrationKind::Cold);
        assert_eq!(config.readiness_timeout, Duration::from_secs(120));
        assert_eq!(config.service_stop_attempts, 3);
        assert_eq!(config.target_socket, PathBuf::from("/var/run/pouchd.sock"));
        assert!(!config.allow_remote_disks);
        assert_eq!(config.active_content_socket(), Path::new("/tmp/containerd-migrator.socket"));
    }
}
