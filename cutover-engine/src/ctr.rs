//! Content daemon binding through its command line client.
//!
//! Every call runs `ctr --address <socket> --namespace default ...`. Output is
//! only parsed where a JSON blob or a fixed table was requested.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::backend::{ContentStore, ImageInfo, SnapshotMount};
use crate::config::PullPolicy;
use crate::exec;
use crate::MigrateError;

const NAMESPACE: &str = "default";

/// Runtime the adopted container records are bound to.
const TASK_RUNTIME: &str = "io.containerd.runtime.v1.linux";

/// Placeholder target for `snapshots mounts`; nothing is mounted there.
const MOUNT_TARGET: &str = "/tmp/cutover-mnt";

const GC_ROOT_LABEL: &str = "containerd.io/gc.root";

#[derive(Debug, Deserialize)]
struct Platform {
    #[serde(default)]
    os: String,
    #[serde(default)]
    architecture: String,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

/// An image manifest or a manifest list; only the fields used to reach the config.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct RootFs {
    #[serde(default)]
    diff_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    rootfs: RootFs,
}

fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Digest of the manifest for this host out of a manifest list.
fn select_platform(manifests: &[Descriptor]) -> Option<&str> {
    manifests
        .iter()
        .find(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == host_arch())
        })
        .or_else(|| manifests.first())
        .map(|d| d.digest.as_str())
}

/// Manifest digest of `reference` from `images ls` output.
fn image_digest<'a>(table: &'a str, reference: &str) -> Option<&'a str> {
    table.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        (fields.next()? == reference).then_some(())?;
        let _media_type = fields.next()?;
        fields.next()
    })
}

/// Parse the `mount -t <type> <source> <target> -o <options>` lines printed
/// by `snapshots mounts`.
fn parse_mount_commands(output: &str) -> Vec<SnapshotMount> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            if words.next()? != "mount" {
                return None;
            }
            let mut mount = SnapshotMount::default();
            let mut positional = Vec::new();
            while let Some(word) = words.next() {
                match word {
                    "-t" => mount.kind = words.next()?.to_owned(),
                    "-o" => mount.options = words.next()?.split(',').map(str::to_owned).collect(),
                    other => positional.push(other),
                }
            }
            mount.source = (*positional.first()?).to_owned();
            Some(mount)
        })
        .collect()
}

/// [`ContentStore`] backed by the `ctr` client.
#[derive(Debug, Clone)]
pub struct CtrClient {
    cli: String,
    socket: PathBuf,
    proxy: Option<String>,
    lease: String,
}

impl CtrClient {
    /// Attach to the daemon on `socket`, reusing its first lease or creating one.
    ///
    /// # Errors
    /// Returns [`MigrateError::Command`] if the daemon cannot be reached.
    pub async fn connect(cli: &Path, socket: &Path, proxy: Option<String>) -> Result<Self, MigrateError> {
        let mut client = Self {
            cli: cli.to_string_lossy().into_owned(),
            socket: socket.to_path_buf(),
            proxy,
            lease: String::new(),
        };

        let listed = client.ctr(&["leases", "ls", "-q"]).await?;
        client.lease = match listed.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(existing) => existing.to_owned(),
            None => {
                let id = format!("cutover-{}", Uuid::new_v4());
                client.ctr(&["leases", "create", "--expires", "0", &id]).await?;
                id
            }
        };
        tracing::info!(socket = %client.socket.display(), lease = %client.lease, "attached to content daemon");
        Ok(client)
    }

    /// Lease held for the whole run.
    #[must_use]
    pub fn lease(&self) -> &str {
        &self.lease
    }

    fn global_args(&self) -> Vec<String> {
        vec![
            "--address".to_owned(),
            self.socket.to_string_lossy().into_owned(),
            "--namespace".to_owned(),
            NAMESPACE.to_owned(),
        ]
    }

    async fn ctr(&self, args: &[&str]) -> Result<String, MigrateError> {
        let mut full = self.global_args();
        full.extend(args.iter().map(|a| (*a).to_owned()));
        exec::run(&self.cli, full).await
    }

    async fn ctr_with_proxy(&self, args: &[&str]) -> Result<String, MigrateError> {
        let mut full = self.global_args();
        full.extend(args.iter().map(|a| (*a).to_owned()));
        match self.proxy.as_deref() {
            Some(proxy) => exec::run_with_env(&self.cli, full, &[("HTTP_PROXY", proxy), ("HTTPS_PROXY", proxy)]).await,
            None => exec::run(&self.cli, full).await,
        }
    }

    async fn blob<T: DeserializeOwned>(&self, digest: &str) -> Result<T, MigrateError> {
        let raw = self.ctr(&["content", "get", digest]).await?;
        serde_json::from_str(&raw)
            .map_err(|e| MigrateError::Content(format!("blob {digest} is not valid JSON: {e}")))
    }
}

#[async_trait]
impl ContentStore for CtrClient {
    async fn pull(&self, reference: &str, policy: PullPolicy) -> Result<(), MigrateError> {
        match policy {
            PullPolicy::Full => self.ctr_with_proxy(&["images", "pull", reference]).await?,
            PullPolicy::ManifestOnly => {
                self.ctr_with_proxy(&["content", "fetch", "--metadata-only", reference]).await?
            }
        };
        Ok(())
    }

    async fn get_image(&self, reference: &str) -> Result<ImageInfo, MigrateError> {
        let filter = format!("name=={reference}");
        let table = self.ctr(&["images", "ls", &filter]).await?;
        let Some(mut digest) = image_digest(&table, reference).map(str::to_owned) else {
            return Err(MigrateError::Content(format!("image {reference} not found")));
        };

        // A manifest list points at one manifest per platform; follow it once.
        for _ in 0..2 {
            let manifest: Manifest = self.blob(&digest).await?;
            if let Some(config) = manifest.config {
                let config: ImageConfig = self.blob(&config.digest).await?;
                return Ok(ImageInfo { name: reference.to_owned(), diff_ids: config.rootfs.diff_ids });
            }
            digest = select_platform(&manifest.manifests)
                .ok_or_else(|| MigrateError::Content(format!("image {reference} has no manifest")))?
                .to_owned();
        }
        Err(MigrateError::Content(format!("image {reference} has nested manifest lists")))
    }

    async fn create_snapshot(&self, key: &str, parent: &str) -> Result<(), MigrateError> {
        self.ctr(&["snapshots", "prepare", key, parent]).await?;
        let root = format!("{GC_ROOT_LABEL}={}", chrono::Utc::now().to_rfc3339());
        self.ctr(&["snapshots", "label", key, &root]).await?;
        Ok(())
    }

    async fn get_snapshot(&self, key: &str) -> Result<(), MigrateError> {
        self.ctr(&["snapshots", "info", key]).await.map(drop)
    }

    async fn remove_snapshot(&self, key: &str) -> Result<(), MigrateError> {
        self.ctr(&["snapshots", "rm", key]).await.map(drop)
    }

    async fn mounts(&self, key: &str) -> Result<Vec<SnapshotMount>, MigrateError> {
        let out = self.ctr(&["snapshots", "mounts", MOUNT_TARGET, key]).await?;
        Ok(parse_mount_commands(&out))
    }

    async fn create_container(&self, id: &str, rootfs: &Path) -> Result<(), MigrateError> {
        let rootfs = rootfs.to_string_lossy();
        self.ctr(&["containers", "create", "--runtime", TASK_RUNTIME, "--rootfs", &rootfs, id])
            .await
            .map(drop)
    }

    async fn get_container(&self, id: &str) -> Result<(), MigrateError> {
        self.ctr(&["containers", "info", id]).await.map(drop)
    }

    async fn delete_container(&self, id: &str) -> Result<(), MigrateError> {
        self.ctr(&["containers", "rm", id]).await.map(drop)
    }
}
