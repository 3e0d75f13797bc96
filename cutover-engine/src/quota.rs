//! ext4/xfs project quota driver.
//!
//! Project IDs are bound through the `FS_IOC_FSGETXATTR`/`FS_IOC_FSSETXATTR`
//! ioctls; limits are set with the filesystem's quota tool.

use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::backend::QuotaDriver;
use crate::exec;
use crate::MigrateError;

const FS_IOC_FSGETXATTR: u32 = 0x801c_581f;
const FS_IOC_FSSETXATTR: u32 = 0x401c_5820;
const FS_XFLAG_PROJINHERIT: u32 = 0x0000_0200;

/// Mount options that enable project quota accounting.
const PROJECT_QUOTA_OPTIONS: [&str; 3] = ["prjquota", "pquota", "pqnoenforce"];

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct FsXattr {
    xflags: u32,
    extsize: u32,
    nextents: u32,
    projid: u32,
    cowextsize: u32,
    pad: [u8; 8],
}

/// Filesystem type with project quota support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaFs {
    Ext4,
    Xfs,
}

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

/// Parse `/proc/self/mounts` formatted text.
#[must_use]
pub fn parse_mounts(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = unescape_mount_path(fields.next()?);
            let fs_type = fields.next()?.to_owned();
            let options = fields.next()?.split(',').map(str::to_owned).collect();
            Some(MountEntry { mount_point: PathBuf::from(mount_point), fs_type, options })
        })
        .collect()
}

/// Decode the octal escapes (`\040` and friends) the kernel uses in mount paths.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = bytes.get(i + 1..i + 4).filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)));
        if let (b'\\', Some(digits)) = (bytes[i], octal) {
            let code = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(u8::try_from(code).unwrap_or(b'?'));
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The mount entry holding `dir`: the longest mount point that prefixes it.
#[must_use]
pub fn find_mount<'a>(mounts: &'a [MountEntry], dir: &Path) -> Option<&'a MountEntry> {
    mounts
        .iter()
        .filter(|m| dir.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.as_os_str().len())
}

/// Cached per-mount quota state.
#[derive(Debug, Clone)]
struct QuotaMount {
    mount_point: PathBuf,
    fs: QuotaFs,
}

/// Project quota driver for ext4 and xfs.
#[derive(Debug)]
pub struct ProjectQuota {
    mounts_file: PathBuf,
    started: Mutex<BTreeMap<PathBuf, QuotaMount>>,
}

impl Default for ProjectQuota {
    fn default() -> Self {
        Self::new("/proc/self/mounts")
    }
}

impl ProjectQuota {
    #[must_use]
    pub fn new(mounts_file: impl Into<PathBuf>) -> Self {
        Self { mounts_file: mounts_file.into(), started: Mutex::new(BTreeMap::new()) }
    }

    fn quota_err(dir: &Path, reason: impl Into<String>) -> MigrateError {
        MigrateError::Quota { dir: dir.to_path_buf(), reason: reason.into() }
    }

    /// Resolve (and cache) the quota-enabled mount holding `dir`.
    async fn resolve(&self, dir: &Path) -> Result<QuotaMount, MigrateError> {
        let dir = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| Self::quota_err(dir, format!("resolve path: {e}")))?;

        let table = tokio::fs::read_to_string(&self.mounts_file).await?;
        let mounts = parse_mounts(&table);
        let entry = find_mount(&mounts, &dir)
            .ok_or_else(|| Self::quota_err(&dir, "no mount point found"))?;

        if let Some(cached) = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entry.mount_point)
        {
            return Ok(cached.clone());
        }

        let fs = match entry.fs_type.as_str() {
            "ext4" => QuotaFs::Ext4,
            "xfs" => QuotaFs::Xfs,
            other => return Err(Self::quota_err(&dir, format!("filesystem {other} has no project quota support"))),
        };
        if !entry.options.iter().any(|o| PROJECT_QUOTA_OPTIONS.contains(&o.as_str())) {
            return Err(Self::quota_err(
                &dir,
                format!("{} is not mounted with project quota enabled", entry.mount_point.display()),
            ));
        }

        let mount = QuotaMount { mount_point: entry.mount_point.clone(), fs };
        tracing::info!(
            mount_point = %mount.mount_point.display(),
            fs = ?mount.fs,
            "project quota enabled"
        );
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mount.mount_point.clone(), mount.clone());
        Ok(mount)
    }
}

fn open_no_follow(path: &Path) -> std::io::Result<File> {
    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
}

/// Set the project ID (and optionally the inherit flag) of `path`.
fn set_project(path: &Path, id: u32, inherit: bool) -> std::io::Result<()> {
    let file = open_no_follow(path)?;
    let fd = file.as_raw_fd();
    let mut attr = FsXattr::default();

    // SAFETY: `fd` is a valid open descriptor for the lifetime of `file`, and
    // `attr` is a correctly sized `struct fsxattr` the kernel writes into.
    let rc = unsafe { libc::ioctl(fd, FS_IOC_FSGETXATTR as _, &mut attr as *mut FsXattr) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    attr.projid = id;
    if inherit {
        attr.xflags |= FS_XFLAG_PROJINHERIT;
    }

    // SAFETY: as above; the kernel only reads from `attr`.
    let rc = unsafe { libc::ioctl(fd, FS_IOC_FSSETXATTR as _, &attr as *const FsXattr) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[async_trait]
impl QuotaDriver for ProjectQuota {
    async fn start(&self, dir: &Path) -> Result<(), MigrateError> {
        self.resolve(dir).await.map(drop)
    }

    async fn set_subtree(&self, dir: &Path, id: u32) -> Result<(), MigrateError> {
        set_project(dir, id, true).map_err(|e| Self::quota_err(dir, format!("set project {id}: {e}")))?;
        tracing::debug!(dir = %dir.display(), project = id, "bound project id");
        Ok(())
    }

    async fn set_limit(&self, dir: &Path, limit_kib: u64, id: u32) -> Result<(), MigrateError> {
        let mount = self.resolve(dir).await?;
        let mount_point = mount.mount_point.to_string_lossy().into_owned();
        match mount.fs {
            QuotaFs::Ext4 => {
                let (id, kib) = (id.to_string(), limit_kib.to_string());
                exec::run("setquota", ["-P", id.as_str(), "0", kib.as_str(), "0", "0", mount_point.as_str()]).await?;
            }
            QuotaFs::Xfs => {
                let limit = format!("limit -p bhard={limit_kib}k {id}");
                exec::run("xfs_quota", ["-x", "-c", limit.as_str(), mount_point.as_str()]).await?;
            }
        }
        Ok(())
    }

    async fn set_file_attr(&self, path: &Path, id: u32) -> Result<(), MigrateError> {
        let is_dir = tokio::fs::symlink_metadata(path).await.is_ok_and(|m| m.is_dir());
        set_project(path, id, is_dir).map_err(|e| Self::quota_err(path, format!("set project {id}: {e}")))
    }
}
