//! Named volume registration with the target volume store.
//!
//! The store is an embedded SQLite database at `<home>/volume/volume.db`
//! holding one key/value table per bucket. It must be closed before the
//! target daemon starts, which opens the same file.
//!
//! The target daemon reads that path as a bolt database, not SQLite. The
//! bucket name, keys and JSON values match what it expects, but the file
//! itself is not readable by it; volumes have to be re-imported into the
//! daemon's own store until a bolt writer replaces this one.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use cutover_core::volume::{REMOTE_DISK_DRIVER, SUPPORTED_DRIVERS};
use cutover_core::{Volume, VolumeRecord, VolumeRefs};

use crate::backend::SourceRuntime;
use crate::MigrateError;

const VOLUME_BUCKET: &str = "volume";

/// Driver whose bulk listing omits the volume size.
const SIZE_ON_INSPECT_DRIVER: &str = "alilocal";

/// Keyed JSON store for volume records.
///
/// Same bucket/key/value layout as the target's volume store, in a SQLite
/// file rather than the bolt format the target daemon opens.
#[derive(Debug)]
pub struct VolumeStore {
    conn: Connection,
    path: PathBuf,
}

impl VolumeStore {
    /// Open (creating if needed) `<home>/volume/volume.db`.
    ///
    /// # Errors
    /// Returns [`MigrateError::Io`] if the directory cannot be created, or
    /// [`MigrateError::Store`] if the database cannot be opened.
    pub fn open(home: &Path) -> Result<Self, MigrateError> {
        let dir = home.join("volume");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("volume.db");
        let conn = Connection::open(&path)?;
        let store = Self { conn, path };
        store.ensure_bucket(VOLUME_BUCKET)?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_bucket(&self, bucket: &str) -> Result<(), MigrateError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{bucket}\" (key TEXT PRIMARY KEY NOT NULL, value BLOB NOT NULL)"
        ))?;
        Ok(())
    }

    /// Insert or replace a volume record keyed by its name.
    ///
    /// # Errors
    /// Returns [`MigrateError::Encode`] or [`MigrateError::Store`].
    pub fn put(&self, record: &VolumeRecord) -> Result<(), MigrateError> {
        let value = serde_json::to_vec(record)?;
        self.conn.execute(
            &format!("INSERT OR REPLACE INTO \"{VOLUME_BUCKET}\" (key, value) VALUES (?1, ?2)"),
            params![record.name(), value],
        )?;
        Ok(())
    }

    /// # Errors
    /// Returns [`MigrateError::Store`] or [`MigrateError::Encode`] for a corrupt value.
    pub fn get(&self, name: &str) -> Result<Option<VolumeRecord>, MigrateError> {
        let value: Option<Vec<u8>> = self
            .conn
            .query_row(
                &format!("SELECT value FROM \"{VOLUME_BUCKET}\" WHERE key = ?1"),
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        value.map(|v| serde_json::from_slice(&v)).transpose().map_err(Into::into)
    }

    /// # Errors
    /// Returns [`MigrateError::Store`].
    pub fn count(&self) -> Result<usize, MigrateError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{VOLUME_BUCKET}\""), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Close the database so another process can open it.
    ///
    /// # Errors
    /// Returns [`MigrateError::Store`] if pending work cannot be flushed.
    pub fn close(self) -> Result<(), MigrateError> {
        self.conn.close().map_err(|(_, e)| MigrateError::Store(e))
    }
}

/// Translate the source volumes, attach their container references and
/// write them to the target volume store. Remote-disk volumes are skipped.
///
/// A failed size lookup is logged and the volume is stored without a size.
///
/// # Errors
/// Returns [`MigrateError::Precondition`] for an unsupported driver, or a
/// store error.
pub async fn register_volumes(
    source: &dyn SourceRuntime,
    home: &Path,
    volumes: &[Volume],
    refs: &VolumeRefs,
) -> Result<usize, MigrateError> {
    let now = chrono::Utc::now();
    let mut records = Vec::with_capacity(volumes.len());
    for volume in volumes {
        if !SUPPORTED_DRIVERS.contains(&volume.driver.as_str()) {
            return Err(MigrateError::Precondition(format!(
                "volume {} uses unsupported driver {}",
                volume.name, volume.driver
            )));
        }
        if volume.driver == REMOTE_DISK_DRIVER {
            tracing::warn!(volume = %volume.name, "remote disk volume is not registered");
            continue;
        }

        let mut record = VolumeRecord::from_source(volume, now);
        if let Some(containers) = refs.get(&volume.name) {
            record.set_refs(containers);
            if volume.driver == SIZE_ON_INSPECT_DRIVER {
                match source.inspect_volume(&volume.name).await {
                    Ok(detail) => record.spec.size = detail.status_size().unwrap_or_default(),
                    Err(e) => tracing::error!(volume = %volume.name, "failed to inspect volume: {e}"),
                }
            }
        }
        records.push(record);
    }

    let store = VolumeStore::open(home)?;
    for record in &records {
        store.put(record)?;
        tracing::debug!(volume = %record.name(), driver = %record.driver(), "volume registered");
    }
    store.close()?;
    tracing::info!(volumes = records.len(), "volumes registered");
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn put_replaces_and_survives_reopen() {
        let home = tempfile::tempdir().expect("tempdir");
        let volume = Volume {
            name: "data".to_owned(),
            driver: "local".to_owned(),
            mountpoint: "/var/lib/docker/volumes/data/_data".to_owned(),
            ..Volume::default()
        };
        let mut record = VolumeRecord::from_source(&volume, chrono::Utc::now());

        let store = VolumeStore::open(home.path()).expect("open");
        store.put(&record).expect("put");
        record.set_refs("c1,c2");
        store.put(&record).expect("put again");
        assert_eq!(store.count().expect("count"), 1);
        store.close().expect("close");

        let store = VolumeStore::open(home.path()).expect("reopen");
        let stored = store.get("data").expect("get").expect("present");
        assert_eq!(stored.spec.extra.get("ref").map(String::as_str), Some("c1,c2"));
        assert!(store.get("missing").expect("get").is_none());
        assert!(home.path().join("volume/volume.db").exists());
    }

    struct SizedVolumes;

    #[async_trait::async_trait]
    impl SourceRuntime for SizedVolumes {
        async fn info(&self) -> Result<cutover_core::EngineInfo, MigrateError> {
            Ok(cutover_core::EngineInfo::default())
        }

        async fn list_containers(&self) -> Result<Vec<cutover_core::ContainerSummary>, MigrateError> {
            Ok(Vec::new())
        }

        async fn inspect(&self, id: &str) -> Result<cutover_core::ContainerDetail, MigrateError> {
            Err(MigrateError::Precondition(format!("unexpected inspect {id}")))
        }

        async fn inspect_image(&self, reference: &str) -> Result<cutover_core::ImageDetail, MigrateError> {
            Err(MigrateError::Precondition(format!("unexpected image {reference}")))
        }

        async fn list_volumes(&self) -> Result<Vec<Volume>, MigrateError> {
            Ok(Vec::new())
        }

        async fn inspect_volume(&self, name: &str) -> Result<Volume, MigrateError> {
            Ok(Volume {
                name: name.to_owned(),
                status: BTreeMap::from([("opt.size".to_owned(), serde_json::json!("20g"))]),
                ..Volume::default()
            })
        }

        async fn stop(&self, _id: &str, _timeout: std::time::Duration) -> Result<(), MigrateError> {
            Ok(())
        }

        async fn start(&self, _id: &str) -> Result<(), MigrateError> {
            Ok(())
        }
    }

    fn volume(name: &str, driver: &str) -> Volume {
        Volume { name: name.to_owned(), driver: driver.to_owned(), ..Volume::default() }
    }

    #[tokio::test]
    async fn remote_disks_are_skipped_and_sizes_inspected() {
        let home = tempfile::tempdir().expect("tempdir");
        let mut refs = VolumeRefs::new();
        let user = cutover_core::ContainerRecord {
            id: "c1".to_owned(),
            mounts: vec![
                cutover_core::record::MountPoint { name: "quota".to_owned(), driver: "alilocal".to_owned(), ..Default::default() },
                cutover_core::record::MountPoint { name: "remote".to_owned(), driver: "ultron".to_owned(), ..Default::default() },
            ],
            ..cutover_core::ContainerRecord::default()
        };
        refs.count(&user);

        let volumes = [volume("quota", "alilocal"), volume("remote", "ultron"), volume("idle", "local")];
        let registered = register_volumes(&SizedVolumes, home.path(), &volumes, &refs).await.expect("register");
        assert_eq!(registered, 2);

        let store = VolumeStore::open(home.path()).expect("open");
        let quota = store.get("quota").expect("get").expect("present");
        assert_eq!(quota.spec.size, "20g");
        assert_eq!(quota.spec.extra.get("ref").map(String::as_str), Some("c1"));
        assert!(store.get("remote").expect("get").is_none());
        let idle = store.get("idle").expect("get").expect("present");
        assert!(!idle.spec.extra.contains_key("ref"));
    }

    #[tokio::test]
    async fn unsupported_driver_is_a_precondition_error() {
        let home = tempfile::tempdir().expect("tempdir");
        let result = register_volumes(&SizedVolumes, home.path(), &[volume("x", "nfs")], &VolumeRefs::new()).await;
        assert!(matches!(result, Err(MigrateError::Precondition(_))));
    }
}
