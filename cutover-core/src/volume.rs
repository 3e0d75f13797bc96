//! Named volume records and container reference counting.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::ContainerRecord;
use crate::source::Volume;

/// Volume drivers the migration knows how to carry over.
pub const SUPPORTED_DRIVERS: [&str; 3] = ["local", "alilocal", "ultron"];

/// Driver of remote-disk volumes; never registered with the target.
pub const REMOTE_DISK_DRIVER: &str = "ultron";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeMeta {
    pub name: String,
    pub claimer: String,
    pub namespace: String,
    #[serde(rename = "UID")]
    pub uid: String,
    pub generation: String,
    pub labels: BTreeMap<String, String>,
    pub creation_timestamp: DateTime<Utc>,
    pub modify_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeSpec {
    pub backend: String,
    /// Driver extras: `mount` is the host mount point, `ref` the comma-joined
    /// IDs of the containers using the volume.
    pub extra: BTreeMap<String, String>,
    pub selector: Vec<String>,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeStatus {
    pub mount_point: String,
}

/// A volume as the target daemon stores it in its volume database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRecord {
    pub meta: VolumeMeta,
    pub spec: VolumeSpec,
    pub status: VolumeStatus,
}

impl VolumeRecord {
    /// Build a record for a source volume, stamped with a fresh UID.
    #[must_use]
    pub fn from_source(volume: &Volume, now: DateTime<Utc>) -> Self {
        Self {
            meta: VolumeMeta {
                name: volume.name.clone(),
                claimer: "pouch".to_owned(),
                namespace: "pouch".to_owned(),
                uid: Uuid::new_v4().to_string(),
                generation: "PreCreate".to_owned(),
                labels: volume.labels.clone(),
                creation_timestamp: now,
                modify_timestamp: now,
            },
            spec: VolumeSpec {
                backend: volume.driver.clone(),
                extra: BTreeMap::from([("mount".to_owned(), volume.mountpoint.clone())]),
                selector: Vec::new(),
                size: String::new(),
            },
            status: VolumeStatus { mount_point: volume.mountpoint.clone() },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    #[must_use]
    pub fn driver(&self) -> &str {
        &self.spec.backend
    }

    pub fn set_refs(&mut self, refs: &str) {
        self.spec.extra.insert("ref".to_owned(), refs.to_owned());
    }
}

/// Volume name → comma-joined IDs of the containers that mount it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRefs(BTreeMap<String, String>);

impl VolumeRefs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the container's driver-backed mounts.
    ///
    /// A container already present in a volume's list is not appended again.
    /// Presence is checked by substring, so an ID that is a prefix of another
    /// already listed ID is treated as present.
    pub fn count(&mut self, container: &ContainerRecord) {
        for mount in container.mounts.iter().filter(|m| !m.driver.is_empty()) {
            let refs = self.0.entry(mount.name.clone()).or_default();
            if refs.is_empty() {
                refs.clone_from(&container.id);
            } else if !refs.contains(&container.id) {
                refs.push(',');
                refs.push_str(&container.id);
            }
        }
    }

    #[must_use]
    pub fn get(&self, volume: &str) -> Option<&str> {
        self.0.get(volume).map(String::as_str).filter(|r| !r.is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MountPoint;

    fn container(id: &str, mounts: &[(&str, &str)]) -> ContainerRecord {
        ContainerRecord {
            id: id.to_owned(),
            mounts: mounts
                .iter()
                .map(|(name, driver)| MountPoint {
                    name: (*name).to_owned(),
                    driver: (*driver).to_owned(),
                    ..MountPoint::default()
                })
                .collect(),
            ..ContainerRecord::default()
        }
    }

    #[test]
    fn refs_accumulate_and_dedupe() {
        let mut refs = VolumeRefs::new();
        refs.count(&container("c1", &[("data", "local"), ("bind", "")]));
        refs.count(&container("c2", &[("data", "local")]));
        refs.count(&container("c1", &[("data", "local")]));
        assert_eq!(refs.get("data"), Some("c1,c2"));
        assert_eq!(refs.get("bind"), None);
    }

    #[test]
    fn refs_substring_match_skips_prefix_ids() {
        let mut refs = VolumeRefs::new();
        refs.count(&container("abcdef", &[("v", "local")]));
        refs.count(&container("abc", &[("v", "local")]));
        assert_eq!(refs.get("v"), Some("abcdef"));
    }

    #[test]
    fn volume_record_from_source() {
        let source = Volume {
            name: "data".to_owned(),
            driver: "local".to_owned(),
            mountpoint: "/var/lib/docker/volumes/data/_data".to_owned(),
            ..Volume::default()
        };
        let now = Utc::now();
        let mut record = VolumeRecord::from_source(&source, now);
        record.set_refs("c1");
        assert_eq!(record.name(), "data");
        assert_eq!(record.driver(), "local");
        assert_eq!(record.spec.extra.get("mount").map(String::as_str), Some(source.mountpoint.as_str()));
        assert_eq!(record.spec.extra.get("ref").map(String::as_str), Some("c1"));
        assert_eq!(record.meta.creation_timestamp, now);
        assert!(Uuid::parse_str(&record.meta.uid).is_ok());
    }
}
