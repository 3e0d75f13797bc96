//! Run state shared by the phases of one migration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a migration run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    Prepared,
    Migrated,
    PostMigrated,
    Reverted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Prepared => "prepared",
            Self::Migrated => "migrated",
            Self::PostMigrated => "post-migrated",
            Self::Reverted => "reverted",
        })
    }
}

/// A source writable layer and the target snapshot directory it moves into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpperDirMapping {
    pub container_id: String,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
}

/// Process-wide state of one run.
///
/// Owned by the orchestrator and lent to each phase; nothing here is persisted.
#[derive(Debug, Default)]
pub struct MigrationJob {
    source_root: PathBuf,
    target_home: PathBuf,
    /// Container ID seen at prepare time → still present at post-migrate time.
    all_containers: BTreeMap<String, bool>,
    running: Vec<String>,
    /// Raw image string → normalized reference already pulled.
    pulled: BTreeMap<String, String>,
    mappings: Vec<UpperDirMapping>,
    phase: Phase,
}

impl MigrationJob {
    #[must_use]
    pub fn new(source_root: impl Into<PathBuf>, target_home: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            target_home: target_home.into(),
            ..Self::default()
        }
    }

    /// Root directory of the source engine.
    #[must_use]
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Home directory of the target daemon.
    #[must_use]
    pub fn target_home(&self) -> &Path {
        &self.target_home
    }

    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.target_home.join("containers")
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Remember a container seen while preparing.
    pub fn record_container(&mut self, id: &str, running: bool) {
        self.all_containers.insert(id.to_owned(), false);
        if running && !self.running.iter().any(|r| r == id) {
            self.running.push(id.to_owned());
        }
    }

    /// Number of containers seen while preparing.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.all_containers.len()
    }

    /// Containers that were running at prepare time, in listing order.
    #[must_use]
    pub fn running(&self) -> &[String] {
        &self.running
    }

    /// Flag the containers still listed by the source engine and return the
    /// ones seen at prepare time that are gone now.
    pub fn reconcile<'a>(&mut self, present: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        for flag in self.all_containers.values_mut() {
            *flag = false;
        }
        for id in present {
            if let Some(flag) = self.all_containers.get_mut(id) {
                *flag = true;
            }
        }
        self.all_containers
            .iter()
            .filter(|(_, present)| !**present)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Normalized reference pulled for `raw` in this run, if any.
    #[must_use]
    pub fn pulled(&self, raw: &str) -> Option<&str> {
        self.pulled.get(raw).map(String::as_str)
    }

    pub fn mark_pulled(&mut self, raw: &str, reference: &str) {
        self.pulled.insert(raw.to_owned(), reference.to_owned());
    }

    /// Add a mapping, replacing an earlier one for the same container.
    pub fn push_mapping(&mut self, mapping: UpperDirMapping) {
        match self.mappings.iter_mut().find(|m| m.container_id == mapping.container_id) {
            Some(existing) => *existing = mapping,
            None => self.mappings.push(mapping),
        }
    }

    #[must_use]
    pub fn mappings(&self) -> &[UpperDirMapping] {
        &self.mappings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(id: &str, n: u8) -> UpperDirMapping {
        UpperDirMapping {
            container_id: id.to_owned(),
            source_dir: PathBuf::from(format!("/src/{id}/{n}")),
            target_dir: PathBuf::from(format!("/dst/{id}/{n}")),
        }
    }

    #[test]
    fn reconcile_reports_deleted_containers() {
        let mut job = MigrationJob::new("/var/lib/docker", "/var/lib/pouch");
        job.record_container("a", true);
        job.record_container("b", false);
        job.record_container("c", true);

        let deleted = job.reconcile(["c", "a", "unrelated"]);
        assert_eq!(deleted, vec!["b".to_owned()]);
        assert_eq!(job.running(), ["a".to_owned(), "c".to_owned()]);

        assert!(job.reconcile(["a", "b", "c"]).is_empty());
    }

    #[test]
    fn rerecording_keeps_one_running_entry() {
        let mut job = MigrationJob::default();
        job.record_container("a", true);
        job.record_container("a", true);
        assert_eq!(job.running().len(), 1);
        assert_eq!(job.container_count(), 1);
    }

    #[test]
    fn one_mapping_per_container() {
        let mut job = MigrationJob::default();
        job.push_mapping(mapping("a", 1));
        job.push_mapping(mapping("b", 1));
        job.push_mapping(mapping("a", 2));
        assert_eq!(job.mappings().len(), 2);
        assert_eq!(job.mappings()[0], mapping("a", 2));
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::default().to_string(), "init");
        assert_eq!(Phase::PostMigrated.to_string(), "post-migrated");
    }
}
