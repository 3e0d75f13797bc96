//! Snapshot and quota preparation for one container.
//!
//! Preparation pulls the container's image into the content daemon, creates
//! a fresh snapshot keyed by the container ID, reads the snapshot's overlay
//! directories and applies the container's disk quota to them. Nothing here
//! touches the source engine's data, so any failure can simply abort the run.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use cutover_core::quota::DISK_QUOTA_LABEL;
use cutover_core::{chain_id, ContainerRecord, ImageRef, QuotaSpec};

use crate::backend::{ContentStore, QuotaDriver, SourceRuntime, SnapshotMount};
use crate::config::{MigratorConfig, PullPolicy};
use crate::job::{MigrationJob, UpperDirMapping};
use crate::MigrateError;

/// Upper and work directories of an active overlay snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayDirs {
    pub upper: PathBuf,
    pub work: PathBuf,
}

impl OverlayDirs {
    /// Read `upperdir=` and `workdir=` out of the snapshot's single mount.
    ///
    /// # Errors
    /// Returns [`MigrateError::Snapshot`] unless there is exactly one mount
    /// carrying both options.
    pub fn from_mounts(id: &str, mounts: &[SnapshotMount]) -> Result<Self, MigrateError> {
        let [mount] = mounts else {
            return Err(MigrateError::Snapshot {
                id: id.to_owned(),
                reason: format!("expected exactly one mount, got {}", mounts.len()),
            });
        };

        let option = |key: &str| {
            mount
                .options
                .iter()
                .find_map(|o| o.strip_prefix(key))
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        match (option("upperdir="), option("workdir=")) {
            (Some(upper), Some(work)) => Ok(Self { upper, work }),
            (upper, work) => Err(MigrateError::Snapshot {
                id: id.to_owned(),
                reason: format!("mount options lack overlay dirs: upperdir={upper:?}, workdir={work:?}"),
            }),
        }
    }
}

/// Runs the preparation steps against the content daemon and quota driver.
pub struct Preparer<'a> {
    content: &'a dyn ContentStore,
    quota: &'a dyn QuotaDriver,
    config: &'a MigratorConfig,
}

impl<'a> Preparer<'a> {
    #[must_use]
    pub fn new(content: &'a dyn ContentStore, quota: &'a dyn QuotaDriver, config: &'a MigratorConfig) -> Self {
        Self { content, quota, config }
    }

    fn normalize(&self, image: &str) -> Result<ImageRef, MigrateError> {
        Ok(ImageRef::normalize_with(image, &self.config.default_registry, &self.config.default_namespace)?)
    }

    fn policy_for(&self, raw: &str, reference: &ImageRef) -> PullPolicy {
        match self.config.pull_policy_for(raw) {
            PullPolicy::Full => PullPolicy::Full,
            PullPolicy::ManifestOnly => self.config.pull_policy_for(reference.as_str()),
        }
    }

    /// Prepare `record`: pull, snapshot, quota. Points the record at the new
    /// upper directory and adds its mapping to `job`.
    ///
    /// Running it again for the same container replaces the snapshot and the
    /// mapping.
    ///
    /// # Errors
    /// Any failing step aborts preparation of the container.
    pub async fn prepare(
        &self,
        job: &mut MigrationJob,
        record: &mut ContainerRecord,
    ) -> Result<UpperDirMapping, MigrateError> {
        let id = record.id.clone();
        let quota = QuotaSpec::resolve(record.quota_id(), record.label(DISK_QUOTA_LABEL).unwrap_or_default())?;
        let raw_image = record.config.as_ref().map(|c| c.image.clone()).unwrap_or_default();

        let reference = self.ensure_image(job, &raw_image).await?;
        let dirs = self.replace_snapshot(&id, &reference).await?;

        if let Some(spec) = quota {
            for dir in [&dirs.upper, &dirs.work] {
                self.apply_quota(dir, spec).await?;
            }
            tracing::info!(container = %id, project = spec.project_id, "disk quota applied");
        }

        let source_dir = record
            .snapshotter
            .as_ref()
            .and_then(|s| s.data.get("UpperDir"))
            .map(PathBuf::from)
            .unwrap_or_default();
        record.set_upper_dir(&dirs.upper.to_string_lossy());

        let mapping = UpperDirMapping {
            container_id: id,
            source_dir,
            target_dir: dirs.upper,
        };
        job.push_mapping(mapping.clone());
        Ok(mapping)
    }

    /// Pull `raw` unless this run already did; returns the normalized reference.
    async fn ensure_image(&self, job: &mut MigrationJob, raw: &str) -> Result<String, MigrateError> {
        if let Some(reference) = job.pulled(raw) {
            tracing::info!(image = %raw, "image already pulled, skipping");
            return Ok(reference.to_owned());
        }

        let reference = self.normalize(raw)?;
        let policy = self.policy_for(raw, &reference);
        tracing::info!(image = %reference, ?policy, "pulling image");
        self.content.pull(reference.as_str(), policy).await?;
        tracing::info!(image = %reference, "image pulled");

        job.mark_pulled(raw, reference.as_str());
        Ok(reference.to_string())
    }

    /// Drop any snapshot left by an earlier attempt and create a fresh one.
    async fn replace_snapshot(&self, id: &str, reference: &str) -> Result<OverlayDirs, MigrateError> {
        match self.content.get_snapshot(id).await {
            Ok(()) => {
                tracing::info!(container = %id, "snapshot already exists, removing it");
                self.content.remove_snapshot(id).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let image = self.content.get_image(reference).await?;
        let parent = chain_id(reference, &image.diff_ids)?;
        self.content.create_snapshot(id, &parent).await?;
        tracing::info!(container = %id, %parent, "snapshot created");

        let mounts = self.content.mounts(id).await?;
        OverlayDirs::from_mounts(id, &mounts)
    }

    /// Bind `dir` to the quota project, limit it and tag what is already there.
    async fn apply_quota(&self, dir: &Path, spec: QuotaSpec) -> Result<(), MigrateError> {
        self.quota.start(dir).await?;
        self.quota.set_subtree(dir, spec.project_id).await?;
        self.quota.set_limit(dir, spec.limit_kib(), spec.project_id).await?;

        let entries = WalkDir::new(dir)
            .into_iter()
            .map(|entry| entry.map(walkdir::DirEntry::into_path))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MigrateError::Quota { dir: dir.to_path_buf(), reason: format!("walk: {e}") })?;
        for path in entries {
            if let Err(e) = self.quota.set_file_attr(&path, spec.project_id).await {
                tracing::debug!(path = %path.display(), "quota attribute not set: {e}");
            }
        }
        Ok(())
    }

    /// Pull the image of every source container that the content daemon does
    /// not have yet. Failures are logged per container and skipped.
    ///
    /// # Errors
    /// Only listing the source containers can fail.
    pub async fn prepare_images(&self, source: &dyn SourceRuntime) -> Result<usize, MigrateError> {
        let containers = source.list_containers().await?;
        let mut pulled = 0usize;
        for container in &containers {
            match self.pull_container_image(source, &container.image).await {
                Ok(true) => pulled += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(container = %container.id, image = %container.image, "image not prepared: {e}"),
            }
        }
        tracing::info!(containers = containers.len(), pulled, "image preparation finished");
        Ok(pulled)
    }

    async fn pull_container_image(&self, source: &dyn SourceRuntime, image: &str) -> Result<bool, MigrateError> {
        let detail = source.inspect_image(image).await?;
        let Some(name) = detail.pull_name() else {
            return Err(MigrateError::Content(format!("image {image} has neither tag nor digest")));
        };
        let reference = self.normalize(name)?;
        if self.content.get_image(reference.as_str()).await.is_ok() {
            tracing::debug!(image = %reference, "image already present");
            return Ok(false);
        }
        self.content.pull(reference.as_str(), self.policy_for(name, &reference)).await?;
        tracing::info!(image = %reference, "image pulled");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use cutover_core::record::{ContainerConfig, SnapshotterData};
    use cutover_core::{ContainerDetail, ContainerSummary, EngineInfo, ImageDetail, Volume};

    use super::*;
    use crate::backend::ImageInfo;

    #[derive(Default)]
    struct ContentState {
        snapshots: BTreeSet<String>,
        removed: Vec<String>,
        pulls: Vec<(String, PullPolicy)>,
        images: BTreeSet<String>,
    }

    struct FakeContent {
        root: PathBuf,
        extra_mount: bool,
        state: Mutex<ContentState>,
    }

    impl FakeContent {
        fn new(root: &Path) -> Self {
            Self { root: root.to_path_buf(), extra_mount: false, state: Mutex::new(ContentState::default()) }
        }

        fn state(&self) -> std::sync::MutexGuard<'_, ContentState> {
            self.state.lock().expect("state")
        }
    }

    #[async_trait]
    impl ContentStore for FakeContent {
        async fn pull(&self, reference: &str, policy: PullPolicy) -> Result<(), MigrateError> {
            let mut state = self.state();
            state.pulls.push((reference.to_owned(), policy));
            state.images.insert(reference.to_owned());
            Ok(())
        }

        async fn get_image(&self, reference: &str) -> Result<ImageInfo, MigrateError> {
            if !self.state().images.contains(reference) {
                return Err(MigrateError::Content(format!("image {reference} not found")));
            }
            Ok(ImageInfo { name: reference.to_owned(), diff_ids: vec!["sha256:l1".to_owned()] })
        }

        async fn create_snapshot(&self, key: &str, parent: &str) -> Result<(), MigrateError> {
            assert_eq!(parent, "sha256:l1");
            std::fs::create_dir_all(self.root.join(key).join("fs")).expect("mkdir");
            std::fs::create_dir_all(self.root.join(key).join("work")).expect("mkdir");
            self.state().snapshots.insert(key.to_owned());
            Ok(())
        }

        async fn get_snapshot(&self, key: &str) -> Result<(), MigrateError> {
            if self.state().snapshots.contains(key) {
                Ok(())
            } else {
                Err(MigrateError::Content(format!("snapshot {key}: not found")))
            }
        }

        async fn remove_snapshot(&self, key: &str) -> Result<(), MigrateError> {
            let mut state = self.state();
            state.snapshots.remove(key);
            state.removed.push(key.to_owned());
            Ok(())
        }

        async fn mounts(&self, key: &str) -> Result<Vec<SnapshotMount>, MigrateError> {
            let dir = self.root.join(key);
            let mount = SnapshotMount {
                kind: "overlay".to_owned(),
                source: "overlay".to_owned(),
                options: vec![
                    format!("workdir={}", dir.join("work").display()),
                    format!("upperdir={}", dir.join("fs").display()),
                    "lowerdir=/l".to_owned(),
                ],
            };
            let count = if self.extra_mount { 2 } else { 1 };
            Ok(vec![mount; count])
        }

        async fn create_container(&self, _id: &str, _rootfs: &Path) -> Result<(), MigrateError> {
            Ok(())
        }

        async fn get_container(&self, id: &str) -> Result<(), MigrateError> {
            Err(MigrateError::Content(format!("container {id}: not found")))
        }

        async fn delete_container(&self, _id: &str) -> Result<(), MigrateError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeQuota {
        calls: Mutex<Vec<String>>,
        tagged: Mutex<BTreeMap<PathBuf, u32>>,
    }

    #[async_trait]
    impl QuotaDriver for FakeQuota {
        async fn start(&self, dir: &Path) -> Result<(), MigrateError> {
            self.calls.lock().expect("calls").push(format!("start {}", dir.display()));
            Ok(())
        }

        async fn set_subtree(&self, dir: &Path, id: u32) -> Result<(), MigrateError> {
            self.calls.lock().expect("calls").push(format!("subtree {} {id}", dir.display()));
            Ok(())
        }

        async fn set_limit(&self, dir: &Path, limit_kib: u64, id: u32) -> Result<(), MigrateError> {
            self.calls.lock().expect("calls").push(format!("limit {} {limit_kib} {id}", dir.display()));
            Ok(())
        }

        async fn set_file_attr(&self, path: &Path, id: u32) -> Result<(), MigrateError> {
            self.tagged.lock().expect("tagged").insert(path.to_path_buf(), id);
            Ok(())
        }
    }

    fn record(id: &str, image: &str, labels: &[(&str, &str)]) -> ContainerRecord {
        let labels: BTreeMap<String, String> =
            labels.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        let quota_id = labels.get("QuotaId").cloned().unwrap_or_default();
        ContainerRecord {
            id: id.to_owned(),
            config: Some(ContainerConfig { image: image.to_owned(), labels, quota_id, ..ContainerConfig::default() }),
            snapshotter: Some(SnapshotterData {
                name: "overlayfs".to_owned(),
                data: BTreeMap::from([("UpperDir".to_owned(), format!("/var/lib/docker/overlay2/{id}/diff"))]),
            }),
            ..ContainerRecord::default()
        }
    }

    #[tokio::test]
    async fn prepare_twice_keeps_one_snapshot_and_mapping() {
        let root = tempfile::tempdir().expect("tempdir");
        let content = FakeContent::new(root.path());
        let quota = FakeQuota::default();
        let config = MigratorConfig::default();
        let preparer = Preparer::new(&content, &quota, &config);
        let mut job = MigrationJob::default();

        let mut rec = record("c1", "nginx:1.25", &[]);
        let first = preparer.prepare(&mut job, &mut rec).await.expect("first prepare");
        let mut rec = record("c1", "nginx:1.25", &[]);
        let second = preparer.prepare(&mut job, &mut rec).await.expect("second prepare");

        assert_eq!(first, second);
        assert_eq!(job.mappings().len(), 1);
        assert_eq!(job.mappings()[0].source_dir, PathBuf::from("/var/lib/docker/overlay2/c1/diff"));
        assert_eq!(job.mappings()[0].target_dir, root.path().join("c1/fs"));

        let state = content.state();
        assert_eq!(state.snapshots.len(), 1);
        assert_eq!(state.removed, vec!["c1".to_owned()]);
        assert_eq!(state.pulls.len(), 1, "second prepare must reuse the pulled image");
        assert_eq!(state.pulls[0].0, "registry.hub.docker.com/library/nginx:1.25");

        let upper = rec.snapshotter.as_ref().and_then(|s| s.data.get("UpperDir")).cloned();
        assert_eq!(upper, Some(root.path().join("c1/fs").display().to_string()));
    }

    #[tokio::test]
    async fn quota_is_applied_to_upper_and_work_dirs() {
        let root = tempfile::tempdir().expect("tempdir");
        let content = FakeContent::new(root.path());
        let quota = FakeQuota::default();
        let config = MigratorConfig::default();
        let preparer = Preparer::new(&content, &quota, &config);
        let mut job = MigrationJob::default();

        let mut rec = record("q1", "busybox", &[("QuotaId", "16777216"), ("DiskQuota", "10g")]);
        preparer.prepare(&mut job, &mut rec).await.expect("prepare");

        let calls = quota.calls.lock().expect("calls").clone();
        assert_eq!(calls.len(), 6);
        let upper = root.path().join("q1/fs");
        assert_eq!(calls[2], format!("limit {} {} 16777216", upper.display(), 10 * 1024 * 1024));
        let tagged = quota.tagged.lock().expect("tagged");
        assert_eq!(tagged.get(&upper), Some(&16_777_216));
        assert!(tagged.contains_key(&root.path().join("q1/work")));
    }

    #[tokio::test]
    async fn quota_id_without_size_fails_before_pulling() {
        let root = tempfile::tempdir().expect("tempdir");
        let content = FakeContent::new(root.path());
        let quota = FakeQuota::default();
        let config = MigratorConfig::default();
        let preparer = Preparer::new(&content, &quota, &config);
        let mut job = MigrationJob::default();

        let mut rec = record("q2", "busybox", &[("QuotaId", "7")]);
        let result = preparer.prepare(&mut job, &mut rec).await;
        assert!(matches!(result, Err(MigrateError::Core(_))));
        assert!(content.state().pulls.is_empty());
        assert!(job.mappings().is_empty());
    }

    #[tokio::test]
    async fn more_than_one_mount_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut content = FakeContent::new(root.path());
        content.extra_mount = true;
        let quota = FakeQuota::default();
        let config = MigratorConfig::default();
        let preparer = Preparer::new(&content, &quota, &config);
        let mut job = MigrationJob::default();

        let mut rec = record("m1", "busybox", &[]);
        let result = preparer.prepare(&mut job, &mut rec).await;
        assert!(matches!(result, Err(MigrateError::Snapshot { .. })));
    }

    #[tokio::test]
    async fn repull_override_forces_full_pull() {
        let root = tempfile::tempdir().expect("tempdir");
        let content = FakeContent::new(root.path());
        let quota = FakeQuota::default();
        let mut config = MigratorConfig::default();
        config.pull_policy = PullPolicy::ManifestOnly;
        config.repull_images.insert("registry.hub.docker.com/library/redis:7".to_owned());
        let preparer = Preparer::new(&content, &quota, &config);
        let mut job = MigrationJob::default();

        preparer.prepare(&mut job, &mut record("r1", "redis:7", &[])).await.expect("prepare");
        preparer.prepare(&mut job, &mut record("r2", "busybox", &[])).await.expect("prepare");

        let pulls = content.state().pulls.clone();
        assert_eq!(pulls[0].1, PullPolicy::Full);
        assert_eq!(pulls[1].1, PullPolicy::ManifestOnly);
    }

    #[test]
    fn overlay_dirs_need_both_options() {
        let mount = SnapshotMount { options: vec!["upperdir=/u".to_owned()], ..SnapshotMount::default() };
        assert!(OverlayDirs::from_mounts("x", &[mount]).is_err());
        assert!(OverlayDirs::from_mounts("x", &[]).is_err());

        let mount = SnapshotMount {
            options: vec!["upperdir=/u".to_owned(), "workdir=/w".to_owned()],
            ..SnapshotMount::default()
        };
        let dirs = OverlayDirs::from_mounts("x", &[mount]).expect("dirs");
        assert_eq!(dirs, OverlayDirs { upper: PathBuf::from("/u"), work: PathBuf::from("/w") });
    }

    struct ImageSource;

    #[async_trait]
    impl SourceRuntime for ImageSource {
        async fn info(&self) -> Result<EngineInfo, MigrateError> {
            Ok(EngineInfo::default())
        }

        async fn list_containers(&self) -> Result<Vec<ContainerSummary>, MigrateError> {
            Ok(["sha256:tagged", "sha256:digest", "sha256:broken", "sha256:tagged"]
                .iter()
                .enumerate()
                .map(|(i, image)| ContainerSummary { id: format!("c{i}"), image: (*image).to_owned(), ..ContainerSummary::default() })
                .collect())
        }

        async fn inspect(&self, id: &str) -> Result<ContainerDetail, MigrateError> {
            Err(MigrateError::Precondition(format!("unexpected inspect {id}")))
        }

        async fn inspect_image(&self, reference: &str) -> Result<ImageDetail, MigrateError> {
            match reference {
                "sha256:tagged" => Ok(ImageDetail { repo_tags: vec!["app:v1".to_owned()], ..ImageDetail::default() }),
                "sha256:digest" => Ok(ImageDetail {
                    repo_digests: vec!["reg.example.com/base@sha256:abc".to_owned()],
                    ..ImageDetail::default()
                }),
                _ => Err(MigrateError::Api { request: "inspect image".to_owned(), status: Some(404), message: "no such image".to_owned() }),
            }
        }

        async fn list_volumes(&self) -> Result<Vec<Volume>, MigrateError> {
            Ok(Vec::new())
        }

        async fn inspect_volume(&self, name: &str) -> Result<Volume, MigrateError> {
            Err(MigrateError::Precondition(format!("unexpected volume {name}")))
        }

        async fn stop(&self, _id: &str, _timeout: Duration) -> Result<(), MigrateError> {
            Ok(())
        }

        async fn start(&self, _id: &str) -> Result<(), MigrateError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn image_only_mode_skips_present_and_broken_images() {
        let root = tempfile::tempdir().expect("tempdir");
        let content = FakeContent::new(root.path());
        let quota = FakeQuota::default();
        let config = MigratorConfig::default();
        let preparer = Preparer::new(&content, &quota, &config);

        let pulled = preparer.prepare_images(&ImageSource).await.expect("prepare images");
        assert_eq!(pulled, 2);
        let pulls: Vec<String> = content.state().pulls.iter().map(|(r, _)| r.clone()).collect();
        assert_eq!(pulls, vec!["registry.hub.docker.com/library/app:v1", "reg.example.com/base@sha256:abc"]);
    }
}
