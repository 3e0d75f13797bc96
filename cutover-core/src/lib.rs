//! Core types for the cutover runtime migrator.
//!
//! Decodes the source engine's container, image and volume documents,
//! translates containers into the target daemon's on-disk record, and derives
//! the auxiliary records (pod sandboxes, named volumes, quotas, image chain IDs)
//! the migration writes next to them. Nothing in this crate touches a socket.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod image;
pub mod quota;
pub mod record;
pub mod sandbox;
pub mod source;
pub mod translate;
pub mod volume;

pub use error::CoreError;
pub use image::{chain_id, ImageRef};
pub use quota::{parse_size, QuotaSpec};
pub use record::{ContainerRecord, ContainerStatus};
pub use sandbox::{is_sandbox_name, PodSandboxMetadata, SandboxRecord};
pub use source::{ContainerDetail, ContainerSummary, EngineInfo, ImageDetail, Volume};
pub use translate::{translate, translate_json};
pub use volume::{VolumeRecord, VolumeRefs};

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"{
        "Id": "4f1c",
        "Created": "2024-05-01T12:00:00.5+08:00",
        "Name": "/k8s_POD_api_prod_7d1e_1",
        "Image": "sha256:deadbeef",
        "ResolvConfPath": "",
        "LogPath": "/var/lib/docker/containers/4f1c/4f1c-json.log",
        "State": {"Status": "exited", "Pid": 0, "StartedAt": "2024-05-01T12:00:01Z"},
        "GraphDriver": {"Name": "overlay2", "Data": {
            "MergedDir": "/var/lib/docker/overlay2/l1/merged",
            "UpperDir": "/var/lib/docker/overlay2/l1/diff",
            "WorkDir": "/var/lib/docker/overlay2/l1/work"
        }},
        "Mounts": [{"Name": "logs", "Driver": "local", "Destination": "/logs", "RW": true}],
        "Config": {"Image": "api:v2", "Labels": {"QuotaId": "5"}, "Env": ["A=1"]},
        "HostConfig": {"CapAdd": ["SYS_ADMIN"], "LogConfig": {"Type": "", "Config": {}}},
        "NetworkSettings": {"Networks": {"bridge": {"IPAddress": "172.17.0.9"}}}
    }"#;

    #[test]
    fn inspect_document_translates_end_to_end() {
        let record = match translate_json(INSPECT.as_bytes()) {
            Ok(r) => r,
            Err(e) => panic!("translate failed: {e}"),
        };
        assert_eq!(record.name, "k8s_POD_api_prod_7d1e_1");
        assert_eq!(record.created, "2024-05-01T04:00:00.500Z");
        assert_eq!(record.quota_id(), "5");
        assert_eq!(record.state.as_ref().map(|s| s.status), Some(ContainerStatus::Stopped));

        let sandbox = match SandboxRecord::from_container(&record) {
            Ok(s) => s,
            Err(e) => panic!("sandbox failed: {e}"),
        };
        assert_eq!(sandbox.config.metadata.attempt, 1);
        assert!(sandbox.net_ns.is_empty());

        let mut refs = VolumeRefs::new();
        refs.count(&record);
        assert_eq!(refs.get("logs"), Some("4f1c"));
    }

    #[test]
    fn name_without_leading_slash_is_unchanged() {
        let raw = INSPECT.replace("/k8s_POD_api_prod_7d1e_1", "plain");
        let record = translate_json(raw.as_bytes()).expect("translate");
        assert_eq!(record.name, "plain");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(translate_json(b"[1,2"), Err(CoreError::MalformedContainer(_))));
    }
}
