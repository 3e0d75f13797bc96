//! Container metadata in the layout the target daemon loads from
//! `<home>/containers/<id>/meta.json`.
//!
//! Maps are `BTreeMap` so that the serialized bytes are stable for a given
//! record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status understood by the target daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Source status had no counterpart; serialized as an empty string.
    #[default]
    #[serde(rename = "")]
    Unknown,
    Created,
    Running,
    Paused,
    Stopped,
    Dead,
}

impl ContainerStatus {
    /// Map a source engine status string.
    #[must_use]
    pub fn from_source(status: &str) -> Self {
        match status {
            "running" => Self::Running,
            "exited" => Self::Stopped,
            "created" => Self::Created,
            "paused" => Self::Paused,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    pub dead: bool,
    pub error: String,
    pub exit_code: i64,
    pub finished_at: String,
    #[serde(rename = "OOMKilled")]
    pub oom_killed: bool,
    pub paused: bool,
    pub pid: i64,
    pub restarting: bool,
    pub running: bool,
    pub started_at: String,
    pub status: ContainerStatus,
}

/// Storage driver data attached to the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotterData {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountPoint {
    pub name: String,
    pub source: String,
    pub destination: String,
    pub driver: String,
    pub mode: String,
    #[serde(rename = "RW")]
    pub rw: bool,
    pub propagation: String,
    /// Backed by a named volume the target daemon manages.
    pub named: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub hostname: String,
    pub domainname: String,
    pub user: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub open_stdin: bool,
    pub stdin_once: bool,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub shell: Vec<String>,
    pub image: String,
    pub volumes: BTreeMap<String, serde_json::Value>,
    pub working_dir: String,
    pub network_disabled: bool,
    pub mac_address: String,
    pub on_build: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub stop_signal: String,
    #[serde(rename = "QuotaID", skip_serializing_if = "String::is_empty")]
    pub quota_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_annotation: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogConfig {
    pub log_driver: String,
    pub log_opts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    pub name: String,
    pub maximum_retry_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WeightDevice {
    pub path: String,
    pub weight: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ThrottleDevice {
    pub path: String,
    pub rate: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMapping {
    pub path_on_host: String,
    pub path_in_container: String,
    pub cgroup_permissions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ulimit {
    pub name: String,
    pub soft: i64,
    pub hard: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resources {
    pub cgroup_parent: String,
    pub blkio_weight: u16,
    pub blkio_weight_device: Vec<WeightDevice>,
    pub blkio_device_read_bps: Vec<ThrottleDevice>,
    pub blkio_device_write_bps: Vec<ThrottleDevice>,
    #[serde(rename = "BlkioDeviceReadIOps")]
    pub blkio_device_read_iops: Vec<ThrottleDevice>,
    #[serde(rename = "BlkioDeviceWriteIOps")]
    pub blkio_device_write_iops: Vec<ThrottleDevice>,
    #[serde(rename = "CPUCount")]
    pub cpu_count: i64,
    #[serde(rename = "CPUPercent")]
    pub cpu_percent: i64,
    #[serde(rename = "CPUPeriod")]
    pub cpu_period: i64,
    #[serde(rename = "CPUQuota")]
    pub cpu_quota: i64,
    #[serde(rename = "CPUShares")]
    pub cpu_shares: i64,
    pub cpuset_cpus: String,
    pub cpuset_mems: String,
    pub devices: Vec<DeviceMapping>,
    #[serde(rename = "IOMaximumIOps")]
    pub io_maximum_iops: u64,
    #[serde(rename = "IOMaximumBandwidth")]
    pub io_maximum_bandwidth: u64,
    pub kernel_memory: i64,
    pub memory: i64,
    pub memory_reservation: i64,
    pub memory_swap: i64,
    pub memory_swappiness: Option<i64>,
    pub oom_kill_disable: Option<bool>,
    pub pids_limit: Option<i64>,
    pub ulimits: Vec<Ulimit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    pub auto_remove: bool,
    pub binds: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub cgroup: String,
    #[serde(rename = "ContainerIDFile")]
    pub container_id_file: String,
    #[serde(rename = "DNS")]
    pub dns: Vec<String>,
    #[serde(rename = "DNSOptions")]
    pub dns_options: Vec<String>,
    #[serde(rename = "DNSSearch")]
    pub dns_search: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub group_add: Vec<String>,
    pub ipc_mode: String,
    pub isolation: String,
    pub links: Vec<String>,
    pub log_config: LogConfig,
    pub network_mode: String,
    pub oom_score_adj: i64,
    pub pid_mode: String,
    pub privileged: bool,
    pub publish_all_ports: bool,
    pub readonly_rootfs: bool,
    pub restart_policy: RestartPolicy,
    pub runtime: String,
    pub security_opt: Vec<String>,
    pub shm_size: i64,
    pub storage_opt: BTreeMap<String, String>,
    pub sysctls: BTreeMap<String, String>,
    pub tmpfs: BTreeMap<String, String>,
    #[serde(rename = "UTSMode")]
    pub uts_mode: String,
    pub volume_driver: String,
    #[serde(flatten)]
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIpamConfig {
    #[serde(rename = "IPV4Address")]
    pub ipv4_address: String,
    #[serde(rename = "IPV6Address")]
    pub ipv6_address: String,
    #[serde(rename = "LinkLocalIps")]
    pub link_local_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSettings {
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    pub gateway: String,
    #[serde(rename = "GlobalIPV6Address")]
    pub global_ipv6_address: String,
    #[serde(rename = "GlobalIPV6PrefixLen")]
    pub global_ipv6_prefix_len: i64,
    #[serde(rename = "IPAMConfig", skip_serializing_if = "Option::is_none")]
    pub ipam_config: Option<EndpointIpamConfig>,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "IPPrefixLen")]
    pub ip_prefix_len: i64,
    #[serde(rename = "IPV6Gateway")]
    pub ipv6_gateway: String,
    pub links: Vec<String>,
    pub mac_address: String,
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    pub bridge: String,
    pub hairpin_mode: bool,
    #[serde(rename = "LinkLocalIPV6Address")]
    pub link_local_ipv6_address: String,
    #[serde(rename = "LinkLocalIPV6PrefixLen")]
    pub link_local_ipv6_prefix_len: i64,
    #[serde(rename = "SandboxID")]
    pub sandbox_id: String,
    pub sandbox_key: String,
    pub networks: BTreeMap<String, EndpointSettings>,
    pub ports: BTreeMap<String, Vec<PortBinding>>,
}

/// The target daemon's persisted container record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerRecord {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_armor_profile: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ContainerConfig>,
    pub created: String,
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshotter: Option<SnapshotterData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_config: Option<HostConfig>,
    pub hostname_path: String,
    pub hosts_path: String,
    #[serde(rename = "Id")]
    pub id: String,
    pub image: String,
    pub log_path: String,
    pub mount_label: String,
    pub mounts: Vec<MountPoint>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_settings: Option<NetworkSettings>,
    pub path: String,
    pub process_label: String,
    pub resolv_conf_path: String,
    pub restart_count: i64,
    pub size_root_fs: i64,
    pub size_rw: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ContainerState>,
    #[serde(rename = "BaseFS")]
    pub base_fs: String,
    /// The rootfs was provided externally rather than built by the target daemon.
    #[serde(rename = "RootFSProvided")]
    pub rootfs_provided: bool,
}

impl ContainerRecord {
    /// Quota ID recorded on the config, empty if none.
    #[must_use]
    pub fn quota_id(&self) -> &str {
        self.config.as_ref().map_or("", |c| c.quota_id.as_str())
    }

    /// Label value from the config, if present.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.labels.get(key))
            .map(String::as_str)
    }

    /// Point the snapshotter data at the prepared upper directory.
    pub fn set_upper_dir(&mut self, upper_dir: &str) {
        let data = BTreeMap::from([("UpperDir".to_owned(), upper_dir.to_owned())]);
        match self.snapshotter.as_mut() {
            Some(snap) => snap.data = data,
            None => {
                self.snapshotter = Some(SnapshotterData { name: "overlayfs".to_owned(), data });
            }
        }
    }

    /// Serialize to the on-disk JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if a `serde_json::Value` inside the record fails to serialize.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_source_strings() {
        assert_eq!(ContainerStatus::from_source("running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from_source("exited"), ContainerStatus::Stopped);
        assert_eq!(ContainerStatus::from_source("created"), ContainerStatus::Created);
        assert_eq!(ContainerStatus::from_source("paused"), ContainerStatus::Paused);
        assert_eq!(ContainerStatus::from_source("dead"), ContainerStatus::Dead);
        assert_eq!(ContainerStatus::from_source("restarting"), ContainerStatus::Unknown);
    }

    #[test]
    fn status_serializes_lowercase_and_empty_for_unknown() {
        let json = serde_json::to_string(&ContainerStatus::Stopped).expect("serialize");
        assert_eq!(json, "\"stopped\"");
        let json = serde_json::to_string(&ContainerStatus::Unknown).expect("serialize");
        assert_eq!(json, "\"\"");
    }

    #[test]
    fn set_upper_dir_replaces_snapshotter_data() {
        let mut record = ContainerRecord {
            snapshotter: Some(SnapshotterData {
                name: "overlayfs".to_owned(),
                data: BTreeMap::from([
                    ("UpperDir".to_owned(), "/old/diff".to_owned()),
                    ("LowerDir".to_owned(), "/old/lower".to_owned()),
                ]),
            }),
            ..ContainerRecord::default()
        };
        record.set_upper_dir("/new/fs");
        let snap = record.snapshotter.expect("snapshotter");
        assert_eq!(snap.data.len(), 1);
        assert_eq!(snap.data.get("UpperDir").map(String::as_str), Some("/new/fs"));
    }

    #[test]
    fn serialized_record_is_stable() {
        let mut labels = BTreeMap::new();
        labels.insert("b".to_owned(), "2".to_owned());
        labels.insert("a".to_owned(), "1".to_owned());
        let record = ContainerRecord {
            id: "c1".to_owned(),
            config: Some(ContainerConfig { labels, ..ContainerConfig::default() }),
            ..ContainerRecord::default()
        };
        let first = record.to_json().expect("serialize");
        let second = record.clone().to_json().expect("serialize");
        assert_eq!(first, second);
        let text = String::from_utf8(first).expect("utf8");
        assert!(text.contains("\"Id\":\"c1\""));
        assert!(text.find("\"a\"") < text.find("\"b\""));
    }
}
