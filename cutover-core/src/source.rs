//! Wire types of the source engine's HTTP API (`/v1.24`).
//!
//! Only the fields the migration reads are modelled. Every struct is lenient:
//! absent keys and JSON `null` both decode to the field's default.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

/// Decode `null` as `T::default()`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a command that older engines send either as a string or as a list.
fn str_slice<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrSlice {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<StrSlice>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StrSlice::One(s)) => vec![s],
        Some(StrSlice::Many(v)) => v,
    })
}

/// One entry of `GET /containers/json?all=1`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", deserialize_with = "nullable")]
    pub names: Vec<String>,
    #[serde(rename = "Image")]
    pub image: String,
    /// Coarse state string (`running`, `exited`, ...).
    #[serde(rename = "State")]
    pub state: String,
}

/// `GET /info`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineInfo {
    /// Storage driver name, e.g. `overlay2`.
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "DockerRootDir")]
    pub root_dir: String,
}

/// `GET /images/{ref}/json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageDetail {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "RepoTags", deserialize_with = "nullable")]
    pub repo_tags: Vec<String>,
    #[serde(rename = "RepoDigests", deserialize_with = "nullable")]
    pub repo_digests: Vec<String>,
}

impl ImageDetail {
    /// The name the image should be pulled by: first tag, else first digest.
    #[must_use]
    pub fn pull_name(&self) -> Option<&str> {
        self.repo_tags
            .first()
            .or_else(|| self.repo_digests.first())
            .map(String::as_str)
    }
}

/// A named volume as listed by `GET /volumes` or `GET /volumes/{name}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Volume {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
    #[serde(rename = "Labels", deserialize_with = "nullable")]
    pub labels: BTreeMap<String, String>,
    /// Driver specific status; some drivers only report a size here on inspect.
    #[serde(rename = "Status", deserialize_with = "nullable")]
    pub status: BTreeMap<String, serde_json::Value>,
}

impl Volume {
    /// Size reported in the driver status, if any.
    #[must_use]
    pub fn status_size(&self) -> Option<String> {
        ["size", "opt.size", "Size", "opt.Size"]
            .iter()
            .find_map(|key| self.status.get(*key))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

/// `GET /volumes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VolumeList {
    #[serde(rename = "Volumes", deserialize_with = "nullable")]
    pub volumes: Vec<Volume>,
}

/// `GET /containers/{id}/json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerDetail {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: String,
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Args", deserialize_with = "nullable")]
    pub args: Vec<String>,
    #[serde(rename = "State")]
    pub state: SourceState,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "ResolvConfPath")]
    pub resolv_conf_path: String,
    #[serde(rename = "HostnamePath")]
    pub hostname_path: String,
    #[serde(rename = "HostsPath")]
    pub hosts_path: String,
    #[serde(rename = "LogPath")]
    pub log_path: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "RestartCount")]
    pub restart_count: i64,
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "MountLabel")]
    pub mount_label: String,
    #[serde(rename = "ProcessLabel")]
    pub process_label: String,
    #[serde(rename = "AppArmorProfile")]
    pub app_armor_profile: String,
    #[serde(rename = "HostConfig")]
    pub host_config: Option<SourceHostConfig>,
    #[serde(rename = "GraphDriver")]
    pub graph_driver: SourceGraphDriver,
    #[serde(rename = "SizeRw")]
    pub size_rw: Option<i64>,
    #[serde(rename = "SizeRootFs")]
    pub size_root_fs: Option<i64>,
    #[serde(rename = "Mounts", deserialize_with = "nullable")]
    pub mounts: Vec<SourceMount>,
    #[serde(rename = "Config")]
    pub config: Option<SourceConfig>,
    #[serde(rename = "NetworkSettings")]
    pub network_settings: Option<SourceNetworkSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceState {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Running")]
    pub running: bool,
    #[serde(rename = "Paused")]
    pub paused: bool,
    #[serde(rename = "Restarting")]
    pub restarting: bool,
    #[serde(rename = "OOMKilled")]
    pub oom_killed: bool,
    #[serde(rename = "Dead")]
    pub dead: bool,
    #[serde(rename = "Pid")]
    pub pid: i64,
    #[serde(rename = "ExitCode")]
    pub exit_code: i64,
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "StartedAt")]
    pub started_at: String,
    #[serde(rename = "FinishedAt")]
    pub finished_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceGraphDriver {
    #[serde(rename = "Name")]
    pub name: String,
    /// `LowerDir`, `MergedDir`, `UpperDir`, `WorkDir` for overlay drivers.
    #[serde(rename = "Data", deserialize_with = "nullable")]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceMount {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "Mode")]
    pub mode: String,
    #[serde(rename = "RW")]
    pub rw: bool,
    #[serde(rename = "Propagation")]
    pub propagation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Domainname")]
    pub domainname: String,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "AttachStdin")]
    pub attach_stdin: bool,
    #[serde(rename = "AttachStdout")]
    pub attach_stdout: bool,
    #[serde(rename = "AttachStderr")]
    pub attach_stderr: bool,
    #[serde(rename = "Tty")]
    pub tty: bool,
    #[serde(rename = "OpenStdin")]
    pub open_stdin: bool,
    #[serde(rename = "StdinOnce")]
    pub stdin_once: bool,
    #[serde(rename = "Env", deserialize_with = "nullable")]
    pub env: Vec<String>,
    #[serde(rename = "Cmd", deserialize_with = "str_slice")]
    pub cmd: Vec<String>,
    #[serde(rename = "Entrypoint", deserialize_with = "str_slice")]
    pub entrypoint: Vec<String>,
    #[serde(rename = "Shell", deserialize_with = "str_slice")]
    pub shell: Vec<String>,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Volumes", deserialize_with = "nullable")]
    pub volumes: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "WorkingDir")]
    pub working_dir: String,
    #[serde(rename = "NetworkDisabled")]
    pub network_disabled: bool,
    #[serde(rename = "MacAddress")]
    pub mac_address: String,
    #[serde(rename = "OnBuild", deserialize_with = "nullable")]
    pub on_build: Vec<String>,
    #[serde(rename = "Labels", deserialize_with = "nullable")]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "StopSignal")]
    pub stop_signal: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceLogConfig {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Config", deserialize_with = "nullable")]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceRestartPolicy {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MaximumRetryCount")]
    pub maximum_retry_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceWeightDevice {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Weight")]
    pub weight: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceThrottleDevice {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Rate")]
    pub rate: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceDeviceMapping {
    #[serde(rename = "PathOnHost")]
    pub path_on_host: String,
    #[serde(rename = "PathInContainer")]
    pub path_in_container: String,
    #[serde(rename = "CgroupPermissions")]
    pub cgroup_permissions: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceUlimit {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Soft")]
    pub soft: i64,
    #[serde(rename = "Hard")]
    pub hard: i64,
}

/// Resource limits; flattened into `HostConfig` on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceResources {
    #[serde(rename = "CgroupParent")]
    pub cgroup_parent: String,
    #[serde(rename = "BlkioWeight")]
    pub blkio_weight: u16,
    #[serde(rename = "BlkioWeightDevice", deserialize_with = "nullable")]
    pub blkio_weight_device: Vec<SourceWeightDevice>,
    #[serde(rename = "BlkioDeviceReadBps", deserialize_with = "nullable")]
    pub blkio_device_read_bps: Vec<SourceThrottleDevice>,
    #[serde(rename = "BlkioDeviceWriteBps", deserialize_with = "nullable")]
    pub blkio_device_write_bps: Vec<SourceThrottleDevice>,
    #[serde(rename = "BlkioDeviceReadIOps", deserialize_with = "nullable")]
    pub blkio_device_read_iops: Vec<SourceThrottleDevice>,
    #[serde(rename = "BlkioDeviceWriteIOps", deserialize_with = "nullable")]
    pub blkio_device_write_iops: Vec<SourceThrottleDevice>,
    #[serde(rename = "CpuCount")]
    pub cpu_count: i64,
    #[serde(rename = "CpuPercent")]
    pub cpu_percent: i64,
    #[serde(rename = "CpuPeriod")]
    pub cpu_period: i64,
    #[serde(rename = "CpuQuota")]
    pub cpu_quota: i64,
    #[serde(rename = "CpuShares")]
    pub cpu_shares: i64,
    #[serde(rename = "CpusetCpus")]
    pub cpuset_cpus: String,
    #[serde(rename = "CpusetMems")]
    pub cpuset_mems: String,
    #[serde(rename = "Devices", deserialize_with = "nullable")]
    pub devices: Vec<SourceDeviceMapping>,
    #[serde(rename = "IOMaximumIOps")]
    pub io_maximum_iops: u64,
    #[serde(rename = "IOMaximumBandwidth")]
    pub io_maximum_bandwidth: u64,
    #[serde(rename = "KernelMemory")]
    pub kernel_memory: i64,
    #[serde(rename = "Memory")]
    pub memory: i64,
    #[serde(rename = "MemoryReservation")]
    pub memory_reservation: i64,
    #[serde(rename = "MemorySwap")]
    pub memory_swap: i64,
    #[serde(rename = "MemorySwappiness")]
    pub memory_swappiness: Option<i64>,
    #[serde(rename = "OomKillDisable")]
    pub oom_kill_disable: Option<bool>,
    #[serde(rename = "PidsLimit")]
    pub pids_limit: Option<i64>,
    #[serde(rename = "Ulimits", deserialize_with = "nullable")]
    pub ulimits: Vec<SourceUlimit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceHostConfig {
    #[serde(rename = "Binds", deserialize_with = "nullable")]
    pub binds: Vec<String>,
    #[serde(rename = "ContainerIDFile")]
    pub container_id_file: String,
    #[serde(rename = "LogConfig")]
    pub log_config: SourceLogConfig,
    #[serde(rename = "NetworkMode")]
    pub network_mode: String,
    #[serde(rename = "RestartPolicy")]
    pub restart_policy: SourceRestartPolicy,
    #[serde(rename = "AutoRemove")]
    pub auto_remove: bool,
    #[serde(rename = "VolumeDriver")]
    pub volume_driver: String,
    #[serde(rename = "CapAdd", deserialize_with = "nullable")]
    pub cap_add: Vec<String>,
    #[serde(rename = "CapDrop", deserialize_with = "nullable")]
    pub cap_drop: Vec<String>,
    #[serde(rename = "Dns", deserialize_with = "nullable")]
    pub dns: Vec<String>,
    #[serde(rename = "DnsOptions", deserialize_with = "nullable")]
    pub dns_options: Vec<String>,
    #[serde(rename = "DnsSearch", deserialize_with = "nullable")]
    pub dns_search: Vec<String>,
    #[serde(rename = "ExtraHosts", deserialize_with = "nullable")]
    pub extra_hosts: Vec<String>,
    #[serde(rename = "GroupAdd", deserialize_with = "nullable")]
    pub group_add: Vec<String>,
    #[serde(rename = "IpcMode")]
    pub ipc_mode: String,
    #[serde(rename = "Cgroup")]
    pub cgroup: String,
    #[serde(rename = "Links", deserialize_with = "nullable")]
    pub links: Vec<String>,
    #[serde(rename = "OomScoreAdj")]
    pub oom_score_adj: i64,
    #[serde(rename = "PidMode")]
    pub pid_mode: String,
    #[serde(rename = "Privileged")]
    pub privileged: bool,
    #[serde(rename = "PublishAllPorts")]
    pub publish_all_ports: bool,
    #[serde(rename = "ReadonlyRootfs")]
    pub readonly_rootfs: bool,
    #[serde(rename = "SecurityOpt", deserialize_with = "nullable")]
    pub security_opt: Vec<String>,
    #[serde(rename = "StorageOpt", deserialize_with = "nullable")]
    pub storage_opt: BTreeMap<String, String>,
    #[serde(rename = "Tmpfs", deserialize_with = "nullable")]
    pub tmpfs: BTreeMap<String, String>,
    #[serde(rename = "UTSMode")]
    pub uts_mode: String,
    #[serde(rename = "ShmSize")]
    pub shm_size: i64,
    #[serde(rename = "Sysctls", deserialize_with = "nullable")]
    pub sysctls: BTreeMap<String, String>,
    #[serde(rename = "Isolation")]
    pub isolation: String,
    #[serde(flatten)]
    pub resources: SourceResources,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcePortBinding {
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceIpamConfig {
    #[serde(rename = "IPv4Address")]
    pub ipv4_address: String,
    #[serde(rename = "IPv6Address")]
    pub ipv6_address: String,
    #[serde(rename = "LinkLocalIPs", deserialize_with = "nullable")]
    pub link_local_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceEndpoint {
    #[serde(rename = "IPAMConfig")]
    pub ipam_config: Option<SourceIpamConfig>,
    #[serde(rename = "Links", deserialize_with = "nullable")]
    pub links: Vec<String>,
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "Gateway")]
    pub gateway: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "IPPrefixLen")]
    pub ip_prefix_len: i64,
    #[serde(rename = "IPv6Gateway")]
    pub ipv6_gateway: String,
    #[serde(rename = "GlobalIPv6Address")]
    pub global_ipv6_address: String,
    #[serde(rename = "GlobalIPv6PrefixLen")]
    pub global_ipv6_prefix_len: i64,
    #[serde(rename = "MacAddress")]
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceNetworkSettings {
    #[serde(rename = "Bridge")]
    pub bridge: String,
    #[serde(rename = "SandboxID")]
    pub sandbox_id: String,
    #[serde(rename = "SandboxKey")]
    pub sandbox_key: String,
    #[serde(rename = "HairpinMode")]
    pub hairpin_mode: bool,
    #[serde(rename = "LinkLocalIPv6Address")]
    pub link_local_ipv6_address: String,
    #[serde(rename = "LinkLocalIPv6PrefixLen")]
    pub link_local_ipv6_prefix_len: i64,
    /// Port map; a `null` value means "exposed but not published".
    #[serde(rename = "Ports", deserialize_with = "nullable")]
    pub ports: BTreeMap<String, Option<Vec<SourcePortBinding>>>,
    #[serde(rename = "Networks", deserialize_with = "nullable")]
    pub networks: BTreeMap<String, SourceEndpoint>,
}
