//! Source container document to target [`ContainerRecord`].

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::CoreError;
use crate::record::{
    ContainerConfig, ContainerRecord, ContainerState, ContainerStatus, DeviceMapping,
    EndpointIpamConfig, EndpointSettings, HostConfig, LogConfig, MountPoint, NetworkSettings,
    PortBinding, Resources, RestartPolicy, SnapshotterData, ThrottleDevice, Ulimit, WeightDevice,
};
use crate::sandbox;
use crate::source::{
    ContainerDetail, SourceConfig, SourceHostConfig, SourceMount, SourceNetworkSettings,
    SourceResources, SourceThrottleDevice,
};

/// Label marking a container as a pod sandbox or a pod member on the target.
pub const POUCH_TYPE_LABEL: &str = "io.kubernetes.pouch.type";
/// Label the source kubelet shim puts on pod members.
pub const DOCKER_TYPE_LABEL: &str = "io.kubernetes.docker.type";
/// Label holding the owning sandbox's container ID.
pub const SANDBOX_ID_LABEL: &str = "io.kubernetes.sandbox.id";
/// Label carrying the disk quota ID.
pub const QUOTA_ID_LABEL: &str = "QuotaId";

pub const TYPE_SANDBOX: &str = "sandbox";
pub const TYPE_CONTAINER: &str = "container";

pub const ANNOTATION_CONTAINER_TYPE: &str = "io.kubernetes.cri.container-type";
pub const ANNOTATION_SANDBOX_NAME: &str = "io.kubernetes.cri.sandbox-name";
pub const ANNOTATION_SANDBOX_ID: &str = "io.kubernetes.cri.sandbox-id";

/// Capabilities every migrated container is granted.
pub const REQUIRED_CAPS: [&str; 6] = [
    "SYS_RESOURCE",
    "SYS_MODULE",
    "SYS_PTRACE",
    "SYS_PACCT",
    "NET_ADMIN",
    "SYS_ADMIN",
];

/// Volume drivers whose mounts are named volumes on the target.
const NAMED_DRIVERS: [&str; 2] = ["alilocal", "ultron"];

/// Decode a raw inspect document and translate it.
///
/// # Errors
///
/// Returns [`CoreError::MalformedContainer`] if the bytes are not a container
/// document, or any error [`translate`] returns.
pub fn translate_json(raw: &[u8]) -> Result<ContainerRecord, CoreError> {
    let detail: ContainerDetail =
        serde_json::from_slice(raw).map_err(CoreError::MalformedContainer)?;
    translate(&detail)
}

/// Translate an inspected source container into a target record.
///
/// The translation is pure: the same input always yields the same record.
///
/// # Errors
///
/// Returns [`CoreError::MissingConfig`] if the container has no `Config`.
pub fn translate(detail: &ContainerDetail) -> Result<ContainerRecord, CoreError> {
    let Some(source_config) = detail.config.as_ref() else {
        return Err(CoreError::MissingConfig { id: detail.id.clone() });
    };

    let name = detail.name.strip_prefix('/').unwrap_or(&detail.name).to_owned();
    let mut config = convert_config(source_config);

    if sandbox::is_sandbox_name(&name) {
        config.labels.insert(POUCH_TYPE_LABEL.to_owned(), TYPE_SANDBOX.to_owned());
    }
    if config.labels.get(DOCKER_TYPE_LABEL).map(String::as_str) == Some(TYPE_CONTAINER) {
        mark_pod_member(&mut config);
    }

    let env = parse_env(&config.env);
    if let Some(mode) = env.get("ali_run_mode") {
        if mode != "vm" {
            let old = format!("ali_run_mode={mode}");
            if let Some(entry) = config.env.iter_mut().find(|e| **e == old) {
                "ali_run_mode=vm".clone_into(entry);
            }
        }
    }

    let mut host_config = detail.host_config.as_ref().map(convert_host_config);
    if let Some(host) = host_config.as_mut() {
        if host.log_config.log_driver.is_empty() && !detail.log_path.is_empty() {
            "json-file".clone_into(&mut host.log_config.log_driver);
        }
        if let Some(path) = env.get("LD_PRELOAD").filter(|p| !p.is_empty()) {
            let bind = format!("{path}:{path}:ro");
            if !host.binds.contains(&bind) {
                host.binds.push(bind);
            }
        }
    }

    let graph_data = detail.graph_driver.data.clone();
    let state = &detail.state;

    Ok(ContainerRecord {
        app_armor_profile: detail.app_armor_profile.clone(),
        args: detail.args.clone(),
        config: Some(config),
        created: to_utc(&detail.created),
        driver: "overlay2".to_owned(),
        base_fs: graph_data.get("MergedDir").cloned().unwrap_or_default(),
        snapshotter: Some(SnapshotterData { name: "overlayfs".to_owned(), data: graph_data }),
        host_config,
        hostname_path: detail.hostname_path.clone(),
        hosts_path: detail.hosts_path.clone(),
        id: detail.id.clone(),
        image: detail.image.clone(),
        log_path: detail.log_path.clone(),
        mount_label: detail.mount_label.clone(),
        mounts: detail.mounts.iter().map(convert_mount).collect(),
        name,
        network_settings: detail.network_settings.as_ref().map(convert_network),
        path: detail.path.clone(),
        process_label: detail.process_label.clone(),
        resolv_conf_path: detail.resolv_conf_path.clone(),
        restart_count: detail.restart_count,
        size_root_fs: detail.size_root_fs.unwrap_or_default(),
        size_rw: detail.size_rw.unwrap_or_default(),
        state: Some(ContainerState {
            dead: state.dead,
            error: state.error.clone(),
            exit_code: state.exit_code,
            finished_at: to_utc(&state.finished_at),
            oom_killed: false,
            paused: state.paused,
            pid: state.pid,
            restarting: false,
            running: state.running,
            started_at: to_utc(&state.started_at),
            status: ContainerStatus::from_source(&state.status),
        }),
        rootfs_provided: true,
    })
}

/// Complete the CRI labels and annotations for a container that belongs to a pod.
fn mark_pod_member(config: &mut ContainerConfig) {
    config.labels.insert(POUCH_TYPE_LABEL.to_owned(), TYPE_CONTAINER.to_owned());

    let annotations = config.spec_annotation.get_or_insert_with(|| {
        BTreeMap::from([(ANNOTATION_CONTAINER_TYPE.to_owned(), TYPE_CONTAINER.to_owned())])
    });
    if let Some(sandbox_id) = config.labels.get(SANDBOX_ID_LABEL) {
        annotations.insert(ANNOTATION_SANDBOX_NAME.to_owned(), sandbox_id.clone());
        annotations.insert(ANNOTATION_SANDBOX_ID.to_owned(), sandbox_id.clone());
    }
}

/// Split `KEY=VALUE` entries. Entries that do not split into exactly two parts are skipped.
#[must_use]
pub fn parse_env(env: &[String]) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|entry| {
            let mut parts = entry.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Some((key.to_owned(), value.to_owned())),
                _ => None,
            }
        })
        .collect()
}

/// Reformat a source timestamp in UTC. Unparseable input is kept as is.
#[must_use]
pub fn to_utc(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| timestamp.to_owned(),
        |t| t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )
}

fn convert_config(c: &SourceConfig) -> ContainerConfig {
    let labels = c.labels.clone();
    let quota_id = labels.get(QUOTA_ID_LABEL).cloned().unwrap_or_default();
    ContainerConfig {
        hostname: c.hostname.clone(),
        domainname: c.domainname.clone(),
        user: c.user.clone(),
        attach_stdin: c.attach_stdin,
        attach_stdout: c.attach_stdout,
        attach_stderr: c.attach_stderr,
        tty: c.tty,
        open_stdin: c.open_stdin,
        stdin_once: c.stdin_once,
        env: c.env.clone(),
        cmd: c.cmd.clone(),
        entrypoint: c.entrypoint.clone(),
        shell: c.shell.clone(),
        image: c.image.clone(),
        volumes: c
            .volumes
            .keys()
            .map(|k| (k.clone(), serde_json::Value::Object(serde_json::Map::new())))
            .collect(),
        working_dir: c.working_dir.clone(),
        network_disabled: c.network_disabled,
        mac_address: c.mac_address.clone(),
        on_build: c.on_build.clone(),
        labels,
        stop_signal: c.stop_signal.clone(),
        quota_id,
        spec_annotation: None,
    }
}

fn convert_host_config(h: &SourceHostConfig) -> HostConfig {
    let mut cap_add = h.cap_add.clone();
    for cap in REQUIRED_CAPS {
        if !cap_add.iter().any(|c| c == cap) {
            cap_add.push(cap.to_owned());
        }
    }

    HostConfig {
        auto_remove: h.auto_remove,
        binds: h.binds.clone(),
        cap_add,
        cap_drop: h.cap_drop.clone(),
        cgroup: h.cgroup.clone(),
        container_id_file: h.container_id_file.clone(),
        dns: h.dns.clone(),
        dns_options: h.dns_options.clone(),
        dns_search: h.dns_search.clone(),
        extra_hosts: h.extra_hosts.clone(),
        group_add: h.group_add.clone(),
        ipc_mode: h.ipc_mode.clone(),
        isolation: h.isolation.clone(),
        links: h.links.clone(),
        log_config: LogConfig {
            log_driver: h.log_config.kind.clone(),
            log_opts: h.log_config.config.clone(),
        },
        network_mode: h.network_mode.clone(),
        oom_score_adj: h.oom_score_adj,
        pid_mode: h.pid_mode.clone(),
        privileged: h.privileged,
        publish_all_ports: h.publish_all_ports,
        readonly_rootfs: h.readonly_rootfs,
        restart_policy: RestartPolicy {
            name: h.restart_policy.name.clone(),
            maximum_retry_count: h.restart_policy.maximum_retry_count,
        },
        runtime: "runc".to_owned(),
        security_opt: h.security_opt.clone(),
        shm_size: h.shm_size,
        storage_opt: h.storage_opt.clone(),
        sysctls: h.sysctls.clone(),
        tmpfs: h.tmpfs.clone(),
        uts_mode: h.uts_mode.clone(),
        volume_driver: h.volume_driver.clone(),
        resources: convert_resources(&h.resources),
    }
}

fn throttle(devs: &[SourceThrottleDevice]) -> Vec<ThrottleDevice> {
    devs.iter()
        .map(|d| ThrottleDevice { path: d.path.clone(), rate: d.rate })
        .collect()
}

fn convert_resources(r: &SourceResources) -> Resources {
    Resources {
        cgroup_parent: r.cgroup_parent.clone(),
        blkio_weight: r.blkio_weight,
        blkio_weight_device: r
            .blkio_weight_device
            .iter()
            .map(|d| WeightDevice { path: d.path.clone(), weight: d.weight })
            .collect(),
        blkio_device_read_bps: throttle(&r.blkio_device_read_bps),
        blkio_device_write_bps: throttle(&r.blkio_device_write_bps),
        blkio_device_read_iops: throttle(&r.blkio_device_read_iops),
        blkio_device_write_iops: throttle(&r.blkio_device_write_iops),
        cpu_count: r.cpu_count,
        cpu_percent: r.cpu_percent,
        cpu_period: r.cpu_period,
        cpu_quota: r.cpu_quota,
        cpu_shares: r.cpu_shares,
        cpuset_cpus: r.cpuset_cpus.clone(),
        cpuset_mems: r.cpuset_mems.clone(),
        devices: r
            .devices
            .iter()
            .map(|d| DeviceMapping {
                path_on_host: d.path_on_host.clone(),
                path_in_container: d.path_in_container.clone(),
                cgroup_permissions: d.cgroup_permissions.clone(),
            })
            .collect(),
        io_maximum_iops: r.io_maximum_iops,
        io_maximum_bandwidth: r.io_maximum_bandwidth,
        kernel_memory: r.kernel_memory,
        memory: r.memory,
        memory_reservation: r.memory_reservation,
        memory_swap: r.memory_swap,
        memory_swappiness: r.memory_swappiness,
        oom_kill_disable: r.oom_kill_disable,
        pids_limit: r.pids_limit,
        ulimits: r
            .ulimits
            .iter()
            .map(|u| Ulimit { name: u.name.clone(), soft: u.soft, hard: u.hard })
            .collect(),
    }
}

fn convert_mount(m: &SourceMount) -> MountPoint {
    MountPoint {
        name: m.name.clone(),
        source: m.source.clone(),
        destination: m.destination.clone(),
        driver: m.driver.clone(),
        mode: m.mode.clone(),
        rw: m.rw,
        propagation: m.propagation.clone(),
        named: NAMED_DRIVERS.contains(&m.driver.as_str()),
    }
}

fn convert_network(n: &SourceNetworkSettings) -> NetworkSettings {
    NetworkSettings {
        bridge: n.bridge.clone(),
        hairpin_mode: n.hairpin_mode,
        link_local_ipv6_address: n.link_local_ipv6_address.clone(),
        link_local_ipv6_prefix_len: n.link_local_ipv6_prefix_len,
        sandbox_id: n.sandbox_id.clone(),
        sandbox_key: n.sandbox_key.clone(),
        networks: n
            .networks
            .iter()
            .map(|(name, ep)| {
                let settings = EndpointSettings {
                    endpoint_id: ep.endpoint_id.clone(),
                    gateway: ep.gateway.clone(),
                    global_ipv6_address: ep.global_ipv6_address.clone(),
                    global_ipv6_prefix_len: ep.global_ipv6_prefix_len,
                    ipam_config: ep.ipam_config.as_ref().map(|ipam| EndpointIpamConfig {
                        ipv4_address: ipam.ipv4_address.clone(),
                        ipv6_address: ipam.ipv6_address.clone(),
                        link_local_ips: ipam.link_local_ips.clone(),
                    }),
                    ip_address: ep.ip_address.clone(),
                    ip_prefix_len: ep.ip_prefix_len,
                    ipv6_gateway: ep.ipv6_gateway.clone(),
                    links: ep.links.clone(),
                    mac_address: ep.mac_address.clone(),
                    network_id: ep.network_id.clone(),
                };
                (name.clone(), settings)
            })
            .collect(),
        ports: n
            .ports
            .iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .iter()
                    .flatten()
                    .map(|b| PortBinding { host_ip: b.host_ip.clone(), host_port: b.host_port.clone() })
                    .collect();
                (port.clone(), bindings)
            })
            .collect(),
    }
}
