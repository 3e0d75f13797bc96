//! Pod sandbox records derived from translated sandbox containers.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::record::ContainerRecord;
use crate::translate::{DOCKER_TYPE_LABEL, POUCH_TYPE_LABEL};

const ANNOTATION_LABEL_PREFIX: &str = "annotation.";

/// Identity of a pod, decoded from `k8s_POD_<name>_<namespace>_<uid>_<attempt>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxMetadata {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
}

impl PodSandboxMetadata {
    /// Parse a sandbox container name (without the leading `/`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSandboxName`] if the name does not have
    /// exactly six `_`-separated parts, the right prefix, non-empty
    /// name/namespace/uid, and a numeric attempt that fits in `u32`.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidSandboxName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        };

        let parts: Vec<&str> = name.split('_').collect();
        let [prefix, kind, pod, namespace, uid, attempt] = parts.as_slice() else {
            return Err(invalid("expected 6 '_' separated parts"));
        };
        if *prefix != "k8s" || *kind != "POD" {
            return Err(invalid("missing k8s_POD_ prefix"));
        }
        if pod.is_empty() || namespace.is_empty() || uid.is_empty() {
            return Err(invalid("empty name, namespace or uid"));
        }
        if attempt.is_empty() || !attempt.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("attempt is not a number"));
        }
        let attempt = attempt
            .parse::<u32>()
            .map_err(|e| invalid(&format!("attempt out of range: {e}")))?;

        Ok(Self {
            name: (*pod).to_owned(),
            uid: (*uid).to_owned(),
            namespace: (*namespace).to_owned(),
            attempt,
        })
    }
}

/// True if `name` is a pod sandbox container name.
#[must_use]
pub fn is_sandbox_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('_').collect();
    parts.len() == 6
        && parts[0] == "k8s"
        && parts[1] == "POD"
        && parts[2..5].iter().all(|p| !p.is_empty())
        && !parts[5].is_empty()
        && parts[5].bytes().all(|b| b.is_ascii_digit())
}

/// Namespace sharing mode; serialized as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespaceMode {
    /// Shared by all containers of the pod.
    #[default]
    Pod,
    /// Private to a single container.
    Container,
    /// The host namespace.
    Node,
}

impl Serialize for NamespaceMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value: i32 = match self {
            Self::Pod => 0,
            Self::Container => 1,
            Self::Node => 2,
        };
        serializer.serialize_i32(value)
    }
}

impl<'de> Deserialize<'de> for NamespaceMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i32::deserialize(deserializer)? {
            0 => Ok(Self::Pod),
            1 => Ok(Self::Container),
            2 => Ok(Self::Node),
            other => Err(serde::de::Error::custom(format!("unknown namespace mode {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NamespaceOption {
    pub network: NamespaceMode,
    pub pid: NamespaceMode,
    pub ipc: NamespaceMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxSandboxSecurityContext {
    pub namespace_options: NamespaceOption,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxPodSandboxConfig {
    pub cgroup_parent: String,
    pub security_context: LinuxSandboxSecurityContext,
    pub sysctls: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    pub servers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

impl DnsConfig {
    /// Parse resolver file contents.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut dns = Self::default();
        for line in contents.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some((keyword, values)) = fields.split_first() else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            let target = match *keyword {
                "search" => &mut dns.searches,
                "nameserver" => &mut dns.servers,
                "options" => &mut dns.options,
                _ => continue,
            };
            target.extend(values.iter().map(|v| (*v).to_owned()));
        }
        dns
    }

    /// Read and parse a resolver file. An empty path yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ResolvConf`] if the file cannot be read.
    pub fn from_path(path: &str) -> Result<Option<Self>, CoreError> {
        if path.is_empty() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| CoreError::ResolvConf {
            path: Path::new(path).to_path_buf(),
            source,
        })?;
        Ok(Some(Self::parse(&contents)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxConfig {
    pub metadata: PodSandboxMetadata,
    pub hostname: String,
    pub log_directory: String,
    pub dns_config: Option<DnsConfig>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub linux: LinuxPodSandboxConfig,
}

/// Record written to `<home>/sandboxes-meta/<id>/meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Config")]
    pub config: PodSandboxConfig,
    #[serde(rename = "Runtime")]
    pub runtime: String,
    #[serde(rename = "LxcfsEnabled")]
    pub lxcfs_enabled: bool,
    #[serde(rename = "NetNS")]
    pub net_ns: String,
}

impl SandboxRecord {
    /// Build the sandbox record for a translated sandbox container.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSandboxName`] if the container name is not a
    /// sandbox name, or [`CoreError::ResolvConf`] if its resolver file is unreadable.
    pub fn from_container(container: &ContainerRecord) -> Result<Self, CoreError> {
        let metadata = PodSandboxMetadata::parse(&container.name)?;
        let dns_config = DnsConfig::from_path(&container.resolv_conf_path)?;

        let mut labels = BTreeMap::new();
        let mut annotations = BTreeMap::new();
        let mut hostname = String::new();
        if let Some(config) = container.config.as_ref() {
            hostname.clone_from(&config.hostname);
            if let Some(spec) = config.spec_annotation.as_ref() {
                annotations.clone_from(spec);
            }
            for (key, value) in &config.labels {
                if let Some(stripped) = key.strip_prefix(ANNOTATION_LABEL_PREFIX) {
                    annotations.insert(stripped.to_owned(), value.clone());
                } else if key != POUCH_TYPE_LABEL && key != DOCKER_TYPE_LABEL {
                    labels.insert(key.clone(), value.clone());
                }
            }
        }

        let host_network = container
            .network_settings
            .as_ref()
            .is_some_and(|n| n.networks.contains_key("host"));
        let namespace_options = if host_network {
            NamespaceOption {
                network: NamespaceMode::Node,
                pid: NamespaceMode::Node,
                ipc: NamespaceMode::Node,
            }
        } else {
            NamespaceOption { pid: NamespaceMode::Container, ..NamespaceOption::default() }
        };

        let (runtime, cgroup_parent, sysctls) = container.host_config.as_ref().map_or_else(
            || (String::new(), String::new(), BTreeMap::new()),
            |h| (h.runtime.clone(), h.resources.cgroup_parent.clone(), h.sysctls.clone()),
        );

        let pid = container.state.as_ref().map_or(0, |s| s.pid);
        let net_ns = if pid > 0 { format!("/proc/{pid}/ns/net") } else { String::new() };

        Ok(Self {
            id: container.id.clone(),
            config: PodSandboxConfig {
                log_directory: format!("/var/log/pods/{}", metadata.uid),
                metadata,
                hostname,
                dns_config,
                labels,
                annotations,
                linux: LinuxPodSandboxConfig {
                    cgroup_parent,
                    security_context: LinuxSandboxSecurityContext { namespace_options },
                    sysctls,
                },
            },
            runtime,
            lxcfs_enabled: false,
            net_ns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContainerConfig, ContainerState, EndpointSettings, NetworkSettings};
    use std::io::Write as _;

    #[test]
    fn parse_valid_sandbox_name() {
        let meta = match PodSandboxMetadata::parse("k8s_POD_nginx_default_1234-abcd_3") {
            Ok(m) => m,
            Err(e) => panic!("parse failed: {e}"),
        };
        assert_eq!(meta.name, "nginx");
        assert_eq!(meta.namespace, "default");
        assert_eq!(meta.uid, "1234-abcd");
        assert_eq!(meta.attempt, 3);
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for name in [
            "k8s_POD_nginx_default_uid",
            "k8s_POD_nginx_default_uid_1_extra",
            "k8s_APP_nginx_default_uid_1",
            "k8s_POD__default_uid_1",
            "k8s_POD_nginx_default_uid_x1",
            "k8s_POD_nginx_default_uid_99999999999",
            "",
        ] {
            assert!(PodSandboxMetadata::parse(name).is_err(), "{name} should be rejected");
            if name != "k8s_POD_nginx_default_uid_99999999999" {
                assert!(!is_sandbox_name(name), "{name} is not a sandbox name");
            }
        }
    }

    #[test]
    fn dns_config_parses_keywords() {
        let dns = DnsConfig::parse(
            "search svc.cluster.local cluster.local\nnameserver 10.0.0.10\noptions ndots:5\n# comment\nnameserver\n",
        );
        assert_eq!(dns.searches, vec!["svc.cluster.local", "cluster.local"]);
        assert_eq!(dns.servers, vec!["10.0.0.10"]);
        assert_eq!(dns.options, vec!["ndots:5"]);
    }

    #[test]
    fn dns_config_empty_path_is_none_and_missing_file_errors() {
        assert!(matches!(DnsConfig::from_path(""), Ok(None)));
        assert!(matches!(
            DnsConfig::from_path("/nonexistent/cutover/resolv.conf"),
            Err(CoreError::ResolvConf { .. })
        ));
    }

    fn sandbox_container(resolv: &str) -> ContainerRecord {
        let labels = BTreeMap::from([
            ("app".to_owned(), "web".to_owned()),
            ("annotation.owner".to_owned(), "team-a".to_owned()),
            (POUCH_TYPE_LABEL.to_owned(), "sandbox".to_owned()),
            (DOCKER_TYPE_LABEL.to_owned(), "podsandbox".to_owned()),
        ]);
        ContainerRecord {
            id: "sb1".to_owned(),
            name: "k8s_POD_web_prod_uid-9_0".to_owned(),
            resolv_conf_path: resolv.to_owned(),
            config: Some(ContainerConfig {
                hostname: "web-0".to_owned(),
                labels,
                ..ContainerConfig::default()
            }),
            state: Some(ContainerState { pid: 777, ..ContainerState::default() }),
            ..ContainerRecord::default()
        }
    }

    #[test]
    fn sandbox_record_from_container() {
        let mut resolv = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(resolv, "nameserver 10.0.0.10").expect("write resolv");
        let path = resolv.path().to_string_lossy().into_owned();

        let record = match SandboxRecord::from_container(&sandbox_container(&path)) {
            Ok(r) => r,
            Err(e) => panic!("from_container failed: {e}"),
        };
        assert_eq!(record.id, "sb1");
        assert_eq!(record.net_ns, "/proc/777/ns/net");
        assert_eq!(record.config.log_directory, "/var/log/pods/uid-9");
        assert_eq!(record.config.hostname, "web-0");
        assert_eq!(record.config.labels.len(), 1);
        assert_eq!(record.config.annotations.get("owner").map(String::as_str), Some("team-a"));
        assert_eq!(
            record.config.linux.security_context.namespace_options.pid,
            NamespaceMode::Container
        );
        let dns = record.config.dns_config.expect("dns config");
        assert_eq!(dns.servers, vec!["10.0.0.10"]);

        let json = serde_json::to_value(&record.config.linux).expect("serialize");
        assert_eq!(json["security_context"]["namespace_options"]["pid"], 1);
    }

    #[test]
    fn host_network_sandbox_uses_node_namespaces() {
        let mut container = sandbox_container("");
        container.network_settings = Some(NetworkSettings {
            networks: BTreeMap::from([("host".to_owned(), EndpointSettings::default())]),
            ..NetworkSettings::default()
        });
        let record = SandboxRecord::from_container(&container).expect("sandbox record");
        let ns = record.config.linux.security_context.namespace_options;
        assert_eq!(ns.network, NamespaceMode::Node);
        assert_eq!(ns.pid, NamespaceMode::Node);
        assert_eq!(ns.ipc, NamespaceMode::Node);
        assert!(record.config.dns_config.is_none());
    }
}
