//! # Node Container Specification
//!
//! Everything needed to create a validator container, independent of any
//! runtime client. Names are derived from the node name so that a node's
//! container and volumes can be found again after a restart.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::value_objects::{
    DEFAULT_HTTP_PORT, DEFAULT_STAKING_PORT, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE,
    NODE_NAME_LABEL,
};

const CONTAINER_PREFIX: &str = "avax-";
const DATA_ROOT: &str = "/root/.avalanchego";

/// Published port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port inside the container.
    pub container_port: u16,
    pub host_ip: String,
    pub host_port: u16,
}

/// Named volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub volume: String,
    pub target: String,
}

/// Restart behaviour requested from the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    UnlessStopped,
}

/// Runtime-neutral container create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    /// `KEY=value` pairs, in order.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Container ports declared as exposed (tcp).
    pub exposed_ports: Vec<u16>,
    pub port_bindings: Vec<PortBinding>,
    pub mounts: Vec<VolumeMount>,
    pub network: String,
    pub restart_policy: RestartPolicy,
}

impl ContainerConfig {
    /// Value of an environment variable, if set.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|kv| {
            kv.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    /// Subnets listed in `AVAGO_TRACK_SUBNETS`.
    pub fn tracked_subnets(&self) -> Vec<String> {
        self.env_var("AVAGO_TRACK_SUBNETS")
            .map(|v| {
                v.split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Container name for a node.
pub fn container_name(node_name: &str) -> String {
    format!("{CONTAINER_PREFIX}{node_name}")
}

/// Parameters for one validator container.
#[derive(Debug, Clone)]
pub struct NodeContainerSpec {
    pub node_name: String,
    pub image: String,
    /// Managed network to attach to.
    pub network: String,
    /// Blockchain network id: mainnet, fuji, local.
    pub network_id: String,
    pub staking_port: u16,
    pub expose_http: bool,
    pub track_subnets: Vec<String>,
}

impl NodeContainerSpec {
    pub fn container_name(&self) -> String {
        container_name(&self.node_name)
    }

    pub fn volume_db(&self) -> String {
        format!("{CONTAINER_PREFIX}{}-db", self.node_name)
    }

    pub fn volume_staking(&self) -> String {
        format!("{CONTAINER_PREFIX}{}-staking", self.node_name)
    }

    pub fn volume_logs(&self) -> String {
        format!("{CONTAINER_PREFIX}{}-logs", self.node_name)
    }

    /// Build the runtime create request.
    pub fn build(&self) -> ContainerConfig {
        let mut env = vec![
            format!("AVAGO_NETWORK_ID={}", self.network_id),
            "AVAGO_HTTP_HOST=0.0.0.0".to_string(),
            "AVAGO_HTTP_ALLOWED_HOSTS=*".to_string(),
        ];
        if self.network_id == "local" {
            // Single-node network: the node validates itself and never dials out.
            env.extend([
                "AVAGO_SYBIL_PROTECTION_ENABLED=false".to_string(),
                "AVAGO_BOOTSTRAP_IPS=".to_string(),
                "AVAGO_BOOTSTRAP_IDS=".to_string(),
                "AVAGO_PUBLIC_IP=127.0.0.1".to_string(),
            ]);
        } else {
            env.push("AVAGO_PUBLIC_IP_RESOLUTION_SERVICE=opendns".to_string());
        }
        if !self.track_subnets.is_empty() {
            env.push(format!(
                "AVAGO_TRACK_SUBNETS={}",
                self.track_subnets.join(",")
            ));
        }

        let mut port_bindings = vec![PortBinding {
            container_port: DEFAULT_STAKING_PORT,
            host_ip: "0.0.0.0".to_string(),
            host_port: self.staking_port,
        }];
        if self.expose_http {
            port_bindings.push(PortBinding {
                container_port: DEFAULT_HTTP_PORT,
                host_ip: "127.0.0.1".to_string(),
                host_port: DEFAULT_HTTP_PORT,
            });
        }

        let labels = BTreeMap::from([
            (MANAGED_LABEL_KEY.to_string(), MANAGED_LABEL_VALUE.to_string()),
            (NODE_NAME_LABEL.to_string(), self.node_name.clone()),
        ]);

        ContainerConfig {
            image: self.image.clone(),
            env,
            labels,
            exposed_ports: vec![DEFAULT_HTTP_PORT, DEFAULT_STAKING_PORT],
            port_bindings,
            mounts: vec![
                VolumeMount {
                    volume: self.volume_db(),
                    target: format!("{DATA_ROOT}/db"),
                },
                VolumeMount {
                    volume: self.volume_staking(),
                    target: format!("{DATA_ROOT}/staking"),
                },
                VolumeMount {
                    volume: self.volume_logs(),
                    target: format!("{DATA_ROOT}/logs"),
                },
            ],
            network: self.network.clone(),
            restart_policy: RestartPolicy::UnlessStopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(network_id: &str) -> NodeContainerSpec {
        NodeContainerSpec {
            node_name: "n1".into(),
            image: "avaplatform/avalanchego:latest".into(),
            network: "avax".into(),
            network_id: network_id.into(),
            staking_port: 9651,
            expose_http: false,
            track_subnets: vec![],
        }
    }

    #[test]
    fn test_names_derive_from_node() {
        let s = spec("mainnet");
        assert_eq!(s.container_name(), "avax-n1");
        assert_eq!(s.volume_db(), "avax-n1-db");
        assert_eq!(s.volume_staking(), "avax-n1-staking");
        assert_eq!(s.volume_logs(), "avax-n1-logs");
    }

    #[test]
    fn test_public_network_env() {
        let cfg = spec("fuji").build();
        assert_eq!(cfg.env_var("AVAGO_NETWORK_ID"), Some("fuji"));
        assert_eq!(
            cfg.env_var("AVAGO_PUBLIC_IP_RESOLUTION_SERVICE"),
            Some("opendns")
        );
        assert_eq!(cfg.env_var("AVAGO_SYBIL_PROTECTION_ENABLED"), None);
        assert_eq!(cfg.env_var("AVAGO_TRACK_SUBNETS"), None);
    }

    #[test]
    fn test_local_network_env() {
        let cfg = spec("local").build();
        assert_eq!(cfg.env_var("AVAGO_SYBIL_PROTECTION_ENABLED"), Some("false"));
        assert_eq!(cfg.env_var("AVAGO_BOOTSTRAP_IPS"), Some(""));
        assert_eq!(cfg.env_var("AVAGO_PUBLIC_IP"), Some("127.0.0.1"));
    }

    #[test]
    fn test_track_subnets_joined() {
        let mut s = spec("mainnet");
        s.track_subnets = vec!["abc".into(), "def".into()];
        let cfg = s.build();
        assert_eq!(cfg.env_var("AVAGO_TRACK_SUBNETS"), Some("abc,def"));
        assert_eq!(cfg.tracked_subnets(), vec!["abc", "def"]);
    }

    #[test]
    fn test_http_port_only_published_when_exposed() {
        let cfg = spec("mainnet").build();
        assert_eq!(cfg.port_bindings.len(), 1);
        assert_eq!(cfg.port_bindings[0].host_port, 9651);

        let mut s = spec("mainnet");
        s.expose_http = true;
        s.staking_port = 9761;
        let cfg = s.build();
        assert!(cfg
            .port_bindings
            .iter()
            .any(|b| b.container_port == 9650 && b.host_ip == "127.0.0.1"));
        assert!(cfg
            .port_bindings
            .iter()
            .any(|b| b.container_port == 9651 && b.host_port == 9761));
    }

    #[test]
    fn test_managed_labels_and_restart_policy() {
        let cfg = spec("mainnet").build();
        assert_eq!(cfg.labels.get("managed-by").map(String::as_str), Some("avalauncher"));
        assert_eq!(
            cfg.labels.get("avalauncher.node-name").map(String::as_str),
            Some("n1")
        );
        assert_eq!(cfg.restart_policy, RestartPolicy::UnlessStopped);
        assert_eq!(cfg.mounts[0].target, "/root/.avalanchego/db");
    }
}
