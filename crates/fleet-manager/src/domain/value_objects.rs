//! # Value Objects
//!
//! Identifiers, status enums, and the typed host label set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::ParseStatusError;

/// Host row identifier.
pub type HostId = i64;
/// Node row identifier.
pub type NodeId = i64;
/// L1 row identifier.
pub type L1Id = i64;
/// Validator assignment row identifier.
pub type AssignmentId = i64;
/// Event row identifier.
pub type EventId = i64;

/// Reserved name of the host running the manager itself.
pub const LOCAL_HOST_NAME: &str = "local";
/// Standard P2P staking port of the network.
pub const DEFAULT_STAKING_PORT: u16 = 9651;
/// Node HTTP API port inside the container.
pub const DEFAULT_HTTP_PORT: u16 = 9650;
/// Weight applied when a caller passes none or a non-positive one.
pub const DEFAULT_VALIDATOR_WEIGHT: u64 = 100;
/// Virtual machine used when an L1 is created without one.
pub const DEFAULT_VM: &str = "subnet-evm";

/// Ownership label key put on every managed container.
pub const MANAGED_LABEL_KEY: &str = "managed-by";
/// Ownership label value.
pub const MANAGED_LABEL_VALUE: &str = "avalauncher";
/// Label carrying the node name.
pub const NODE_NAME_LABEL: &str = "avalauncher.node-name";

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable lowercase form used in storage and messages.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Reachability of a host's container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Never probed.
    Unknown,
    /// Last probe succeeded.
    Online,
    /// Last probe failed.
    Unreachable,
}

string_enum!(HostStatus {
    Unknown => "unknown",
    Online => "online",
    Unreachable => "unreachable",
});

/// Node lifecycle state.
///
/// ```text
/// creating ──► running ◄──► stopped ──► (deleted)
///    │            │ ▲
///    ▼            ▼ │
///  failed      unhealthy
/// ```
///
/// Reconfiguration moves any provisioned node back to `creating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Provisioning or reconfiguration in flight.
    Creating,
    /// Container up and the application answered healthy.
    Running,
    /// Container not running.
    Stopped,
    /// Container up but the application health check failed.
    Unhealthy,
    /// A provisioning or reconfiguration step failed.
    Failed,
}

string_enum!(NodeStatus {
    Creating => "creating",
    Running => "running",
    Stopped => "stopped",
    Unhealthy => "unhealthy",
    Failed => "failed",
});

impl NodeStatus {
    /// Stopped and failed nodes release their staking port.
    pub fn releases_port(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether an operator or poller may move a node from `self` to `next`.
    ///
    /// Reconciliation does not go through this check: it records what the
    /// runtime reports.
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        match (self, next) {
            (Creating, Running | Failed) => true,
            (Running, Stopped | Unhealthy | Creating) => true,
            (Unhealthy, Running | Stopped | Creating) => true,
            (Stopped, Running | Creating) => true,
            (Failed, Running | Stopped | Creating) => true,
            _ => false,
        }
    }
}

/// L1 configuration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L1Status {
    /// No subnet identifier yet.
    Pending,
    /// Subnet identifier known.
    Configured,
    /// Registered on chain; set outside the manager.
    Active,
}

string_enum!(L1Status {
    Pending => "pending",
    Configured => "configured",
    Active => "active",
});

/// Audit event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "node.creating")]
    NodeCreating,
    #[serde(rename = "node.running")]
    NodeRunning,
    #[serde(rename = "node.failed")]
    NodeFailed,
    #[serde(rename = "node.started")]
    NodeStarted,
    #[serde(rename = "node.stopped")]
    NodeStopped,
    #[serde(rename = "node.deleted")]
    NodeDeleted,
    #[serde(rename = "node.health")]
    NodeHealth,
    #[serde(rename = "node.identified")]
    NodeIdentified,
    #[serde(rename = "node.reconfiguring")]
    NodeReconfiguring,
    #[serde(rename = "node.reconfigured")]
    NodeReconfigured,
    #[serde(rename = "node.reconciled")]
    NodeReconciled,
    #[serde(rename = "host.added")]
    HostAdded,
    #[serde(rename = "host.removed")]
    HostRemoved,
    #[serde(rename = "host.online")]
    HostOnline,
    #[serde(rename = "host.unreachable")]
    HostUnreachable,
    #[serde(rename = "l1.created")]
    L1Created,
    #[serde(rename = "l1.deleted")]
    L1Deleted,
    #[serde(rename = "l1.subnet_assigned")]
    L1SubnetAssigned,
    #[serde(rename = "l1.validator.added")]
    ValidatorAdded,
    #[serde(rename = "l1.validator.removed")]
    ValidatorRemoved,
}

string_enum!(EventKind {
    NodeCreating => "node.creating",
    NodeRunning => "node.running",
    NodeFailed => "node.failed",
    NodeStarted => "node.started",
    NodeStopped => "node.stopped",
    NodeDeleted => "node.deleted",
    NodeHealth => "node.health",
    NodeIdentified => "node.identified",
    NodeReconfiguring => "node.reconfiguring",
    NodeReconfigured => "node.reconfigured",
    NodeReconciled => "node.reconciled",
    HostAdded => "host.added",
    HostRemoved => "host.removed",
    HostOnline => "host.online",
    HostUnreachable => "host.unreachable",
    L1Created => "l1.created",
    L1Deleted => "l1.deleted",
    L1SubnetAssigned => "l1.subnet_assigned",
    ValidatorAdded => "l1.validator.added",
    ValidatorRemoved => "l1.validator.removed",
});

/// Container state as reported by a runtime's list or inspect call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    /// Anything the engine reports that we do not model.
    Other(String),
}

impl ContainerState {
    /// Map an engine state string.
    pub fn from_engine(state: &str) -> Self {
        match state {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the container process is up.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Facts about a host collected from its runtime.
///
/// Every field is optional: remote runtimes may not report all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLabels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

impl HostLabels {
    /// Hostname label, if one was recorded.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|h| !h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_round_trip_text() {
        for status in [
            NodeStatus::Creating,
            NodeStatus::Running,
            NodeStatus::Stopped,
            NodeStatus::Unhealthy,
            NodeStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<NodeStatus>().unwrap(), status);
        }
        assert!("zombie".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn test_creating_cannot_jump_to_stopped_or_unhealthy() {
        assert!(!NodeStatus::Creating.can_transition_to(NodeStatus::Stopped));
        assert!(!NodeStatus::Creating.can_transition_to(NodeStatus::Unhealthy));
        assert!(NodeStatus::Creating.can_transition_to(NodeStatus::Running));
        assert!(NodeStatus::Creating.can_transition_to(NodeStatus::Failed));
    }

    #[test]
    fn test_stopped_cannot_become_unhealthy() {
        assert!(!NodeStatus::Stopped.can_transition_to(NodeStatus::Unhealthy));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Unhealthy));
        assert!(NodeStatus::Unhealthy.can_transition_to(NodeStatus::Running));
    }

    #[test]
    fn test_port_release() {
        assert!(NodeStatus::Stopped.releases_port());
        assert!(NodeStatus::Failed.releases_port());
        assert!(!NodeStatus::Unhealthy.releases_port());
        assert!(!NodeStatus::Creating.releases_port());
    }

    #[test]
    fn test_event_kind_serializes_as_tag() {
        let json = serde_json::to_string(&EventKind::ValidatorAdded).unwrap();
        assert_eq!(json, "\"l1.validator.added\"");
        assert_eq!(
            "node.reconciled".parse::<EventKind>().unwrap(),
            EventKind::NodeReconciled
        );
    }

    #[test]
    fn test_container_state_mapping() {
        assert_eq!(ContainerState::from_engine("exited"), ContainerState::Exited);
        assert!(ContainerState::from_engine("running").is_running());
        assert_eq!(
            ContainerState::from_engine("weird"),
            ContainerState::Other("weird".to_string())
        );
    }

    #[test]
    fn test_empty_hostname_label_is_absent() {
        let labels = HostLabels {
            hostname: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(labels.hostname(), None);
    }
}
