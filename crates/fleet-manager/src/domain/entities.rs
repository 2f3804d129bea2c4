//! # Domain Entities
//!
//! Persisted records (hosts, nodes, L1s, validator assignments, events),
//! their insert payloads, and the joined read models served to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{
    AssignmentId, EventId, EventKind, HostId, HostLabels, HostStatus, L1Id, L1Status, NodeId,
    NodeStatus, LOCAL_HOST_NAME,
};

// =============================================================================
// HOST
// =============================================================================

/// A machine running a container runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    /// Remote transport address; `None` for the local host.
    pub remote_address: Option<String>,
    pub labels: HostLabels,
    pub status: HostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// The host the manager itself runs on.
    pub fn is_local(&self) -> bool {
        self.name == LOCAL_HOST_NAME && self.remote_address.is_none()
    }

    /// Name shown to operators: the hostname label, or the row name.
    pub fn display_name(&self) -> &str {
        self.labels.hostname().unwrap_or(&self.name)
    }
}

/// Insert payload for a remote host.
#[derive(Debug, Clone)]
pub struct NewHost {
    pub name: String,
    pub remote_address: String,
    pub labels: HostLabels,
    pub status: HostStatus,
}

// =============================================================================
// NODE
// =============================================================================

/// A validator container instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub host_id: HostId,
    pub image: String,
    /// On-chain identity reported by the node; `None` until discovered.
    pub identity: Option<String>,
    /// Runtime container id; `None` until provisioned.
    pub container_id: Option<String>,
    pub http_port: u16,
    pub staking_port: u16,
    /// Whether the HTTP API is published on the host loopback.
    pub expose_http: bool,
    pub status: NodeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Container id, if the node was ever provisioned.
    pub fn container(&self) -> Option<&str> {
        self.container_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether the node still claims its staking port.
    pub fn holds_port(&self) -> bool {
        !self.status.releases_port()
    }
}

/// Insert payload for a node. Nodes are always inserted in `creating`.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub host_id: HostId,
    pub image: String,
    pub http_port: u16,
    pub staking_port: u16,
    pub expose_http: bool,
}

// =============================================================================
// L1
// =============================================================================

/// A logical sub-network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1 {
    pub id: L1Id,
    pub name: String,
    pub subnet_id: Option<String>,
    pub blockchain_id: Option<String>,
    pub vm: String,
    pub status: L1Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl L1 {
    /// Subnet id, if assigned.
    pub fn subnet(&self) -> Option<&str> {
        self.subnet_id.as_deref().filter(|s| !s.is_empty())
    }
}

/// Insert payload for an L1.
#[derive(Debug, Clone)]
pub struct NewL1 {
    pub name: String,
    pub subnet_id: Option<String>,
    pub blockchain_id: Option<String>,
    pub vm: String,
    pub status: L1Status,
}

/// L1 with its validator count, as listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1WithCount {
    #[serde(flatten)]
    pub l1: L1,
    pub validator_count: usize,
}

/// A validator of an L1, joined with its node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1Validator {
    pub assignment_id: AssignmentId,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_identity: Option<String>,
    pub node_status: NodeStatus,
    pub weight: u64,
    pub tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An L1 with its full validator list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1Detail {
    #[serde(flatten)]
    pub l1: L1,
    pub validators: Vec<L1Validator>,
}

/// Short L1 reference attached to a node summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Summary {
    pub id: L1Id,
    pub name: String,
    pub status: L1Status,
    pub weight: u64,
}

// =============================================================================
// VALIDATOR ASSIGNMENT
// =============================================================================

/// Membership of a node in an L1's validator set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorAssignment {
    pub id: AssignmentId,
    pub l1_id: L1Id,
    pub node_id: NodeId,
    pub weight: u64,
    /// On-chain registration transaction, filled in externally.
    pub tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// EVENT
// =============================================================================

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub target: String,
    pub message: String,
    pub details: serde_json::Value,
}

// =============================================================================
// STATUS SUMMARY
// =============================================================================

/// Row counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetCounts {
    pub hosts: usize,
    pub nodes: usize,
    pub l1s: usize,
    pub events: usize,
}

/// Node as shown on an overview: host name and L1 memberships resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub name: String,
    pub host_name: String,
    pub image: String,
    pub identity: Option<String>,
    pub staking_port: u16,
    pub status: NodeStatus,
    pub l1s: Vec<L1Summary>,
}

/// Whole-fleet overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub version: String,
    pub counts: FleetCounts,
    pub nodes: Vec<NodeSummary>,
    pub hosts: Vec<Host>,
    pub l1s: Vec<L1Detail>,
}
