//! # Outbound Ports (Driven Ports)
//!
//! Traits the fleet manager depends on: container runtimes (one client per
//! host), the connector that opens remote clients, the persistence store,
//! and the node health protocol.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    ContainerConfig, ContainerState, Event, FleetCounts, Host, HostId, HostLabels, HostStatus,
    L1Id, L1Summary, L1Validator, L1WithCount, NewEvent, NewHost, NewL1, NewNode, Node, NodeId,
    NodeStatus, ProbeError, RuntimeError, StoreError, ValidatorAssignment, L1,
};

/// Chunked output from the runtime (pull progress, container logs).
pub type ByteStream = BoxStream<'static, Result<Bytes, RuntimeError>>;

// =============================================================================
// CONTAINER RUNTIME
// =============================================================================

/// Facts a runtime reports about its host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeHostInfo {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub cpus: u32,
    pub memory_bytes: u64,
    pub server_version: String,
}

impl RuntimeHostInfo {
    /// Typed label set for the host row.
    pub fn labels(&self) -> HostLabels {
        fn non_empty(s: &str) -> Option<String> {
            (!s.is_empty()).then(|| s.to_string())
        }
        HostLabels {
            hostname: non_empty(&self.hostname),
            os: non_empty(&self.os),
            arch: non_empty(&self.arch),
            cpus: (self.cpus > 0).then_some(self.cpus),
            memory_mb: (self.memory_bytes > 0).then_some(self.memory_bytes / 1024 / 1024),
            runtime_version: non_empty(&self.server_version),
        }
    }
}

/// A container carrying the ownership label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
}

/// Result of inspecting one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
}

/// Client for one host's container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Connectivity probe.
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn host_info(&self) -> Result<RuntimeHostInfo, RuntimeError>;

    /// Create the named bridge network if it does not exist.
    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Start pulling an image. The pull completes when the stream ends.
    async fn pull_image(&self, reference: &str) -> Result<ByteStream, RuntimeError>;

    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError>;

    /// Create a container and return its id.
    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop a container, killing it after `grace`.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError>;

    /// Combined stdout and stderr, last `tail` lines.
    async fn container_logs(&self, id: &str, tail: &str) -> Result<ByteStream, RuntimeError>;

    /// Every container carrying the ownership label, running or not.
    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>, RuntimeError>;

    /// Release the underlying connection.
    async fn close(&self);
}

/// Opens clients for remote hosts.
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self, remote_address: &str)
        -> Result<Arc<dyn ContainerRuntime>, RuntimeError>;
}

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Row-level access to hosts, nodes, L1s, assignments, and events.
///
/// Implementations enforce uniqueness and foreign keys themselves and report
/// violations as [`StoreError::UniqueViolation`] and
/// [`StoreError::ForeignKeyViolation`]. Each call is atomic on its own.
#[async_trait]
pub trait FleetStore: Send + Sync {
    // --- hosts ---

    /// Insert or refresh the local host row and mark it online.
    async fn upsert_local_host(&self, labels: &HostLabels) -> Result<Host, StoreError>;
    async fn insert_host(&self, host: NewHost) -> Result<Host, StoreError>;
    async fn get_host(&self, id: HostId) -> Result<Option<Host>, StoreError>;
    async fn host_name_exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;
    async fn set_host_status(&self, id: HostId, status: HostStatus) -> Result<(), StoreError>;
    /// Fails with a foreign key violation while nodes reference the host.
    async fn delete_host(&self, id: HostId) -> Result<(), StoreError>;

    // --- nodes ---

    async fn insert_node(&self, node: NewNode) -> Result<Node, StoreError>;
    async fn get_node(&self, id: NodeId) -> Result<Option<Node>, StoreError>;
    async fn node_name_exists(&self, name: &str) -> Result<bool, StoreError>;
    /// Whether a node holding its port (not stopped or failed) uses `port` on `host`.
    async fn staking_port_in_use(&self, host: HostId, port: u16) -> Result<bool, StoreError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;
    async fn count_nodes_on_host(&self, host: HostId) -> Result<usize, StoreError>;
    async fn set_node_status(&self, id: NodeId, status: NodeStatus) -> Result<(), StoreError>;
    /// Set `to` only if the node is still `from`. Returns whether it was written.
    async fn transition_node_status(
        &self,
        id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    ) -> Result<bool, StoreError>;
    async fn set_node_container(
        &self,
        id: NodeId,
        container_id: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn set_node_identity(&self, id: NodeId, identity: &str) -> Result<(), StoreError>;
    /// Fails with a foreign key violation while assignments reference the node.
    async fn delete_node(&self, id: NodeId) -> Result<(), StoreError>;

    // --- L1s ---

    async fn insert_l1(&self, l1: NewL1) -> Result<L1, StoreError>;
    async fn get_l1(&self, id: L1Id) -> Result<Option<L1>, StoreError>;
    async fn l1_name_exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn list_l1s(&self) -> Result<Vec<L1WithCount>, StoreError>;
    /// Set subnet and blockchain ids and move the L1 to `configured`.
    async fn assign_l1_subnet(
        &self,
        id: L1Id,
        subnet_id: &str,
        blockchain_id: Option<&str>,
    ) -> Result<L1, StoreError>;
    /// Fails with a foreign key violation while assignments reference the L1.
    async fn delete_l1(&self, id: L1Id) -> Result<(), StoreError>;

    // --- validator assignments ---

    async fn insert_assignment(
        &self,
        l1: L1Id,
        node: NodeId,
        weight: u64,
    ) -> Result<ValidatorAssignment, StoreError>;
    async fn assignment_exists(&self, l1: L1Id, node: NodeId) -> Result<bool, StoreError>;
    /// Returns whether a row was deleted.
    async fn delete_assignment(&self, l1: L1Id, node: NodeId) -> Result<bool, StoreError>;
    async fn list_validators(&self, l1: L1Id) -> Result<Vec<L1Validator>, StoreError>;
    async fn count_assignments_for_l1(&self, l1: L1Id) -> Result<usize, StoreError>;
    async fn count_assignments_for_node(&self, node: NodeId) -> Result<usize, StoreError>;
    /// L1s a node validates, ordered by L1 name.
    async fn l1s_for_node(&self, node: NodeId) -> Result<Vec<L1Summary>, StoreError>;
    /// Subnet ids of the configured L1s a node validates.
    async fn subnets_for_node(&self, node: NodeId) -> Result<Vec<String>, StoreError>;

    // --- events ---

    async fn append_event(&self, event: NewEvent) -> Result<Event, StoreError>;
    /// Newest first.
    async fn list_events(&self, limit: usize) -> Result<Vec<Event>, StoreError>;

    async fn counts(&self) -> Result<FleetCounts, StoreError>;
}

// =============================================================================
// NODE HEALTH PROTOCOL
// =============================================================================

/// Talks to a node's HTTP API by its container name.
#[async_trait]
pub trait NodeHealthProbe: Send + Sync {
    /// Liveness flag reported by the node.
    async fn check_health(&self, container_name: &str) -> Result<bool, ProbeError>;

    /// Node's self-reported identity.
    async fn node_identity(&self, container_name: &str) -> Result<String, ProbeError>;
}
