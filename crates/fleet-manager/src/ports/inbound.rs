//! # Inbound Ports (Driving Ports)
//!
//! Operations exposed to the caller (an HTTP adapter or a CLI).
//! Synchronous steps return errors directly; background provisioning and
//! reconfiguration report only through node status and events.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{
    Event, FleetError, Host, HostId, L1Detail, L1Id, L1Summary, L1Validator, L1WithCount, Node,
    NodeId, StatusSummary, ValidatorAssignment, L1,
};
use crate::ports::outbound::ByteStream;

/// Request to create a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    /// Falls back to the configured image.
    #[serde(default)]
    pub image: Option<String>,
    /// Falls back to the standard staking port.
    #[serde(default)]
    pub staking_port: Option<u16>,
    #[serde(default)]
    pub expose_http: bool,
    /// Falls back to the local host.
    #[serde(default)]
    pub host_id: Option<HostId>,
}

impl CreateNodeRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Request to register a remote host.
#[derive(Debug, Clone, Deserialize)]
pub struct AddHostRequest {
    pub name: String,
    pub remote_address: String,
}

/// Request to create an L1.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateL1Request {
    pub name: String,
    #[serde(default)]
    pub vm: Option<String>,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub blockchain_id: Option<String>,
}

/// Node lifecycle operations.
#[async_trait]
pub trait NodeLifecycleApi: Send + Sync {
    /// Insert the node in `creating` and provision it in the background.
    async fn create_node(&self, request: CreateNodeRequest) -> Result<Node, FleetError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, FleetError>;

    async fn get_node(&self, id: NodeId) -> Result<Node, FleetError>;

    async fn start_node(&self, id: NodeId) -> Result<(), FleetError>;

    async fn stop_node(&self, id: NodeId) -> Result<(), FleetError>;

    async fn delete_node(&self, id: NodeId, remove_volumes: bool) -> Result<(), FleetError>;

    /// Container output, last `tail` lines (default 100).
    async fn node_logs(&self, id: NodeId, tail: Option<&str>) -> Result<ByteStream, FleetError>;
}

/// Host pool operations.
#[async_trait]
pub trait HostApi: Send + Sync {
    async fn add_host(&self, request: AddHostRequest) -> Result<Host, FleetError>;

    async fn remove_host(&self, id: HostId) -> Result<(), FleetError>;

    async fn list_hosts(&self) -> Result<Vec<Host>, FleetError>;

    async fn get_host(&self, id: HostId) -> Result<Host, FleetError>;
}

/// L1 and validator set operations.
#[async_trait]
pub trait ValidatorSetApi: Send + Sync {
    async fn create_l1(&self, request: CreateL1Request) -> Result<L1, FleetError>;

    async fn list_l1s(&self) -> Result<Vec<L1WithCount>, FleetError>;

    async fn get_l1(&self, id: L1Id) -> Result<L1Detail, FleetError>;

    async fn delete_l1(&self, id: L1Id) -> Result<(), FleetError>;

    /// Record the subnet id, moving the L1 to `configured`, and reconfigure
    /// its validators.
    async fn assign_subnet(
        &self,
        id: L1Id,
        subnet_id: &str,
        blockchain_id: Option<&str>,
    ) -> Result<L1, FleetError>;

    async fn add_validator(
        &self,
        l1: L1Id,
        node: NodeId,
        weight: Option<i64>,
    ) -> Result<ValidatorAssignment, FleetError>;

    async fn remove_validator(&self, l1: L1Id, node: NodeId) -> Result<(), FleetError>;

    async fn list_validators(&self, l1: L1Id) -> Result<Vec<L1Validator>, FleetError>;

    async fn l1s_for_node(&self, node: NodeId) -> Result<Vec<L1Summary>, FleetError>;
}

/// Audit log and fleet overview.
#[async_trait]
pub trait FleetOverviewApi: Send + Sync {
    /// Newest first, default 50.
    async fn list_events(&self, limit: Option<usize>) -> Result<Vec<Event>, FleetError>;

    /// Every L1 with its full validator list.
    async fn l1_dashboard(&self) -> Result<Vec<L1Detail>, FleetError>;

    async fn status_summary(&self) -> Result<StatusSummary, FleetError>;
}
