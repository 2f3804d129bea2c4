//! # Fleet Manager Service
//!
//! Application service tying the ports together. Operations are split by
//! concern:
//!
//! | File | Concern |
//! |------|---------|
//! | `nodes.rs` | node lifecycle and provisioning |
//! | `hosts.rs` | host pool and remote connections |
//! | `l1s.rs` | L1s, validator sets, reconfiguration |
//! | `health.rs` | health poller cycle |
//! | `host_poll.rs` | host poller cycle |
//! | `reconcile.rs` | persisted vs observed state |
//! | `overview.rs` | events, L1 dashboard, status summary |

mod health;
mod host_poll;
mod hosts;
mod l1s;
mod nodes;
mod overview;
mod reconcile;

pub use host_poll::HostPollReport;
pub use reconcile::ReconcileReport;

use fleet_telemetry::{NODE_TRANSITIONS, PROVISIONING_OUTCOMES};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::FleetConfig;
use crate::domain::{
    EventKind, FleetError, HostId, HostLabels, Node, NodeContainerSpec, NodeId, NodeStatus,
    StoreError,
};
use crate::events::EventLog;
use crate::poller::{Poller, PollerSet};
use crate::ports::{
    ContainerRuntime, FleetStore, NodeHealthProbe, RuntimeConnector, RuntimeHostInfo,
};
use crate::registry::HostRegistry;
use crate::tasks::{BackgroundTasks, KeyedLocks, TaskOutcome};

/// Collaborators the manager is built from.
pub struct FleetDependencies {
    pub store: Arc<dyn FleetStore>,
    /// Client for the runtime on this machine.
    pub local_runtime: Arc<dyn ContainerRuntime>,
    /// Opens clients for remote hosts.
    pub connector: Arc<dyn RuntimeConnector>,
    pub probe: Arc<dyn NodeHealthProbe>,
}

/// The fleet manager. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct FleetManager {
    pub(crate) config: Arc<FleetConfig>,
    pub(crate) store: Arc<dyn FleetStore>,
    pub(crate) registry: Arc<HostRegistry>,
    pub(crate) connector: Arc<dyn RuntimeConnector>,
    pub(crate) probe: Arc<dyn NodeHealthProbe>,
    pub(crate) events: EventLog,
    pub(crate) tasks: BackgroundTasks,
    pub(crate) node_locks: Arc<KeyedLocks>,
}

impl FleetManager {
    /// Bring the manager up.
    ///
    /// Fails if the local runtime or the store cannot be reached. Remote
    /// hosts that cannot be reached are marked unreachable and left to the
    /// host poller.
    pub async fn bootstrap(
        config: FleetConfig,
        deps: FleetDependencies,
    ) -> Result<Self, FleetError> {
        config.validate()?;
        let local = deps.local_runtime;

        local
            .ping()
            .await
            .map_err(|e| FleetError::runtime("local runtime unreachable", e))?;
        local
            .ensure_network(&config.docker_network)
            .await
            .map_err(|e| FleetError::runtime("ensure network", e))?;

        let labels = match local.host_info().await {
            Ok(info) => local_labels(info),
            Err(e) => {
                warn!(error = %e, "Local host info unavailable");
                local_labels(RuntimeHostInfo::default())
            }
        };
        let local_host = deps.store.upsert_local_host(&labels).await?;

        let manager = Self {
            tasks: BackgroundTasks::new(config.max_concurrent_tasks),
            config: Arc::new(config),
            registry: Arc::new(HostRegistry::new(local_host.id, local)),
            events: EventLog::new(Arc::clone(&deps.store)),
            store: deps.store,
            connector: deps.connector,
            probe: deps.probe,
            node_locks: Arc::new(KeyedLocks::new()),
        };

        manager.connect_remote_hosts().await;
        if let Err(e) = manager.reconcile().await {
            warn!(error = %e, "Startup reconciliation failed");
        }

        info!(
            local_host_id = local_host.id,
            hostname = local_host.display_name(),
            network = %manager.config.docker_network,
            "Fleet manager started"
        );
        Ok(manager)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn local_host_id(&self) -> HostId {
        self.registry.local_id()
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Start the health and host pollers.
    pub fn start_pollers(&self) -> PollerSet {
        PollerSet {
            health: Poller::spawn(
                Arc::new(health::HealthPoll(self.clone())),
                self.config.health_interval,
                self.config.poll_cycle_timeout,
            ),
            hosts: Poller::spawn(
                Arc::new(host_poll::HostPoll(self.clone())),
                self.config.host_poll_interval(),
                self.config.poll_cycle_timeout,
            ),
        }
    }

    /// Close every remote runtime client.
    pub async fn close(&self) {
        self.registry.close_all().await;
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    pub(crate) fn client_for(&self, host: HostId) -> Result<Arc<dyn ContainerRuntime>, FleetError> {
        self.registry
            .get(host)
            .ok_or_else(|| FleetError::Validation(format!("host {host} not connected")))
    }

    pub(crate) async fn require_node(&self, id: NodeId) -> Result<Node, FleetError> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| FleetError::not_found("node", id))
    }

    pub(crate) fn container_spec(&self, node: &Node, track_subnets: Vec<String>) -> NodeContainerSpec {
        NodeContainerSpec {
            node_name: node.name.clone(),
            image: node.image.clone(),
            network: self.config.docker_network.clone(),
            network_id: self.config.network_id.clone(),
            staking_port: node.staking_port,
            expose_http: node.expose_http,
            track_subnets,
        }
    }

    /// Persist a status change and count it.
    pub(crate) async fn write_status(
        &self,
        node: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    ) -> Result<(), StoreError> {
        self.store.set_node_status(node, to).await?;
        NODE_TRANSITIONS
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
        Ok(())
    }

    /// Persist `from → to` only if the node is still `from`. Returns whether
    /// the write happened.
    pub(crate) async fn transition_status(
        &self,
        node: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    ) -> Result<bool, StoreError> {
        let written = self.store.transition_node_status(node, from, to).await?;
        if written {
            NODE_TRANSITIONS
                .with_label_values(&[from.as_str(), to.as_str()])
                .inc();
        }
        Ok(written)
    }

    /// Completion handler shared by provisioning and reconfiguration.
    ///
    /// `kind` is `provision` or `reconfigure`; `on_success` is the event
    /// recorded when the node came up.
    pub(crate) async fn finish_task<T>(
        &self,
        node: NodeId,
        node_name: &str,
        kind: &'static str,
        outcome: TaskOutcome<T>,
        on_success: impl FnOnce(T) -> (EventKind, String),
    ) {
        let (status, event, message, outcome_label) = match outcome {
            TaskOutcome::Completed(value) => {
                let (event, message) = on_success(value);
                (NodeStatus::Running, event, message, "running")
            }
            TaskOutcome::Failed(failure) => (
                NodeStatus::Failed,
                EventKind::NodeFailed,
                format!("{} failed at {}: {}", task_label(kind), failure.step, failure.message),
                "failed",
            ),
            TaskOutcome::TimedOut(deadline) => (
                NodeStatus::Failed,
                EventKind::NodeFailed,
                format!("{} timed out after {}s", task_label(kind), deadline.as_secs()),
                "timeout",
            ),
        };

        PROVISIONING_OUTCOMES
            .with_label_values(&[kind, outcome_label])
            .inc();

        if let Err(e) = self.write_status(node, NodeStatus::Creating, status).await {
            error!(node = node_name, status = %status, error = %e, "Failed to record task outcome");
            return;
        }
        if status == NodeStatus::Running {
            info!(node = node_name, task = kind, "{}", message);
        } else {
            warn!(node = node_name, task = kind, "{}", message);
        }
        self.events.record(event, node_name, message).await;
    }
}

fn task_label(kind: &str) -> &'static str {
    match kind {
        "reconfigure" => "Reconfiguration",
        _ => "Provisioning",
    }
}

/// Labels for the local host row. A VM-reported hostname like `orbstack`
/// says nothing about the machine, so fall back to `$HOSTNAME`, then `local`.
fn local_labels(info: RuntimeHostInfo) -> HostLabels {
    fn usable(name: &str) -> bool {
        !name.is_empty() && name != "orbstack"
    }

    let mut labels = info.labels();
    if !labels.hostname.as_deref().is_some_and(usable) {
        let fallback = env::var("HOSTNAME")
            .ok()
            .filter(|h| usable(h))
            .unwrap_or_else(|| "local".to_string());
        labels.hostname = Some(fallback);
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_labels_keep_real_hostname() {
        let labels = local_labels(RuntimeHostInfo {
            hostname: "rack-7".into(),
            cpus: 4,
            ..Default::default()
        });
        assert_eq!(labels.hostname(), Some("rack-7"));
        assert_eq!(labels.cpus, Some(4));
    }

    #[test]
    fn test_local_labels_replace_vm_hostname() {
        let labels = local_labels(RuntimeHostInfo {
            hostname: "orbstack".into(),
            ..Default::default()
        });
        let hostname = labels.hostname().unwrap();
        assert_ne!(hostname, "orbstack");
        assert!(!hostname.is_empty());
    }
}
