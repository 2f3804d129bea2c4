//! Reconciliation: bring persisted node status in line with what the
//! runtimes report.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::FleetManager;
use crate::domain::{
    container_name, reconciled_status, ContainerState, EventKind, FleetError, HostId, NodeStatus,
};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Nodes compared against an observed container list.
    pub checked: usize,
    /// Nodes left alone: host not connected, or a task is working on them.
    pub skipped: usize,
    /// Nodes whose status was rewritten.
    pub corrected: usize,
}

impl FleetManager {
    /// Compare every provisioned node against its host's managed containers
    /// and write back any status that differs.
    ///
    /// Nodes on hosts without a live client are not touched. Running it
    /// twice with no runtime change writes nothing the second time.
    pub async fn reconcile(&self) -> Result<ReconcileReport, FleetError> {
        let mut observed: HashMap<HostId, HashMap<String, ContainerState>> = HashMap::new();
        for (host, client) in self.registry.snapshot() {
            match client.list_managed_containers().await {
                Ok(containers) => {
                    let states = containers
                        .into_iter()
                        .map(|c| (c.name.trim_start_matches('/').to_string(), c.state))
                        .collect();
                    observed.insert(host, states);
                }
                Err(e) => {
                    warn!(host_id = host, error = %e, "Could not list containers, skipping host")
                }
            }
        }

        let mut report = ReconcileReport::default();
        for node in self.store.list_nodes().await? {
            if node.container().is_none() {
                continue;
            }
            let Some(states) = observed.get(&node.host_id) else {
                report.skipped += 1;
                continue;
            };
            if self.node_locks.is_locked(node.id) {
                report.skipped += 1;
                continue;
            }
            report.checked += 1;

            let mut expected = reconciled_status(states.get(&container_name(&node.name)));
            // A half-built container does not revive a failed node.
            if node.status == NodeStatus::Failed && expected == NodeStatus::Creating {
                expected = NodeStatus::Failed;
            }
            if expected == node.status {
                continue;
            }

            match self.transition_status(node.id, node.status, expected).await {
                Ok(true) => {}
                // Moved since the listing; the next pass sees the new status.
                Ok(false) => continue,
                Err(e) => {
                    warn!(node = %node.name, error = %e, "Could not write reconciled status");
                    continue;
                }
            }
            report.corrected += 1;
            info!(node = %node.name, from = %node.status, to = %expected, "Node reconciled");
            self.events
                .record(
                    EventKind::NodeReconciled,
                    &node.name,
                    format!("Reconciled: {} → {}", node.status, expected),
                )
                .await;
        }

        debug!(
            checked = report.checked,
            skipped = report.skipped,
            corrected = report.corrected,
            "Reconciliation finished"
        );
        Ok(report)
    }
}
