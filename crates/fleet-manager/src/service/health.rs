//! Health poller: probe running nodes, apply health transitions, discover
//! node identities.

use async_trait::async_trait;
use fleet_telemetry::{metric_inc, HEALTH_CHECKS};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use super::FleetManager;
use crate::domain::{
    container_name, health_transition, EventKind, FleetError, HealthVerdict, Node, NodeStatus,
};
use crate::poller::PollCycle;
use crate::ports::ContainerRuntime;

/// Nodes probed at once within one cycle.
const PROBE_CONCURRENCY: usize = 16;

pub(super) struct HealthPoll(pub(super) FleetManager);

#[async_trait]
impl PollCycle for HealthPoll {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn run_cycle(&self) {
        match self.0.check_node_health().await {
            Ok(changed) if changed > 0 => debug!(changed, "Health cycle applied transitions"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Health poll cycle failed"),
        }
    }
}

impl FleetManager {
    /// Run one health cycle. Returns the number of status changes written.
    ///
    /// Only `running` and `unhealthy` nodes with a container on a connected
    /// host are probed. Any probe failure counts as unhealthy. Nodes with
    /// background work in flight are skipped, and a node whose status moved
    /// while it was probed is left alone.
    pub async fn check_node_health(&self) -> Result<usize, FleetError> {
        let nodes = self.store.list_nodes().await?;
        let changed = AtomicUsize::new(0);

        stream::iter(nodes.into_iter().filter(|n| {
            matches!(n.status, NodeStatus::Running | NodeStatus::Unhealthy)
                && n.container().is_some()
                && !self.node_locks.is_locked(n.id)
        }))
        .for_each_concurrent(PROBE_CONCURRENCY, |node| {
            let changed = &changed;
            async move {
                let Some(client) = self.registry.get(node.host_id) else {
                    return;
                };
                match self.check_one(&node, client.as_ref()).await {
                    Ok(true) => {
                        changed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(node = %node.name, error = %e, "Health update failed"),
                }
            }
        })
        .await;

        Ok(changed.into_inner())
    }

    async fn check_one(
        &self,
        node: &Node,
        client: &dyn ContainerRuntime,
    ) -> Result<bool, FleetError> {
        let target = container_name(&node.name);
        let healthy = match self.probe.check_health(&target).await {
            Ok(healthy) => healthy,
            Err(e) => {
                debug!(node = %node.name, error = %e, "Health probe failed");
                false
            }
        };
        metric_inc!(
            HEALTH_CHECKS,
            &[if healthy { "healthy" } else { "unhealthy" }]
        );

        let verdict = if healthy {
            HealthVerdict::Healthy
        } else if node.status == NodeStatus::Running {
            // Distinguish a dead process from a live one failing its check.
            match node.container() {
                Some(id) => match client.inspect_container(id).await {
                    Ok(inspect) if inspect.state.is_running() => HealthVerdict::Degraded,
                    _ => HealthVerdict::Exited,
                },
                None => HealthVerdict::Exited,
            }
        } else {
            HealthVerdict::Degraded
        };

        let mut changed = false;
        if let Some(next) = health_transition(node.status, verdict) {
            // A verdict only applies to the container that was probed.
            let current = self.store.get_node(node.id).await?;
            let same_container = current.as_ref().and_then(Node::container) == node.container();
            if !same_container || !self.transition_status(node.id, node.status, next).await? {
                debug!(node = %node.name, "Node moved during health check, skipping");
                return Ok(false);
            }
            let message = format!("Status changed: {} → {}", node.status, next);
            info!(node = %node.name, from = %node.status, to = %next, "Health transition");
            self.events
                .record(EventKind::NodeHealth, &node.name, message)
                .await;
            changed = true;
        }

        if healthy && node.identity.is_none() {
            self.discover_identity(node, &target).await?;
        }
        Ok(changed)
    }

    async fn discover_identity(&self, node: &Node, target: &str) -> Result<(), FleetError> {
        let identity = match self.probe.node_identity(target).await {
            Ok(identity) if !identity.is_empty() => identity,
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!(node = %node.name, error = %e, "Identity query failed");
                return Ok(());
            }
        };
        self.store.set_node_identity(node.id, &identity).await?;
        info!(node = %node.name, %identity, "Node identity discovered");
        self.events
            .record(
                EventKind::NodeIdentified,
                &node.name,
                format!("Node ID: {identity}"),
            )
            .await;
        Ok(())
    }
}
