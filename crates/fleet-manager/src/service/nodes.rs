//! Node lifecycle: create (with background provisioning), start, stop,
//! delete, logs.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, info, warn};

use super::FleetManager;
use crate::domain::{
    invariant_name_present, EventKind, FleetError, NewNode, Node, NodeId, NodeStatus, StoreError,
    TaskFailure,
};
use crate::ports::{ByteStream, ContainerRuntime, CreateNodeRequest, NodeLifecycleApi};

const PORT_CONSTRAINT: &str = "nodes_host_staking_port_active_key";

fn port_conflict(port: u16) -> FleetError {
    FleetError::Conflict(format!("staking port {port} already in use on this host"))
}

fn name_conflict(name: &str) -> FleetError {
    FleetError::Conflict(format!("node {name:?} already exists"))
}

/// Map a node write rejected by the store to the conflict the caller sees.
fn node_write_error(err: StoreError, name: &str, port: u16) -> FleetError {
    match err {
        StoreError::UniqueViolation {
            constraint: PORT_CONSTRAINT,
        } => port_conflict(port),
        StoreError::UniqueViolation { .. } => name_conflict(name),
        other => other.into(),
    }
}

/// Pull an image and wait for the pull to finish.
pub(super) async fn pull_image(
    client: &dyn ContainerRuntime,
    image: &str,
) -> Result<(), TaskFailure> {
    let mut progress = client
        .pull_image(image)
        .await
        .map_err(|e| TaskFailure::new("image pull", e))?;
    while let Some(chunk) = progress.next().await {
        chunk.map_err(|e| TaskFailure::new("image pull", e))?;
    }
    Ok(())
}

impl FleetManager {
    fn spawn_provisioning(&self, node: Node) {
        let worker = self.clone();
        let finisher = self.clone();
        let (id, name) = (node.id, node.name.clone());

        self.tasks.spawn_keyed(
            &self.node_locks,
            id,
            format!("provision:{id}"),
            self.config.provision_timeout,
            async move { worker.provision(node).await },
            move |outcome| async move {
                finisher
                    .finish_task(id, &name, "provision", outcome, |_| {
                        (EventKind::NodeRunning, "Node is running".to_string())
                    })
                    .await
            },
        );
    }

    /// Pull, create, start. The container id is recorded as soon as the
    /// container exists, so a failed start leaves it behind for inspection.
    async fn provision(&self, node: Node) -> Result<String, TaskFailure> {
        let client = self
            .client_for(node.host_id)
            .map_err(|e| TaskFailure::new("connect", e))?;

        pull_image(client.as_ref(), &node.image).await?;
        debug!(node = %node.name, image = %node.image, "Image pulled");

        let spec = self.container_spec(&node, Vec::new());
        let container = client
            .create_container(&spec.container_name(), &spec.build())
            .await
            .map_err(|e| TaskFailure::new("container create", e))?;
        self.record_container(client.as_ref(), &node, &container)
            .await?;

        client
            .start_container(&container)
            .await
            .map_err(|e| TaskFailure::new("container start", e))?;
        Ok(container)
    }

    /// Record a freshly created container on its node. If the node row is
    /// gone or the write fails, the container is removed again.
    pub(super) async fn record_container(
        &self,
        client: &dyn ContainerRuntime,
        node: &Node,
        container: &str,
    ) -> Result<(), TaskFailure> {
        let Err(e) = self.store.set_node_container(node.id, Some(container)).await else {
            return Ok(());
        };
        if let Err(rm) = client.remove_container(container, true).await {
            warn!(node = %node.name, error = %rm, "Could not remove orphaned container");
        }
        Err(TaskFailure::new("record container", e))
    }

    fn require_container<'a>(&self, node: &'a Node) -> Result<&'a str, FleetError> {
        node.container()
            .ok_or_else(|| FleetError::Validation(format!("node {:?} has no container", node.name)))
    }
}

#[async_trait]
impl NodeLifecycleApi for FleetManager {
    async fn create_node(&self, request: CreateNodeRequest) -> Result<Node, FleetError> {
        let name = request.name.trim().to_string();
        invariant_name_present("node", &name)?;

        let image = request
            .image
            .filter(|i| !i.trim().is_empty())
            .unwrap_or_else(|| self.config.image.clone());
        let staking_port = request
            .staking_port
            .filter(|p| *p != 0)
            .unwrap_or(self.config.staking_port);
        let host_id = request.host_id.unwrap_or_else(|| self.local_host_id());

        if self.store.get_host(host_id).await?.is_none() {
            return Err(FleetError::not_found("host", host_id));
        }
        self.client_for(host_id)?;

        // Friendlier errors for the common case; the insert is authoritative.
        if self.store.node_name_exists(&name).await? {
            return Err(name_conflict(&name));
        }
        if self.store.staking_port_in_use(host_id, staking_port).await? {
            return Err(port_conflict(staking_port));
        }

        let node = self
            .store
            .insert_node(NewNode {
                name: name.clone(),
                host_id,
                image,
                http_port: self.config.http_port,
                staking_port,
                expose_http: request.expose_http,
            })
            .await
            .map_err(|e| node_write_error(e, &name, staking_port))?;

        info!(
            node = %node.name,
            node_id = node.id,
            host_id,
            staking_port,
            "Node created, provisioning"
        );
        self.events
            .record_with(
                EventKind::NodeCreating,
                &node.name,
                "Node creation started",
                json!({
                    "host_id": host_id,
                    "image": node.image,
                    "staking_port": staking_port,
                }),
            )
            .await;

        self.spawn_provisioning(node.clone());
        Ok(node)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, FleetError> {
        Ok(self.store.list_nodes().await?)
    }

    async fn get_node(&self, id: NodeId) -> Result<Node, FleetError> {
        self.require_node(id).await
    }

    async fn start_node(&self, id: NodeId) -> Result<(), FleetError> {
        let node = self.require_node(id).await?;
        let container = self.require_container(&node)?;
        match node.status {
            NodeStatus::Running => {
                return Err(FleetError::Validation(format!(
                    "node {:?} is already running",
                    node.name
                )))
            }
            NodeStatus::Creating => {
                return Err(FleetError::Validation(format!(
                    "node {:?} is still being provisioned",
                    node.name
                )))
            }
            _ => {}
        }
        if !node.holds_port()
            && self
                .store
                .staking_port_in_use(node.host_id, node.staking_port)
                .await?
        {
            return Err(port_conflict(node.staking_port));
        }

        let client = self.client_for(node.host_id)?;
        client
            .start_container(container)
            .await
            .map_err(|e| FleetError::runtime("start container", e))?;

        self.write_status(node.id, node.status, NodeStatus::Running)
            .await
            .map_err(|e| node_write_error(e, &node.name, node.staking_port))?;
        info!(node = %node.name, "Node started");
        self.events
            .record(EventKind::NodeStarted, &node.name, "Node started")
            .await;
        Ok(())
    }

    async fn stop_node(&self, id: NodeId) -> Result<(), FleetError> {
        let node = self.require_node(id).await?;
        let container = self.require_container(&node)?;
        match node.status {
            NodeStatus::Stopped => {
                return Err(FleetError::Validation(format!(
                    "node {:?} is already stopped",
                    node.name
                )))
            }
            NodeStatus::Creating => {
                return Err(FleetError::Validation(format!(
                    "node {:?} is still being provisioned",
                    node.name
                )))
            }
            _ => {}
        }

        let client = self.client_for(node.host_id)?;
        client
            .stop_container(container, self.config.stop_grace)
            .await
            .map_err(|e| FleetError::runtime("stop container", e))?;

        self.write_status(node.id, node.status, NodeStatus::Stopped)
            .await?;
        info!(node = %node.name, "Node stopped");
        self.events
            .record(EventKind::NodeStopped, &node.name, "Node stopped")
            .await;
        Ok(())
    }

    async fn delete_node(&self, id: NodeId, remove_volumes: bool) -> Result<(), FleetError> {
        let node = self.require_node(id).await?;
        if node.status == NodeStatus::Creating || self.node_locks.is_locked(id) {
            return Err(FleetError::Validation(format!(
                "node {:?} is still being provisioned",
                node.name
            )));
        }

        let assignments = self.store.count_assignments_for_node(id).await?;
        if assignments > 0 {
            return Err(FleetError::Validation(format!(
                "node has {assignments} validator assignment(s), remove them first"
            )));
        }

        if let Some(container) = node.container() {
            let client = self.client_for(node.host_id)?;
            // May already be stopped.
            if let Err(e) = client
                .stop_container(container, self.config.delete_stop_grace)
                .await
            {
                debug!(node = %node.name, error = %e, "Stop before delete failed");
            }
            match client.remove_container(container, remove_volumes).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(node = %node.name, "Container already gone");
                }
                Err(e) => return Err(FleetError::runtime("remove container", e)),
            }
        }

        self.store.delete_node(id).await?;
        info!(node = %node.name, remove_volumes, "Node deleted");
        self.events
            .record_with(
                EventKind::NodeDeleted,
                &node.name,
                "Node deleted",
                json!({ "remove_volumes": remove_volumes }),
            )
            .await;
        Ok(())
    }

    async fn node_logs(&self, id: NodeId, tail: Option<&str>) -> Result<ByteStream, FleetError> {
        let node = self.require_node(id).await?;
        let container = self.require_container(&node)?;
        let tail = tail
            .filter(|t| !t.is_empty())
            .unwrap_or(self.config.default_log_tail.as_str());

        let client = self.client_for(node.host_id)?;
        client
            .container_logs(container, tail)
            .await
            .map_err(|e| FleetError::runtime("container logs", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_violation_maps_to_port_conflict() {
        let err = node_write_error(
            StoreError::UniqueViolation {
                constraint: PORT_CONSTRAINT,
            },
            "n2",
            9651,
        );
        assert_eq!(err.to_string(), "staking port 9651 already in use on this host");

        let err = node_write_error(
            StoreError::UniqueViolation {
                constraint: "nodes_name_key",
            },
            "n2",
            9651,
        );
        assert_eq!(err.to_string(), "node \"n2\" already exists");
    }

    #[test]
    fn test_backend_failure_passes_through() {
        let err = node_write_error(StoreError::Backend("locked".into()), "n2", 9651);
        assert!(matches!(err, FleetError::Store(_)));
    }
}
