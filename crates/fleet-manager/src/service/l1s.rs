//! L1s and their validator sets. Membership changes on a configured L1
//! rebuild the affected node's container with its new subnet list.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::nodes::pull_image;
use super::FleetManager;
use crate::domain::{
    distinct_subnets, effective_weight, invariant_name_present, l1_status_for, EventKind,
    FleetError, L1Detail, L1Id, L1Summary, L1Validator, L1WithCount, NewL1, NodeId, NodeStatus,
    TaskFailure, ValidatorAssignment, DEFAULT_VM, L1,
};
use crate::ports::{CreateL1Request, ValidatorSetApi};

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl FleetManager {
    async fn require_l1(&self, id: L1Id) -> Result<L1, FleetError> {
        self.store
            .get_l1(id)
            .await?
            .ok_or_else(|| FleetError::not_found("L1", id))
    }

    /// Rebuild a node's container in the background with its current subnets.
    pub(crate) fn trigger_reconfigure(&self, node: NodeId, node_name: String) {
        let worker = self.clone();
        let finisher = self.clone();
        debug!(node = %node_name, "Scheduling reconfiguration");

        self.tasks.spawn_keyed(
            &self.node_locks,
            node,
            format!("reconfigure:{node}"),
            self.config.reconfigure_timeout,
            async move { worker.reconfigure(node).await },
            move |outcome| async move {
                finisher
                    .finish_task(node, &node_name, "reconfigure", outcome, |count| {
                        (
                            EventKind::NodeReconfigured,
                            format!("Node reconfigured with {count} subnet(s)"),
                        )
                    })
                    .await
            },
        );
    }

    /// Stop and remove the old container, then create and start one that
    /// tracks every subnet the node validates. Returns the subnet count.
    async fn reconfigure(&self, id: NodeId) -> Result<usize, TaskFailure> {
        let node = self
            .store
            .get_node(id)
            .await
            .map_err(|e| TaskFailure::new("load node", e))?
            .ok_or_else(|| TaskFailure::new("load node", "node no longer exists"))?;
        let subnets = distinct_subnets(
            self.store
                .subnets_for_node(id)
                .await
                .map_err(|e| TaskFailure::new("load subnets", e))?,
        );

        self.write_status(id, node.status, NodeStatus::Creating)
            .await
            .map_err(|e| TaskFailure::new("mark creating", e))?;
        self.events
            .record(
                EventKind::NodeReconfiguring,
                &node.name,
                format!("Reconfiguring with {} subnet(s)", subnets.len()),
            )
            .await;

        let client = self
            .client_for(node.host_id)
            .map_err(|e| TaskFailure::new("connect", e))?;

        if let Some(old) = node.container() {
            if let Err(e) = client.stop_container(old, self.config.stop_grace).await {
                debug!(node = %node.name, error = %e, "Stop before reconfigure failed");
            }
            match client.remove_container(old, false).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(TaskFailure::new("container remove", e)),
            }
            self.store
                .set_node_container(id, None)
                .await
                .map_err(|e| TaskFailure::new("record container", e))?;
        }

        let present = client
            .image_exists(&node.image)
            .await
            .map_err(|e| TaskFailure::new("image check", e))?;
        if !present {
            pull_image(client.as_ref(), &node.image).await?;
        }

        let spec = self.container_spec(&node, subnets.clone());
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

        Ok(subnets.len())
    }
}

#[async_trait]
impl ValidatorSetApi for FleetManager {
    async fn create_l1(&self, request: CreateL1Request) -> Result<L1, FleetError> {
        let name = request.name.trim().to_string();
        invariant_name_present("L1", &name)?;
        if self.store.l1_name_exists(&name).await? {
            return Err(FleetError::Conflict(format!("L1 {name:?} already exists")));
        }

        let subnet_id = non_empty(request.subnet_id);
        let l1 = self
            .store
            .insert_l1(NewL1 {
                name: name.clone(),
                status: l1_status_for(subnet_id.as_deref()),
                subnet_id,
                blockchain_id: non_empty(request.blockchain_id),
                vm: non_empty(request.vm).unwrap_or_else(|| DEFAULT_VM.to_string()),
            })
            .await
            .map_err(|e| FleetError::from_store(e, || format!("L1 {name:?} already exists")))?;

        info!(l1 = %l1.name, status = %l1.status, "L1 created");
        self.events
            .record_with(
                EventKind::L1Created,
                &l1.name,
                "L1 created",
                json!({ "vm": l1.vm, "subnet_id": l1.subnet_id }),
            )
            .await;
        Ok(l1)
    }

    async fn list_l1s(&self) -> Result<Vec<L1WithCount>, FleetError> {
        Ok(self.store.list_l1s().await?)
    }

    async fn get_l1(&self, id: L1Id) -> Result<L1Detail, FleetError> {
        let l1 = self.require_l1(id).await?;
        let validators = self.store.list_validators(id).await?;
        Ok(L1Detail { l1, validators })
    }

    async fn delete_l1(&self, id: L1Id) -> Result<(), FleetError> {
        let l1 = self.require_l1(id).await?;
        let validators = self.store.count_assignments_for_l1(id).await?;
        if validators > 0 {
            return Err(FleetError::Validation(format!(
                "L1 has {validators} validator(s), remove them first"
            )));
        }

        self.store.delete_l1(id).await?;
        info!(l1 = %l1.name, "L1 deleted");
        self.events
            .record(EventKind::L1Deleted, &l1.name, "L1 deleted")
            .await;
        Ok(())
    }

    async fn assign_subnet(
        &self,
        id: L1Id,
        subnet_id: &str,
        blockchain_id: Option<&str>,
    ) -> Result<L1, FleetError> {
        let subnet_id = subnet_id.trim();
        if subnet_id.is_empty() {
            return Err(FleetError::Validation("subnet id is required".into()));
        }
        let current = self.require_l1(id).await?;
        if let Some(existing) = current.subnet() {
            return Err(FleetError::Validation(format!(
                "L1 {:?} already has subnet {existing}",
                current.name
            )));
        }

        let l1 = self
            .store
            .assign_l1_subnet(id, subnet_id, blockchain_id.map(str::trim))
            .await?;
        info!(l1 = %l1.name, subnet_id, "Subnet assigned");
        self.events
            .record(
                EventKind::L1SubnetAssigned,
                &l1.name,
                format!("Subnet assigned: {subnet_id}"),
            )
            .await;

        for validator in self.store.list_validators(id).await? {
            self.trigger_reconfigure(validator.node_id, validator.node_name);
        }
        Ok(l1)
    }

    async fn add_validator(
        &self,
        l1_id: L1Id,
        node_id: NodeId,
        weight: Option<i64>,
    ) -> Result<ValidatorAssignment, FleetError> {
        let l1 = self.require_l1(l1_id).await?;
        let node = self.require_node(node_id).await?;
        let duplicate = || {
            format!(
                "node {} is already a validator for L1 {}",
                node.name, l1.name
            )
        };
        if self.store.assignment_exists(l1_id, node_id).await? {
            return Err(FleetError::Conflict(duplicate()));
        }

        let weight = effective_weight(weight);
        let assignment = self
            .store
            .insert_assignment(l1_id, node_id, weight)
            .await
            .map_err(|e| FleetError::from_store(e, duplicate))?;

        info!(l1 = %l1.name, node = %node.name, weight, "Validator added");
        self.events
            .record_with(
                EventKind::ValidatorAdded,
                &l1.name,
                format!("Node {} added as validator", node.name),
                json!({ "node_id": node_id, "weight": weight }),
            )
            .await;

        if l1.subnet().is_some() {
            self.trigger_reconfigure(node.id, node.name.clone());
        }
        Ok(assignment)
    }

    async fn remove_validator(&self, l1_id: L1Id, node_id: NodeId) -> Result<(), FleetError> {
        let l1 = self.require_l1(l1_id).await?;
        if !self.store.delete_assignment(l1_id, node_id).await? {
            return Err(FleetError::not_found(
                "validator assignment",
                format!("{l1_id}/{node_id}"),
            ));
        }

        let node_name = match self.store.get_node(node_id).await? {
            Some(node) => node.name,
            None => node_id.to_string(),
        };
        info!(l1 = %l1.name, node = %node_name, "Validator removed");
        self.events
            .record_with(
                EventKind::ValidatorRemoved,
                &l1.name,
                format!("Node {node_name} removed as validator"),
                json!({ "node_id": node_id }),
            )
            .await;

        if l1.subnet().is_some() {
            self.trigger_reconfigure(node_id, node_name);
        }
        Ok(())
    }

    async fn list_validators(&self, l1_id: L1Id) -> Result<Vec<L1Validator>, FleetError> {
        self.require_l1(l1_id).await?;
        Ok(self.store.list_validators(l1_id).await?)
    }

    async fn l1s_for_node(&self, node_id: NodeId) -> Result<Vec<L1Summary>, FleetError> {
        self.require_node(node_id).await?;
        Ok(self.store.l1s_for_node(node_id).await?)
    }
}
