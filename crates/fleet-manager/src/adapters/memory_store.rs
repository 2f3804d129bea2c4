//! # In-Memory Fleet Store
//!
//! [`FleetStore`] over plain maps behind one `parking_lot::RwLock`.
//! Enforces the same constraints a relational schema would:
//!
//! | Constraint | Rule |
//! |------------|------|
//! | `hosts_name_key` | host names unique |
//! | `nodes_name_key` | node names unique |
//! | `nodes_host_staking_port_active_key` | `(host, staking_port)` unique among nodes not stopped/failed |
//! | `l1s_name_key` | L1 names unique |
//! | `l1_validators_l1_id_node_id_key` | one assignment per `(l1, node)` |
//! | `*_fkey` | no dangling references, no deleting referenced rows |

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::domain::{
    distinct_subnets, Event, FleetCounts, Host, HostId, HostLabels, HostStatus, L1Id, L1Status,
    L1Summary, L1Validator, L1WithCount, NewEvent, NewHost, NewL1, NewNode, Node, NodeId,
    NodeStatus, StoreError, ValidatorAssignment, L1, LOCAL_HOST_NAME,
};
use crate::ports::FleetStore;

#[derive(Default)]
struct Tables {
    hosts: BTreeMap<HostId, Host>,
    nodes: BTreeMap<NodeId, Node>,
    l1s: BTreeMap<L1Id, L1>,
    assignments: BTreeMap<i64, ValidatorAssignment>,
    events: Vec<Event>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn port_taken(&self, host: HostId, port: u16, except: Option<NodeId>) -> bool {
        self.nodes.values().any(|n| {
            Some(n.id) != except && n.host_id == host && n.staking_port == port && n.holds_port()
        })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, StoreError> {
        self.nodes
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "node", id })
    }

    fn set_status(&mut self, id: NodeId, status: NodeStatus) -> Result<(), StoreError> {
        let (host, port) = {
            let node = self.node_mut(id)?;
            (node.host_id, node.staking_port)
        };
        if !status.releases_port() && self.port_taken(host, port, Some(id)) {
            return Err(StoreError::UniqueViolation {
                constraint: "nodes_host_staking_port_active_key",
            });
        }
        let node = self.node_mut(id)?;
        node.status = status;
        node.updated_at = Utc::now();
        Ok(())
    }
}

/// Store for tests, dry runs, and single-process deployments without a database.
#[derive(Default)]
pub struct InMemoryFleetStore {
    tables: RwLock<Tables>,
}

impl InMemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FleetStore for InMemoryFleetStore {
    async fn upsert_local_host(&self, labels: &HostLabels) -> Result<Host, StoreError> {
        let mut t = self.tables.write();
        let now = Utc::now();
        if let Some(host) = t
            .hosts
            .values_mut()
            .find(|h| h.name == LOCAL_HOST_NAME)
        {
            host.labels = labels.clone();
            host.status = HostStatus::Online;
            host.updated_at = now;
            return Ok(host.clone());
        }
        let id = t.next_id();
        let host = Host {
            id,
            name: LOCAL_HOST_NAME.to_string(),
            remote_address: None,
            labels: labels.clone(),
            status: HostStatus::Online,
            created_at: now,
            updated_at: now,
        };
        t.hosts.insert(id, host.clone());
        Ok(host)
    }

    async fn insert_host(&self, new: NewHost) -> Result<Host, StoreError> {
        let mut t = self.tables.write();
        if t.hosts.values().any(|h| h.name == new.name) {
            return Err(StoreError::UniqueViolation {
                constraint: "hosts_name_key",
            });
        }
        let id = t.next_id();
        let now = Utc::now();
        let host = Host {
            id,
            name: new.name,
            remote_address: Some(new.remote_address).filter(|a| !a.is_empty()),
            labels: new.labels,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        t.hosts.insert(id, host.clone());
        Ok(host)
    }

    async fn get_host(&self, id: HostId) -> Result<Option<Host>, StoreError> {
        Ok(self.tables.read().hosts.get(&id).cloned())
    }

    async fn host_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().hosts.values().any(|h| h.name == name))
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        Ok(self.tables.read().hosts.values().cloned().collect())
    }

    async fn set_host_status(&self, id: HostId, status: HostStatus) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let host = t
            .hosts
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "host", id })?;
        host.status = status;
        host.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_host(&self, id: HostId) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        if t.nodes.values().any(|n| n.host_id == id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "nodes_host_id_fkey",
            });
        }
        t.hosts
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "host", id })
    }

    async fn insert_node(&self, new: NewNode) -> Result<Node, StoreError> {
        let mut t = self.tables.write();
        if !t.hosts.contains_key(&new.host_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "nodes_host_id_fkey",
            });
        }
        if t.nodes.values().any(|n| n.name == new.name) {
            return Err(StoreError::UniqueViolation {
                constraint: "nodes_name_key",
            });
        }
        if t.port_taken(new.host_id, new.staking_port, None) {
            return Err(StoreError::UniqueViolation {
                constraint: "nodes_host_staking_port_active_key",
            });
        }
        let id = t.next_id();
        let now = Utc::now();
        let node = Node {
            id,
            name: new.name,
            host_id: new.host_id,
            image: new.image,
            identity: None,
            container_id: None,
            http_port: new.http_port,
            staking_port: new.staking_port,
            expose_http: new.expose_http,
            status: NodeStatus::Creating,
            created_at: now,
            updated_at: now,
        };
        t.nodes.insert(id, node.clone());
        Ok(node)
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        Ok(self.tables.read().nodes.get(&id).cloned())
    }

    async fn node_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().nodes.values().any(|n| n.name == name))
    }

    async fn staking_port_in_use(&self, host: HostId, port: u16) -> Result<bool, StoreError> {
        Ok(self.tables.read().port_taken(host, port, None))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.tables.read().nodes.values().cloned().collect())
    }

    async fn count_nodes_on_host(&self, host: HostId) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .read()
            .nodes
            .values()
            .filter(|n| n.host_id == host)
            .count())
    }

    async fn set_node_status(&self, id: NodeId, status: NodeStatus) -> Result<(), StoreError> {
        self.tables.write().set_status(id, status)
    }

    async fn transition_node_status(
        &self,
        id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write();
        match t.nodes.get(&id) {
            Some(node) if node.status == from => {}
            _ => return Ok(false),
        }
        t.set_status(id, to)?;
        Ok(true)
    }

    async fn set_node_container(
        &self,
        id: NodeId,
        container_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let node = t.node_mut(id)?;
        node.container_id = container_id.filter(|c| !c.is_empty()).map(str::to_string);
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn set_node_identity(&self, id: NodeId, identity: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let node = t.node_mut(id)?;
        node.identity = Some(identity.to_string()).filter(|i| !i.is_empty());
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_node(&self, id: NodeId) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        if t.assignments.values().any(|a| a.node_id == id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "l1_validators_node_id_fkey",
            });
        }
        t.nodes
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "node", id })
    }

    async fn insert_l1(&self, new: NewL1) -> Result<L1, StoreError> {
        let mut t = self.tables.write();
        if t.l1s.values().any(|l| l.name == new.name) {
            return Err(StoreError::UniqueViolation {
                constraint: "l1s_name_key",
            });
        }
        let id = t.next_id();
        let now = Utc::now();
        let l1 = L1 {
            id,
            name: new.name,
            subnet_id: new.subnet_id.filter(|s| !s.is_empty()),
            blockchain_id: new.blockchain_id.filter(|s| !s.is_empty()),
            vm: new.vm,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        t.l1s.insert(id, l1.clone());
        Ok(l1)
    }

    async fn get_l1(&self, id: L1Id) -> Result<Option<L1>, StoreError> {
        Ok(self.tables.read().l1s.get(&id).cloned())
    }

    async fn l1_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().l1s.values().any(|l| l.name == name))
    }

    async fn list_l1s(&self) -> Result<Vec<L1WithCount>, StoreError> {
        let t = self.tables.read();
        Ok(t.l1s
            .values()
            .map(|l1| L1WithCount {
                l1: l1.clone(),
                validator_count: t.assignments.values().filter(|a| a.l1_id == l1.id).count(),
            })
            .collect())
    }

    async fn assign_l1_subnet(
        &self,
        id: L1Id,
        subnet_id: &str,
        blockchain_id: Option<&str>,
    ) -> Result<L1, StoreError> {
        let mut t = self.tables.write();
        let l1 = t
            .l1s
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "l1", id })?;
        l1.subnet_id = Some(subnet_id.to_string());
        if let Some(chain) = blockchain_id.filter(|c| !c.is_empty()) {
            l1.blockchain_id = Some(chain.to_string());
        }
        l1.status = L1Status::Configured;
        l1.updated_at = Utc::now();
        Ok(l1.clone())
    }

    async fn delete_l1(&self, id: L1Id) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        if t.assignments.values().any(|a| a.l1_id == id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "l1_validators_l1_id_fkey",
            });
        }
        t.l1s
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "l1", id })
    }

    async fn insert_assignment(
        &self,
        l1: L1Id,
        node: NodeId,
        weight: u64,
    ) -> Result<ValidatorAssignment, StoreError> {
        let mut t = self.tables.write();
        if !t.l1s.contains_key(&l1) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "l1_validators_l1_id_fkey",
            });
        }
        if !t.nodes.contains_key(&node) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "l1_validators_node_id_fkey",
            });
        }
        if t
            .assignments
            .values()
            .any(|a| a.l1_id == l1 && a.node_id == node)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "l1_validators_l1_id_node_id_key",
            });
        }
        let id = t.next_id();
        let assignment = ValidatorAssignment {
            id,
            l1_id: l1,
            node_id: node,
            weight,
            tx_id: None,
            created_at: Utc::now(),
        };
        t.assignments.insert(id, assignment.clone());
        Ok(assignment)
    }

    async fn assignment_exists(&self, l1: L1Id, node: NodeId) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .assignments
            .values()
            .any(|a| a.l1_id == l1 && a.node_id == node))
    }

    async fn delete_assignment(&self, l1: L1Id, node: NodeId) -> Result<bool, StoreError> {
        let mut t = self.tables.write();
        let before = t.assignments.len();
        t.assignments
            .retain(|_, a| !(a.l1_id == l1 && a.node_id == node));
        Ok(t.assignments.len() != before)
    }

    async fn list_validators(&self, l1: L1Id) -> Result<Vec<L1Validator>, StoreError> {
        let t = self.tables.read();
        Ok(t.assignments
            .values()
            .filter(|a| a.l1_id == l1)
            .filter_map(|a| {
                t.nodes.get(&a.node_id).map(|n| L1Validator {
                    assignment_id: a.id,
                    node_id: n.id,
                    node_name: n.name.clone(),
                    node_identity: n.identity.clone(),
                    node_status: n.status,
                    weight: a.weight,
                    tx_id: a.tx_id.clone(),
                    created_at: a.created_at,
                })
            })
            .collect())
    }

    async fn count_assignments_for_l1(&self, l1: L1Id) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .read()
            .assignments
            .values()
            .filter(|a| a.l1_id == l1)
            .count())
    }

    async fn count_assignments_for_node(&self, node: NodeId) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .read()
            .assignments
            .values()
            .filter(|a| a.node_id == node)
            .count())
    }

    async fn l1s_for_node(&self, node: NodeId) -> Result<Vec<L1Summary>, StoreError> {
        let t = self.tables.read();
        let mut out: Vec<L1Summary> = t
            .assignments
            .values()
            .filter(|a| a.node_id == node)
            .filter_map(|a| {
                t.l1s.get(&a.l1_id).map(|l1| L1Summary {
                    id: l1.id,
                    name: l1.name.clone(),
                    status: l1.status,
                    weight: a.weight,
                })
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn subnets_for_node(&self, node: NodeId) -> Result<Vec<String>, StoreError> {
        let t = self.tables.read();
        let subnets = t
            .assignments
            .values()
            .filter(|a| a.node_id == node)
            .filter_map(|a| t.l1s.get(&a.l1_id))
            .filter_map(|l1| l1.subnet().map(str::to_string));
        Ok(distinct_subnets(subnets))
    }

    async fn append_event(&self, new: NewEvent) -> Result<Event, StoreError> {
        let mut t = self.tables.write();
        let id = t.next_id();
        let event = Event {
            id,
            kind: new.kind,
            target: new.target,
            message: new.message,
            details: new.details,
            created_at: Utc::now(),
        };
        t.events.push(event.clone());
        Ok(event)
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .tables
            .read()
            .events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<FleetCounts, StoreError> {
        let t = self.tables.read();
        Ok(FleetCounts {
            hosts: t.hosts.len(),
            nodes: t.nodes.len(),
            l1s: t.l1s.len(),
            events: t.events.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    async fn store_with_local() -> (InMemoryFleetStore, Host) {
        let store = InMemoryFleetStore::new();
        let host = store
            .upsert_local_host(&HostLabels::default())
            .await
            .unwrap();
        (store, host)
    }

    fn new_node(name: &str, host: HostId, port: u16) -> NewNode {
        NewNode {
            name: name.into(),
            host_id: host,
            image: "img".into(),
            http_port: 9650,
            staking_port: port,
            expose_http: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_local_host_is_idempotent() {
        let (store, first) = store_with_local().await;
        let labels = HostLabels {
            hostname: Some("box".into()),
            ..Default::default()
        };
        let second = store.upsert_local_host(&labels).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.labels.hostname(), Some("box"));
        assert_eq!(store.list_hosts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_node_name_unique() {
        let (store, host) = store_with_local().await;
        store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();
        let err = store
            .insert_node(new_node("n1", host.id, 9661))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation {
                constraint: "nodes_name_key"
            }
        ));
    }

    #[tokio::test]
    async fn test_port_unique_only_among_active_nodes() {
        let (store, host) = store_with_local().await;
        let n1 = store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();
        assert!(store.staking_port_in_use(host.id, 9651).await.unwrap());
        assert!(store.insert_node(new_node("n2", host.id, 9651)).await.is_err());

        store.set_node_status(n1.id, NodeStatus::Stopped).await.unwrap();
        assert!(!store.staking_port_in_use(host.id, 9651).await.unwrap());
        let n2 = store.insert_node(new_node("n2", host.id, 9651)).await.unwrap();

        // n1 cannot come back while n2 holds the port.
        assert!(store
            .set_node_status(n1.id, NodeStatus::Running)
            .await
            .is_err());
        assert_eq!(
            store.get_node(n2.id).await.unwrap().unwrap().status,
            NodeStatus::Creating
        );
    }

    #[tokio::test]
    async fn test_transition_skips_moved_node() {
        let (store, host) = store_with_local().await;
        let node = store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();

        assert!(!store
            .transition_node_status(node.id, NodeStatus::Running, NodeStatus::Stopped)
            .await
            .unwrap());
        assert_eq!(
            store.get_node(node.id).await.unwrap().unwrap().status,
            NodeStatus::Creating
        );
        assert!(store
            .transition_node_status(node.id, NodeStatus::Creating, NodeStatus::Running)
            .await
            .unwrap());
        assert!(!store
            .transition_node_status(99, NodeStatus::Running, NodeStatus::Stopped)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_host_delete_blocked_by_nodes() {
        let (store, host) = store_with_local().await;
        let node = store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();
        assert!(matches!(
            store.delete_host(host.id).await,
            Err(StoreError::ForeignKeyViolation { .. })
        ));
        store.delete_node(node.id).await.unwrap();
        store.delete_host(host.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_assignment_constraints() {
        let (store, host) = store_with_local().await;
        let node = store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();
        let l1 = store
            .insert_l1(NewL1 {
                name: "sub1".into(),
                subnet_id: Some("abc".into()),
                blockchain_id: None,
                vm: "subnet-evm".into(),
                status: L1Status::Configured,
            })
            .await
            .unwrap();
        store.insert_assignment(l1.id, node.id, 100).await.unwrap();
        assert!(matches!(
            store.insert_assignment(l1.id, node.id, 100).await,
            Err(StoreError::UniqueViolation { .. })
        ));
        assert!(store.insert_assignment(l1.id, 999, 100).await.is_err());
        assert!(store.delete_l1(l1.id).await.is_err());
        assert!(store.delete_node(node.id).await.is_err());
        assert_eq!(store.subnets_for_node(node.id).await.unwrap(), vec!["abc"]);
        assert!(store.delete_assignment(l1.id, node.id).await.unwrap());
        assert!(!store.delete_assignment(l1.id, node.id).await.unwrap());
        store.delete_l1(l1.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_events_newest_first() {
        let store = InMemoryFleetStore::new();
        for i in 0..3 {
            store
                .append_event(NewEvent {
                    kind: EventKind::HostOnline,
                    target: format!("h{i}"),
                    message: String::new(),
                    details: serde_json::Value::Null,
                })
                .await
                .unwrap();
        }
        let events = store.list_events(2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].target, "h2");
        assert_eq!(store.counts().await.unwrap().events, 3);
    }
}
