//! # Validator Set Integration Tests
//!
//! L1 bookkeeping and the container rebuilds triggered by validator set
//! changes.
//!
//! ## Test Strategy
//!
//! 1. Membership changes on a pending L1 never touch containers.
//! 2. Membership changes on a configured L1 rebuild the node's container,
//!    passing through `creating`, with the full subnet list in its env.
//! 3. Removal guards: nodes and L1s with assignments cannot be deleted.

mod common;

use std::time::Duration;

use common::fleet;
use fleet_manager::adapters::RuntimeOp;
use fleet_manager::{
    container_name, CreateL1Request, ErrorKind, EventKind, L1Status, NodeLifecycleApi,
    NodeStatus, RuntimeError, ValidatorSetApi, DEFAULT_VM,
};

fn l1(name: &str, subnet: Option<&str>) -> CreateL1Request {
    CreateL1Request {
        name: name.to_string(),
        subnet_id: subnet.map(str::to_string),
        ..CreateL1Request::default()
    }
}

// =============================================================================
// L1 RECORDS
// =============================================================================

#[tokio::test]
async fn test_create_l1_status_follows_subnet() {
    let fleet = fleet().await;

    let pending = fleet.manager.create_l1(l1("sub1", None)).await.unwrap();
    let configured = fleet
        .manager
        .create_l1(l1("sub2", Some("abc")))
        .await
        .unwrap();

    assert_eq!(pending.status, L1Status::Pending);
    assert_eq!(pending.vm, DEFAULT_VM);
    assert_eq!(configured.status, L1Status::Configured);
    assert_eq!(configured.subnet_id.as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_duplicate_l1_name_is_a_conflict() {
    let fleet = fleet().await;
    fleet.manager.create_l1(l1("sub1", None)).await.unwrap();

    let err = fleet.manager.create_l1(l1("sub1", None)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(fleet.manager.list_l1s().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_subnet_can_only_be_assigned_once() {
    let fleet = fleet().await;
    let sub = fleet.manager.create_l1(l1("sub1", None)).await.unwrap();

    let assigned = fleet
        .manager
        .assign_subnet(sub.id, "abc", Some("chain-1"))
        .await
        .unwrap();
    let again = fleet.manager.assign_subnet(sub.id, "def", None).await;

    assert_eq!(assigned.status, L1Status::Configured);
    assert_eq!(assigned.blockchain_id.as_deref(), Some("chain-1"));
    assert_eq!(again.unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(fleet.events_of(EventKind::L1SubnetAssigned).await.len(), 1);
}

#[tokio::test]
async fn test_blank_subnet_is_rejected() {
    let fleet = fleet().await;
    let sub = fleet.manager.create_l1(l1("sub1", None)).await.unwrap();

    let err = fleet
        .manager
        .assign_subnet(sub.id, "  ", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    let detail = fleet.manager.get_l1(sub.id).await.unwrap();
    assert_eq!(detail.l1.status, L1Status::Pending);
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

#[tokio::test]
async fn test_pending_l1_membership_does_not_recreate_container() {
    // Arrange
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet.manager.create_l1(l1("sub2", None)).await.unwrap();

    // Act
    let assignment = fleet
        .manager
        .add_validator(sub.id, node.id, None)
        .await
        .expect("add validator");
    fleet.settle().await;

    // Assert
    assert_eq!(assignment.weight, 100);
    assert_eq!(fleet.local.create_count(), 1);
    assert_eq!(fleet.status(node.id).await, NodeStatus::Running);

    let validators = fleet.manager.list_validators(sub.id).await.unwrap();
    assert_eq!(validators.len(), 1);
    assert_eq!(validators[0].node_name, "n1");
    let l1s = fleet.manager.l1s_for_node(node.id).await.unwrap();
    assert_eq!(l1s[0].name, "sub2");
    assert_eq!(l1s[0].weight, 100);
}

#[tokio::test]
async fn test_assigning_subnet_reconfigures_validators() {
    // Arrange
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet.manager.create_l1(l1("sub2", None)).await.unwrap();
    fleet
        .manager
        .add_validator(sub.id, node.id, Some(20))
        .await
        .unwrap();
    fleet.settle().await;
    fleet
        .local
        .set_delay(RuntimeOp::Start, Duration::from_millis(200));

    // Act
    fleet
        .manager
        .assign_subnet(sub.id, "abc", None)
        .await
        .expect("assign subnet");

    // Assert: observed in creating while the new container starts
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fleet.status(node.id).await, NodeStatus::Creating);

    fleet.settle().await;
    let rebuilt = fleet.node(node.id).await;
    assert_eq!(rebuilt.status, NodeStatus::Running);
    assert_ne!(rebuilt.container_id, node.container_id);
    assert_eq!(fleet.local.create_count(), 2);

    let container = fleet
        .local
        .container_by_name(&container_name("n1"))
        .expect("rebuilt container");
    assert_eq!(container.config.tracked_subnets(), vec!["abc".to_string()]);

    let reconfigured = fleet.events_of(EventKind::NodeReconfigured).await;
    assert_eq!(reconfigured.len(), 1);
    assert_eq!(reconfigured[0].message, "Node reconfigured with 1 subnet(s)");
}

#[tokio::test]
async fn test_configured_l1_membership_tracks_every_subnet() {
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let a = fleet.manager.create_l1(l1("a", Some("abc"))).await.unwrap();
    let b = fleet.manager.create_l1(l1("b", Some("def"))).await.unwrap();

    fleet.manager.add_validator(a.id, node.id, None).await.unwrap();
    fleet.settle().await;
    fleet.manager.add_validator(b.id, node.id, None).await.unwrap();
    fleet.settle().await;

    let mut tracked = fleet
        .local
        .container_by_name(&container_name("n1"))
        .unwrap()
        .config
        .tracked_subnets();
    tracked.sort();
    assert_eq!(tracked, vec!["abc".to_string(), "def".to_string()]);
    assert_eq!(fleet.status(node.id).await, NodeStatus::Running);
    assert_eq!(fleet.local.containers().len(), 1);
}

#[tokio::test]
async fn test_removing_last_validator_keeps_l1_status() {
    // Arrange
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet
        .manager
        .create_l1(l1("sub2", Some("abc")))
        .await
        .unwrap();
    fleet.manager.add_validator(sub.id, node.id, None).await.unwrap();
    fleet.settle().await;

    // Act
    fleet
        .manager
        .remove_validator(sub.id, node.id)
        .await
        .expect("remove validator");
    fleet.settle().await;

    // Assert
    let detail = fleet.manager.get_l1(sub.id).await.unwrap();
    assert_eq!(detail.l1.status, L1Status::Configured);
    assert!(detail.validators.is_empty());
    assert_eq!(fleet.status(node.id).await, NodeStatus::Running);
    let container = fleet
        .local
        .container_by_name(&container_name("n1"))
        .unwrap();
    assert!(container.config.tracked_subnets().is_empty());
}

#[tokio::test]
async fn test_duplicate_validator_is_a_conflict() {
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet.manager.create_l1(l1("sub2", None)).await.unwrap();
    fleet.manager.add_validator(sub.id, node.id, None).await.unwrap();

    let err = fleet
        .manager
        .add_validator(sub.id, node.id, Some(5))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.to_string(), "node n1 is already a validator for L1 sub2");
}

#[tokio::test]
async fn test_remove_unknown_validator_is_not_found() {
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet.manager.create_l1(l1("sub2", None)).await.unwrap();

    let err = fleet
        .manager
        .remove_validator(sub.id, node.id)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_failed_reconfiguration_marks_node_failed() {
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet
        .manager
        .create_l1(l1("sub2", Some("abc")))
        .await
        .unwrap();
    fleet
        .local
        .fail(RuntimeOp::Create, RuntimeError::Engine("no space left".into()));

    fleet.manager.add_validator(sub.id, node.id, None).await.unwrap();
    fleet.settle().await;

    let node = fleet.node(node.id).await;
    assert_eq!(node.status, NodeStatus::Failed);
    assert_eq!(node.container_id, None);
    let failed = fleet.events_of(EventKind::NodeFailed).await;
    assert!(failed[0]
        .message
        .starts_with("Reconfiguration failed at container create"));
}

// =============================================================================
// REMOVAL GUARDS
// =============================================================================

#[tokio::test]
async fn test_assigned_node_cannot_be_deleted() {
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet.manager.create_l1(l1("sub2", None)).await.unwrap();
    fleet.manager.add_validator(sub.id, node.id, None).await.unwrap();

    let err = fleet.manager.delete_node(node.id, false).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "node has 1 validator assignment(s), remove them first"
    );
    assert_eq!(fleet.local.containers().len(), 1);
}

#[tokio::test]
async fn test_l1_with_validators_cannot_be_deleted() {
    // Arrange
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet.manager.create_l1(l1("sub2", None)).await.unwrap();
    fleet.manager.add_validator(sub.id, node.id, None).await.unwrap();

    // Act + Assert
    let err = fleet.manager.delete_l1(sub.id).await.unwrap_err();
    assert_eq!(err.to_string(), "L1 has 1 validator(s), remove them first");

    fleet.manager.remove_validator(sub.id, node.id).await.unwrap();
    fleet.manager.delete_l1(sub.id).await.expect("delete l1");
    assert!(fleet.manager.list_l1s().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_l1s_counts_validators() {
    let fleet = fleet().await;
    let n1 = fleet.provisioned("n1", 9651).await;
    let n2 = fleet.provisioned("n2", 9661).await;
    let sub = fleet.manager.create_l1(l1("sub2", None)).await.unwrap();
    fleet.manager.add_validator(sub.id, n1.id, None).await.unwrap();
    fleet.manager.add_validator(sub.id, n2.id, Some(7)).await.unwrap();

    let listed = fleet.manager.list_l1s().await.unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].validator_count, 2);
}
