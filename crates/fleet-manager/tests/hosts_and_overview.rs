//! # Host Pool and Overview Integration Tests
//!
//! Startup, remote host registration and removal, nodes placed on remote
//! hosts, the audit log, and the status summary.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fleet, REMOTE_ADDRESS};
use fleet_manager::adapters::{
    InMemoryFleetStore, SimulatedConnector, SimulatedRuntime, StaticHealthProbe,
};
use fleet_manager::{
    container_name, AddHostRequest, CreateL1Request, CreateNodeRequest, ErrorKind, EventKind,
    FleetConfig, FleetDependencies, FleetManager, FleetOverviewApi, HostApi, HostStatus,
    NodeLifecycleApi, NodeStatus, ValidatorSetApi, LOCAL_HOST_NAME,
};

fn rack_2() -> AddHostRequest {
    AddHostRequest {
        name: "rack-2".into(),
        remote_address: REMOTE_ADDRESS.into(),
    }
}

// =============================================================================
// STARTUP
// =============================================================================

#[tokio::test]
async fn test_bootstrap_registers_local_host_and_network() {
    let fleet = fleet().await;

    let hosts = fleet.manager.list_hosts().await.unwrap();

    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].name, LOCAL_HOST_NAME);
    assert!(hosts[0].is_local());
    assert_eq!(hosts[0].display_name(), "rack-1");
    assert_eq!(hosts[0].id, fleet.manager.local_host_id());
    assert!(fleet.local.has_network("avax"));
}

#[tokio::test]
async fn test_bootstrap_fails_without_local_runtime() {
    let local = SimulatedRuntime::new("rack-1");
    local.set_reachable(false);

    let result = FleetManager::bootstrap(
        FleetConfig::for_testing(),
        FleetDependencies {
            store: Arc::new(InMemoryFleetStore::new()),
            local_runtime: Arc::new(local),
            connector: Arc::new(SimulatedConnector::new()),
            probe: Arc::new(StaticHealthProbe::new(true)),
        },
    )
    .await;

    assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Infra));
}

#[tokio::test]
async fn test_restart_marks_unreachable_remote_host() {
    // Arrange: a store that already knows a remote host
    let fleet = fleet().await;
    let host = fleet.manager.add_host(rack_2()).await.unwrap();
    fleet.manager.close().await;
    fleet.remote.set_reachable(false);

    // Act
    let restarted = FleetManager::bootstrap(
        FleetConfig::for_testing(),
        FleetDependencies {
            store: fleet.store.clone(),
            local_runtime: Arc::new(fleet.local.reconnect()),
            connector: fleet.connector.clone(),
            probe: fleet.probe.clone(),
        },
    )
    .await
    .expect("startup tolerates unreachable remotes");

    // Assert
    let host = restarted.get_host(host.id).await.unwrap();
    assert_eq!(host.status, HostStatus::Unreachable);
    assert!(!restarted.registry().contains(host.id));
    assert_eq!(restarted.list_hosts().await.unwrap().len(), 2);
}

// =============================================================================
// REMOTE HOSTS
// =============================================================================

#[tokio::test]
async fn test_add_host_prepares_runtime() {
    let fleet = fleet().await;

    let host = fleet.manager.add_host(rack_2()).await.expect("add host");

    assert_eq!(host.status, HostStatus::Online);
    assert_eq!(host.remote_address.as_deref(), Some(REMOTE_ADDRESS));
    assert_eq!(host.display_name(), "rack-2");
    assert!(fleet.remote.has_network("avax"));
    assert!(fleet.manager.registry().contains(host.id));
    assert_eq!(fleet.events_of(EventKind::HostAdded).await.len(), 1);
}

#[tokio::test]
async fn test_add_host_rejections() {
    let fleet = fleet().await;
    fleet.manager.add_host(rack_2()).await.unwrap();

    let duplicate = fleet.manager.add_host(rack_2()).await.unwrap_err();
    let reserved = fleet
        .manager
        .add_host(AddHostRequest {
            name: LOCAL_HOST_NAME.into(),
            remote_address: REMOTE_ADDRESS.into(),
        })
        .await
        .unwrap_err();
    let no_address = fleet
        .manager
        .add_host(AddHostRequest {
            name: "rack-3".into(),
            remote_address: " ".into(),
        })
        .await
        .unwrap_err();
    let no_route = fleet
        .manager
        .add_host(AddHostRequest {
            name: "rack-3".into(),
            remote_address: "ssh://ops@rack-3".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(duplicate.kind(), ErrorKind::Conflict);
    assert_eq!(reserved.kind(), ErrorKind::Validation);
    assert_eq!(no_address.kind(), ErrorKind::Validation);
    assert_eq!(no_route.kind(), ErrorKind::Infra);
    assert_eq!(fleet.manager.list_hosts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_node_on_remote_host_runs_there() {
    // Arrange
    let fleet = fleet().await;
    let host = fleet.manager.add_host(rack_2()).await.unwrap();

    // Act
    let node = fleet
        .manager
        .create_node(CreateNodeRequest {
            host_id: Some(host.id),
            ..CreateNodeRequest::named("r1")
        })
        .await
        .unwrap();
    fleet.settle().await;

    // Assert
    assert_eq!(fleet.status(node.id).await, NodeStatus::Running);
    assert!(fleet.remote.container_by_name(&container_name("r1")).is_some());
    assert!(fleet.local.containers().is_empty());

    // Same port on another host is fine.
    let local = fleet.provisioned("l1", 9651).await;
    assert_eq!(local.status, NodeStatus::Running);
}

#[tokio::test]
async fn test_node_on_disconnected_host_is_rejected() {
    let fleet = fleet().await;
    let host = fleet.manager.add_host(rack_2()).await.unwrap();
    fleet.remote.set_reachable(false);
    fleet.manager.poll_hosts().await.unwrap();

    let err = fleet
        .manager
        .create_node(CreateNodeRequest {
            host_id: Some(host.id),
            ..CreateNodeRequest::named("r1")
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), format!("host {} not connected", host.id));
    assert!(fleet.manager.list_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_host_guards() {
    // Arrange
    let fleet = fleet().await;
    let host = fleet.manager.add_host(rack_2()).await.unwrap();
    let node = fleet
        .manager
        .create_node(CreateNodeRequest {
            host_id: Some(host.id),
            ..CreateNodeRequest::named("r1")
        })
        .await
        .unwrap();
    fleet.settle().await;

    // Act + Assert
    let err = fleet.manager.remove_host(host.id).await.unwrap_err();
    assert_eq!(err.to_string(), "host has 1 node(s), remove them first");

    let err = fleet
        .manager
        .remove_host(fleet.manager.local_host_id())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot remove the local host");

    fleet.manager.delete_node(node.id, true).await.unwrap();
    fleet.manager.remove_host(host.id).await.expect("remove host");
    assert!(!fleet.manager.registry().contains(host.id));
    assert_eq!(
        fleet.manager.get_host(host.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(fleet.events_of(EventKind::HostRemoved).await.len(), 1);
}

// =============================================================================
// EVENTS + SUMMARY
// =============================================================================

#[tokio::test]
async fn test_events_are_newest_first_and_limited() {
    let fleet = fleet().await;
    fleet.provisioned("n1", 9651).await;
    fleet.provisioned("n2", 9661).await;

    let latest = fleet.manager.list_events(Some(2)).await.unwrap();
    let defaulted = fleet.manager.list_events(Some(0)).await.unwrap();

    assert_eq!(latest.len(), 2);
    assert!(latest[0].id > latest[1].id);
    assert_eq!(latest[0].kind, EventKind::NodeRunning);
    assert_eq!(latest[0].target, "n2");
    assert_eq!(defaulted.len(), 4);

    let creating = fleet.events_of(EventKind::NodeCreating).await;
    assert_eq!(creating[0].details["staking_port"], 9651);
}

#[tokio::test]
async fn test_event_subscribers_see_new_events() {
    let fleet = fleet().await;
    let mut events = fleet.manager.events().subscribe();

    fleet
        .manager
        .create_l1(CreateL1Request {
            name: "sub1".into(),
            ..CreateL1Request::default()
        })
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event published")
        .expect("channel open");
    assert_eq!(event.kind, EventKind::L1Created);
    assert_eq!(event.target, "sub1");
}

#[tokio::test]
async fn test_status_summary_joins_hosts_and_l1s() {
    // Arrange
    let fleet = fleet().await;
    let node = fleet.provisioned("n1", 9651).await;
    let sub = fleet
        .manager
        .create_l1(CreateL1Request {
            name: "sub1".into(),
            ..CreateL1Request::default()
        })
        .await
        .unwrap();
    fleet
        .manager
        .add_validator(sub.id, node.id, Some(40))
        .await
        .unwrap();

    // Act
    let summary = fleet.manager.status_summary().await.unwrap();

    // Assert
    assert_eq!(summary.version, fleet_manager::VERSION);
    assert_eq!(summary.counts.hosts, 1);
    assert_eq!(summary.counts.nodes, 1);
    assert_eq!(summary.counts.l1s, 1);
    assert_eq!(summary.nodes[0].host_name, "rack-1");
    assert_eq!(summary.nodes[0].status, NodeStatus::Running);
    assert_eq!(summary.nodes[0].l1s[0].weight, 40);
    assert_eq!(summary.l1s[0].validators[0].node_name, "n1");
    assert_eq!(fleet.manager.l1_dashboard().await.unwrap(), summary.l1s);
}
