//! Shared harness: a fleet manager wired to simulated runtimes, an in-memory
//! store, and a scripted health probe.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fleet_manager::adapters::{
    InMemoryFleetStore, SimulatedConnector, SimulatedRuntime, StaticHealthProbe,
};
use fleet_manager::{
    CreateNodeRequest, Event, EventKind, FleetConfig, FleetDependencies, FleetManager,
    FleetOverviewApi, Node, NodeId, NodeLifecycleApi, NodeStatus,
};

/// Address the simulated remote host answers on.
pub const REMOTE_ADDRESS: &str = "ssh://ops@rack-2";

pub struct TestFleet {
    pub manager: FleetManager,
    pub local: Arc<SimulatedRuntime>,
    pub remote: Arc<SimulatedRuntime>,
    pub connector: Arc<SimulatedConnector>,
    pub store: Arc<InMemoryFleetStore>,
    pub probe: Arc<StaticHealthProbe>,
}

pub async fn fleet() -> TestFleet {
    fleet_with(FleetConfig::for_testing()).await
}

pub async fn fleet_with(config: FleetConfig) -> TestFleet {
    let local = Arc::new(SimulatedRuntime::new("rack-1"));
    let remote = Arc::new(SimulatedRuntime::new("rack-2"));
    let connector = Arc::new(SimulatedConnector::new());
    connector.add_host(REMOTE_ADDRESS, remote.clone());
    let store = Arc::new(InMemoryFleetStore::new());
    let probe = Arc::new(StaticHealthProbe::new(true));

    let manager = FleetManager::bootstrap(
        config,
        FleetDependencies {
            store: store.clone(),
            local_runtime: Arc::new(local.reconnect()),
            connector: connector.clone(),
            probe: probe.clone(),
        },
    )
    .await
    .expect("bootstrap");

    TestFleet {
        manager,
        local,
        remote,
        connector,
        store,
        probe,
    }
}

impl TestFleet {
    /// Wait for every background task to finish.
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.manager.tasks().drain())
            .await
            .expect("background tasks did not finish");
    }

    /// Create a node on the local host and wait for provisioning to end.
    pub async fn provisioned(&self, name: &str, port: u16) -> Node {
        let node = self
            .manager
            .create_node(CreateNodeRequest {
                staking_port: Some(port),
                ..CreateNodeRequest::named(name)
            })
            .await
            .expect("create node");
        self.settle().await;
        self.node(node.id).await
    }

    pub async fn node(&self, id: NodeId) -> Node {
        self.manager.get_node(id).await.expect("get node")
    }

    pub async fn status(&self, id: NodeId) -> NodeStatus {
        self.node(id).await.status
    }

    /// Every event, oldest first.
    pub async fn events(&self) -> Vec<Event> {
        let mut events = self
            .manager
            .list_events(Some(10_000))
            .await
            .expect("list events");
        events.reverse();
        events
    }

    pub async fn events_of(&self, kind: EventKind) -> Vec<Event> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

/// Poll until the node reaches `status` or the deadline passes.
pub async fn wait_for_status(manager: &FleetManager, id: NodeId, status: NodeStatus) -> Node {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let node = manager.get_node(id).await.expect("get node");
            if node.status == status {
                return node;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("node {id} never reached {status}"))
}
