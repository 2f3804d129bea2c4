//! # Simulated Container Runtime
//!
//! In-process container engine implementing [`ContainerRuntime`] and
//! [`RuntimeConnector`]. Used for dry runs and tests: it records every call,
//! lets callers inject failures per operation, and can be flipped
//! unreachable to emulate a network partition.
//!
//! An engine is shared by every client handle opened against it, so a
//! reconnect sees the containers created through an earlier handle.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ContainerConfig, ContainerState, RuntimeError};
use crate::ports::{
    ByteStream, ContainerInspect, ContainerRuntime, ManagedContainer, RuntimeConnector,
    RuntimeHostInfo,
};

/// Runtime operations that can be failed on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Ping,
    HostInfo,
    EnsureNetwork,
    PullImage,
    ImageExists,
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
    Logs,
    List,
}

/// Recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Pull(String),
    Create(String),
    Start(String),
    Stop(String),
    Remove { id: String, volumes: bool },
}

/// A container held by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimContainer {
    pub id: String,
    pub name: String,
    pub config: ContainerConfig,
    pub state: ContainerState,
    pub logs: Vec<String>,
}

#[derive(Default)]
struct Engine {
    containers: BTreeMap<String, SimContainer>,
    images: HashSet<String>,
    networks: HashSet<String>,
    failures: HashMap<RuntimeOp, RuntimeError>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    unreachable: bool,
    delays: HashMap<RuntimeOp, Duration>,
    host_info: RuntimeHostInfo,
}

impl Engine {
    fn check(&self, op: RuntimeOp) -> Result<(), RuntimeError> {
        if self.unreachable {
            return Err(RuntimeError::Connection("host unreachable".into()));
        }
        match self.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut SimContainer, RuntimeError> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }
}

/// Client handle onto a simulated engine.
pub struct SimulatedRuntime {
    engine: Arc<Mutex<Engine>>,
    closed: AtomicBool,
}

impl SimulatedRuntime {
    /// Fresh engine reporting `hostname` in its host info.
    pub fn new(hostname: &str) -> Self {
        let engine = Engine {
            host_info: RuntimeHostInfo {
                hostname: hostname.to_string(),
                os: "linux".into(),
                arch: "x86_64".into(),
                cpus: 8,
                memory_bytes: 16 * 1024 * 1024 * 1024,
                server_version: "27.0.1".into(),
            },
            ..Engine::default()
        };
        Self {
            engine: Arc::new(Mutex::new(engine)),
            closed: AtomicBool::new(false),
        }
    }

    /// New client handle onto the same engine.
    pub fn reconnect(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail every call of `op` with `err` until cleared.
    pub fn fail(&self, op: RuntimeOp, err: RuntimeError) {
        self.engine.lock().failures.insert(op, err);
    }

    pub fn clear_failure(&self, op: RuntimeOp) {
        self.engine.lock().failures.remove(&op);
    }

    /// Make every call fail with a connection error.
    pub fn set_reachable(&self, reachable: bool) {
        self.engine.lock().unreachable = !reachable;
    }

    /// Hold every call of `op` for `delay` before it takes effect. A pull is
    /// recorded first and held before the image lands.
    pub fn set_delay(&self, op: RuntimeOp, delay: Duration) {
        self.engine.lock().delays.insert(op, delay);
    }

    pub fn set_host_info(&self, info: RuntimeHostInfo) {
        self.engine.lock().host_info = info;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.engine.lock().calls.clone()
    }

    /// Number of container creations so far.
    pub fn create_count(&self) -> usize {
        self.engine
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Create(_)))
            .count()
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.engine.lock().networks.contains(name)
    }

    pub fn containers(&self) -> Vec<SimContainer> {
        self.engine.lock().containers.values().cloned().collect()
    }

    pub fn container_by_name(&self, name: &str) -> Option<SimContainer> {
        self.engine
            .lock()
            .containers
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Change a container's state behind the manager's back.
    pub fn set_container_state(&self, name: &str, state: ContainerState) {
        let mut engine = self.engine.lock();
        if let Some(c) = engine.containers.values_mut().find(|c| c.name == name) {
            c.state = state;
        }
    }

    /// Delete a container behind the manager's back.
    pub fn remove_out_of_band(&self, name: &str) {
        self.engine.lock().containers.retain(|_, c| c.name != name);
    }

    pub fn push_log(&self, name: &str, line: &str) {
        let mut engine = self.engine.lock();
        if let Some(c) = engine.containers.values_mut().find(|c| c.name == name) {
            c.logs.push(line.to_string());
        }
    }

    fn guard(&self) -> Result<(), RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }

    /// Closed check, then any delay set for `op`.
    async fn enter(&self, op: RuntimeOp) -> Result<(), RuntimeError> {
        self.guard()?;
        self.pause(op).await;
        Ok(())
    }

    async fn pause(&self, op: RuntimeOp) {
        let delay = self.engine.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Ping).await?;
        self.engine.lock().check(RuntimeOp::Ping)
    }

    async fn host_info(&self) -> Result<RuntimeHostInfo, RuntimeError> {
        self.enter(RuntimeOp::HostInfo).await?;
        let engine = self.engine.lock();
        engine.check(RuntimeOp::HostInfo)?;
        Ok(engine.host_info.clone())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::EnsureNetwork).await?;
        let mut engine = self.engine.lock();
        engine.check(RuntimeOp::EnsureNetwork)?;
        engine.networks.insert(name.to_string());
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<ByteStream, RuntimeError> {
        self.guard()?;
        {
            let mut engine = self.engine.lock();
            engine.check(RuntimeOp::PullImage)?;
            engine.calls.push(RuntimeCall::Pull(reference.to_string()));
        }
        self.pause(RuntimeOp::PullImage).await;
        self.engine.lock().images.insert(reference.to_string());
        let progress = vec![
            Ok(Bytes::from(format!("{{\"status\":\"Pulling {reference}\"}}\n"))),
            Ok(Bytes::from_static(b"{\"status\":\"Download complete\"}\n")),
        ];
        Ok(Box::pin(stream::iter(progress)))
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError> {
        self.enter(RuntimeOp::ImageExists).await?;
        let engine = self.engine.lock();
        engine.check(RuntimeOp::ImageExists)?;
        Ok(engine.images.contains(reference))
    }

    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> Result<String, RuntimeError> {
        self.enter(RuntimeOp::Create).await?;
        let mut engine = self.engine.lock();
        engine.check(RuntimeOp::Create)?;
        engine.calls.push(RuntimeCall::Create(name.to_string()));
        if engine.containers.values().any(|c| c.name == name) {
            return Err(RuntimeError::Engine(format!(
                "Conflict. The container name \"/{name}\" is already in use"
            )));
        }
        engine.next_id += 1;
        let id = format!("sim{:012x}", engine.next_id);
        engine.containers.insert(
            id.clone(),
            SimContainer {
                id: id.clone(),
                name: name.to_string(),
                config: config.clone(),
                state: ContainerState::Created,
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Start).await?;
        let mut engine = self.engine.lock();
        engine.check(RuntimeOp::Start)?;
        engine.calls.push(RuntimeCall::Start(id.to_string()));
        engine.container_mut(id)?.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Stop).await?;
        let mut engine = self.engine.lock();
        engine.check(RuntimeOp::Stop)?;
        engine.calls.push(RuntimeCall::Stop(id.to_string()));
        engine.container_mut(id)?.state = ContainerState::Exited;
        Ok(())
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Remove).await?;
        let mut engine = self.engine.lock();
        engine.check(RuntimeOp::Remove)?;
        engine.calls.push(RuntimeCall::Remove {
            id: id.to_string(),
            volumes: remove_volumes,
        });
        match engine.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound {
                kind: "container",
                id: id.to_string(),
            }),
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
        self.enter(RuntimeOp::Inspect).await?;
        let mut engine = self.engine.lock();
        engine.check(RuntimeOp::Inspect)?;
        let c = engine.container_mut(id)?;
        Ok(ContainerInspect {
            id: c.id.clone(),
            name: c.name.clone(),
            state: c.state.clone(),
        })
    }

    async fn container_logs(&self, id: &str, tail: &str) -> Result<ByteStream, RuntimeError> {
        self.enter(RuntimeOp::Logs).await?;
        let mut engine = self.engine.lock();
        engine.check(RuntimeOp::Logs)?;
        let logs = engine.container_mut(id)?.logs.clone();
        let skip = match tail.parse::<usize>() {
            Ok(n) => logs.len().saturating_sub(n),
            Err(_) => 0,
        };
        let chunks: Vec<Result<Bytes, RuntimeError>> = logs
            .into_iter()
            .skip(skip)
            .map(|line| Ok(Bytes::from(format!("{line}\n"))))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>, RuntimeError> {
        self.enter(RuntimeOp::List).await?;
        let engine = self.engine.lock();
        engine.check(RuntimeOp::List)?;
        Ok(engine
            .containers
            .values()
            .map(|c| ManagedContainer {
                id: c.id.clone(),
                name: c.name.clone(),
                state: c.state.clone(),
            })
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Connector resolving remote addresses to simulated engines.
#[derive(Default)]
pub struct SimulatedConnector {
    engines: Mutex<HashMap<String, Arc<SimulatedRuntime>>>,
    attempts: Mutex<Vec<String>>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `address` resolve to `runtime`'s engine.
    pub fn add_host(&self, address: &str, runtime: Arc<SimulatedRuntime>) {
        self.engines.lock().insert(address.to_string(), runtime);
    }

    /// Connection attempts made to `address`.
    pub fn attempts(&self, address: &str) -> usize {
        self.attempts.lock().iter().filter(|a| *a == address).count()
    }
}

#[async_trait]
impl RuntimeConnector for SimulatedConnector {
    async fn connect(
        &self,
        remote_address: &str,
    ) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
        self.attempts.lock().push(remote_address.to_string());
        let engine = self.engines.lock().get(remote_address).cloned();
        match engine {
            Some(runtime) => Ok(Arc::new(runtime.reconnect())),
            None => Err(RuntimeError::Connection(format!(
                "dial {remote_address}: no route to host"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn config() -> ContainerConfig {
        crate::domain::NodeContainerSpec {
            node_name: "n1".into(),
            image: "img".into(),
            network: "avax".into(),
            network_id: "local".into(),
            staking_port: 9651,
            expose_http: false,
            track_subnets: vec![],
        }
        .build()
    }

    #[tokio::test]
    async fn test_delay_holds_any_operation() {
        let rt = SimulatedRuntime::new("rack-1");
        rt.set_delay(RuntimeOp::Ping, Duration::from_millis(50));

        let started = std::time::Instant::now();
        rt.ping().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));

        let started = std::time::Instant::now();
        rt.host_info().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let rt = SimulatedRuntime::new("box");
        let id = rt.create_container("avax-n1", &config()).await.unwrap();
        assert_eq!(
            rt.inspect_container(&id).await.unwrap().state,
            ContainerState::Created
        );
        rt.start_container(&id).await.unwrap();
        assert!(rt.inspect_container(&id).await.unwrap().state.is_running());
        rt.stop_container(&id, Duration::ZERO).await.unwrap();
        rt.remove_container(&id, true).await.unwrap();
        assert!(rt
            .remove_container(&id, true)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let rt = SimulatedRuntime::new("box");
        rt.fail(RuntimeOp::Start, RuntimeError::Engine("port busy".into()));
        let id = rt.create_container("avax-n1", &config()).await.unwrap();
        assert!(rt.start_container(&id).await.is_err());
        rt.clear_failure(RuntimeOp::Start);
        assert!(rt.start_container(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_calls() {
        let rt = SimulatedRuntime::new("box");
        let other = rt.reconnect();
        rt.close().await;
        assert!(matches!(rt.ping().await, Err(RuntimeError::Closed)));
        assert!(other.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_logs_honour_tail() {
        let rt = SimulatedRuntime::new("box");
        let id = rt.create_container("avax-n1", &config()).await.unwrap();
        for i in 0..5 {
            rt.push_log("avax-n1", &format!("line {i}"));
        }
        let chunks: Vec<_> = rt.container_logs(&id, "2").await.unwrap().collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].as_ref().unwrap(), &Bytes::from("line 4\n"));
    }

    #[tokio::test]
    async fn test_connector_shares_engine() {
        let remote = Arc::new(SimulatedRuntime::new("remote"));
        let connector = SimulatedConnector::new();
        connector.add_host("ssh://remote", remote.clone());
        let client = connector.connect("ssh://remote").await.unwrap();
        client.create_container("avax-n2", &config()).await.unwrap();
        assert!(remote.container_by_name("avax-n2").is_some());
        assert!(connector.connect("ssh://nowhere").await.is_err());
        assert_eq!(connector.attempts("ssh://remote"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_engine() {
        let rt = SimulatedRuntime::new("box");
        rt.set_reachable(false);
        assert!(matches!(rt.ping().await, Err(RuntimeError::Connection(_))));
    }
}
