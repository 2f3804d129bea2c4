//! # Host Registry
//!
//! Maps host ids to live runtime clients.
//!
//! ## Lock discipline
//!
//! Remote clients sit behind one `parking_lot::RwLock`. Readers (pollers,
//! operation handlers) clone the `Arc` out and release the lock before any
//! await. Writers (host add/remove, reconnect) swap entries under the write
//! lock and close the displaced client after releasing it. The local client
//! is held outside the map and is never replaced or closed here.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::HostId;
use crate::ports::ContainerRuntime;

/// Concurrency-safe host id → runtime client map.
pub struct HostRegistry {
    local_id: HostId,
    local: Arc<dyn ContainerRuntime>,
    remotes: RwLock<HashMap<HostId, Arc<dyn ContainerRuntime>>>,
}

impl HostRegistry {
    pub fn new(local_id: HostId, local: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            local_id,
            local,
            remotes: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> HostId {
        self.local_id
    }

    pub fn local(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.local)
    }

    /// Client for a host, if one is live.
    pub fn get(&self, host: HostId) -> Option<Arc<dyn ContainerRuntime>> {
        if host == self.local_id {
            return Some(self.local());
        }
        self.remotes.read().get(&host).cloned()
    }

    pub fn contains(&self, host: HostId) -> bool {
        host == self.local_id || self.remotes.read().contains_key(&host)
    }

    /// Register a remote client, closing any client it replaces.
    pub async fn register(&self, host: HostId, client: Arc<dyn ContainerRuntime>) {
        if host == self.local_id {
            warn!(host_id = host, "Refusing to replace the local runtime client");
            return;
        }
        let previous = self.remotes.write().insert(host, client);
        if let Some(previous) = previous {
            debug!(host_id = host, "Closing replaced runtime client");
            previous.close().await;
        }
    }

    /// Remove and close a remote client. Returns whether one was registered.
    pub async fn unregister(&self, host: HostId) -> bool {
        let removed = self.remotes.write().remove(&host);
        match removed {
            Some(client) => {
                client.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every remote client. The local client is left open.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.remotes.write().drain().collect();
        for (host, client) in drained {
            debug!(host_id = host, "Closing runtime client");
            client.close().await;
        }
    }

    /// Every live client, local first.
    pub fn snapshot(&self) -> Vec<(HostId, Arc<dyn ContainerRuntime>)> {
        let mut out = vec![(self.local_id, self.local())];
        let remotes = self.remotes.read();
        let mut ids: Vec<_> = remotes.keys().copied().collect();
        ids.sort_unstable();
        out.extend(ids.into_iter().filter_map(|id| {
            remotes.get(&id).map(|client| (id, Arc::clone(client)))
        }));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedRuntime;

    fn registry() -> (HostRegistry, Arc<SimulatedRuntime>) {
        let local = Arc::new(SimulatedRuntime::new("local"));
        (HostRegistry::new(1, local.clone()), local)
    }

    #[tokio::test]
    async fn test_local_client_always_present() {
        let (registry, _) = registry();
        assert!(registry.get(1).is_some());
        assert!(registry.get(2).is_none());
        assert!(!registry.unregister(1).await);
        assert!(registry.get(1).is_some());
    }

    #[tokio::test]
    async fn test_register_replaces_and_closes_previous() {
        let (registry, _) = registry();
        let first = Arc::new(SimulatedRuntime::new("r1"));
        let second = Arc::new(SimulatedRuntime::new("r1"));
        registry.register(2, first.clone()).await;
        registry.register(2, second.clone()).await;
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(registry.contains(2));
    }

    #[tokio::test]
    async fn test_unregister_closes_client() {
        let (registry, _) = registry();
        let remote = Arc::new(SimulatedRuntime::new("r1"));
        registry.register(2, remote.clone()).await;
        assert!(registry.unregister(2).await);
        assert!(remote.is_closed());
        assert!(registry.get(2).is_none());
    }

    #[tokio::test]
    async fn test_close_all_spares_local() {
        let (registry, local) = registry();
        let remote = Arc::new(SimulatedRuntime::new("r1"));
        registry.register(2, remote.clone()).await;
        registry.close_all().await;
        assert!(remote.is_closed());
        assert!(!local.is_closed());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_register_local_id_is_ignored() {
        let (registry, local) = registry();
        registry
            .register(1, Arc::new(SimulatedRuntime::new("impostor")))
            .await;
        assert!(!local.is_closed());
        assert_eq!(registry.snapshot().len(), 1);
    }
}
