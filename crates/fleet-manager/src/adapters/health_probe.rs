//! # Node Health Probes
//!
//! - [`JsonRpcHealthProbe`]: JSON-RPC over HTTP to the node's API, addressed
//!   by container name on the managed network.
//! - [`StaticHealthProbe`]: scripted answers for tests and dry runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::ProbeError;
use crate::ports::NodeHealthProbe;

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct HealthResult {
    healthy: bool,
}

#[derive(Deserialize)]
struct NodeIdResult {
    #[serde(rename = "nodeID")]
    node_id: String,
}

/// Probe speaking the node's JSON-RPC API.
pub struct JsonRpcHealthProbe {
    client: reqwest::Client,
    http_port: u16,
}

impl JsonRpcHealthProbe {
    pub fn new(http_port: u16, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        Ok(Self { client, http_port })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        container_name: &str,
        path: &str,
        method: &str,
    ) -> Result<T, ProbeError> {
        let url = format!("http://{container_name}:{}{path}", self.http_port);
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let decoded: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ProbeError::Decode(e.to_string()))?;
        Ok(decoded.result)
    }
}

#[async_trait]
impl NodeHealthProbe for JsonRpcHealthProbe {
    async fn check_health(&self, container_name: &str) -> Result<bool, ProbeError> {
        let result: HealthResult = self
            .call(container_name, "/ext/health", "health.health")
            .await?;
        Ok(result.healthy)
    }

    async fn node_identity(&self, container_name: &str) -> Result<String, ProbeError> {
        let result: NodeIdResult = self
            .call(container_name, "/ext/info", "info.getNodeID")
            .await?;
        Ok(result.node_id)
    }
}

/// Scripted probe.
pub struct StaticHealthProbe {
    default_healthy: bool,
    health: RwLock<HashMap<String, Option<bool>>>,
    identities: RwLock<HashMap<String, String>>,
    identity_calls: RwLock<HashMap<String, usize>>,
}

impl StaticHealthProbe {
    /// Every container answers `default_healthy` unless scripted otherwise.
    pub fn new(default_healthy: bool) -> Self {
        Self {
            default_healthy,
            health: RwLock::new(HashMap::new()),
            identities: RwLock::new(HashMap::new()),
            identity_calls: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_healthy(&self, container_name: &str, healthy: bool) {
        self.health
            .write()
            .insert(container_name.to_string(), Some(healthy));
    }

    /// Make requests to `container_name` fail at the transport level.
    pub fn set_unreachable(&self, container_name: &str) {
        self.health.write().insert(container_name.to_string(), None);
    }

    pub fn set_identity(&self, container_name: &str, identity: &str) {
        self.identities
            .write()
            .insert(container_name.to_string(), identity.to_string());
    }

    pub fn identity_calls(&self, container_name: &str) -> usize {
        self.identity_calls
            .read()
            .get(container_name)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl NodeHealthProbe for StaticHealthProbe {
    async fn check_health(&self, container_name: &str) -> Result<bool, ProbeError> {
        match self.health.read().get(container_name) {
            Some(Some(healthy)) => Ok(*healthy),
            Some(None) => Err(ProbeError::Transport("connection refused".into())),
            None => Ok(self.default_healthy),
        }
    }

    async fn node_identity(&self, container_name: &str) -> Result<String, ProbeError> {
        *self
            .identity_calls
            .write()
            .entry(container_name.to_string())
            .or_default() += 1;
        self.identities
            .read()
            .get(container_name)
            .cloned()
            .ok_or_else(|| ProbeError::Decode("missing nodeID".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_payloads_decode() {
        let health: RpcResponse<HealthResult> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"healthy":true,"checks":{}}}"#)
                .unwrap();
        assert!(health.result.healthy);

        let info: RpcResponse<NodeIdResult> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{"nodeID":"NodeID-7Xhw2","nodePOP":{}}}"#,
        )
        .unwrap();
        assert_eq!(info.result.node_id, "NodeID-7Xhw2");
    }

    #[test]
    fn test_error_payload_is_malformed() {
        let parsed: Result<RpcResponse<HealthResult>, _> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000}}"#);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_unresolvable_container_is_transport_error() {
        let probe = JsonRpcHealthProbe::new(9650, Duration::from_millis(200)).unwrap();
        let result = probe.check_health("avax-does-not-exist.invalid").await;
        assert!(matches!(result, Err(ProbeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_static_probe_scripting() {
        let probe = StaticHealthProbe::new(true);
        assert!(probe.check_health("avax-a").await.unwrap());
        probe.set_healthy("avax-a", false);
        assert!(!probe.check_health("avax-a").await.unwrap());
        probe.set_unreachable("avax-a");
        assert!(probe.check_health("avax-a").await.is_err());
        assert!(probe.node_identity("avax-a").await.is_err());
        probe.set_identity("avax-a", "NodeID-1");
        assert_eq!(probe.node_identity("avax-a").await.unwrap(), "NodeID-1");
        assert_eq!(probe.identity_calls("avax-a"), 2);
    }
}
