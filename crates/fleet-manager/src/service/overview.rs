//! Audit log reads and the whole-fleet status summary.

use async_trait::async_trait;

use super::FleetManager;
use crate::domain::{Event, FleetError, L1Detail, NodeSummary, StatusSummary};
use crate::ports::FleetOverviewApi;

#[async_trait]
impl FleetOverviewApi for FleetManager {
    async fn list_events(&self, limit: Option<usize>) -> Result<Vec<Event>, FleetError> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.default_event_limit);
        Ok(self.store.list_events(limit).await?)
    }

    async fn l1_dashboard(&self) -> Result<Vec<L1Detail>, FleetError> {
        let mut l1s = Vec::new();
        for entry in self.store.list_l1s().await? {
            let validators = self.store.list_validators(entry.l1.id).await?;
            l1s.push(L1Detail {
                l1: entry.l1,
                validators,
            });
        }
        Ok(l1s)
    }

    async fn status_summary(&self) -> Result<StatusSummary, FleetError> {
        let counts = self.store.counts().await?;
        let host_names = self.host_names().await?;

        let mut nodes = Vec::new();
        for node in self.store.list_nodes().await? {
            let l1s = self.store.l1s_for_node(node.id).await?;
            nodes.push(NodeSummary {
                host_name: host_names
                    .get(&node.host_id)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                id: node.id,
                name: node.name,
                image: node.image,
                identity: node.identity,
                staking_port: node.staking_port,
                status: node.status,
                l1s,
            });
        }

        Ok(StatusSummary {
            version: crate::VERSION.to_string(),
            counts,
            nodes,
            hosts: self.store.list_hosts().await?,
            l1s: self.l1_dashboard().await?,
        })
    }
}
