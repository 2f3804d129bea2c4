//! Host pool: register and remove remote hosts, open their runtime clients.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::FleetManager;
use crate::domain::{
    invariant_name_present, EventKind, FleetError, Host, HostId, HostStatus, NewHost,
    RuntimeError, LOCAL_HOST_NAME,
};
use crate::ports::{AddHostRequest, ContainerRuntime, HostApi, RuntimeHostInfo};

impl FleetManager {
    /// Connect to a remote runtime and check it answers. The client is
    /// closed again if the ping fails.
    pub(crate) async fn open_remote(
        &self,
        address: &str,
    ) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
        let client = self.connector.connect(address).await?;
        if let Err(e) = client.ping().await {
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Connect every persisted remote host. Hosts that cannot be reached are
    /// marked unreachable and left to the host poller.
    pub(crate) async fn connect_remote_hosts(&self) {
        let hosts = match self.store.list_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(error = %e, "Could not list hosts");
                return;
            }
        };

        for host in hosts {
            let Some(address) = host.remote_address.as_deref().filter(|a| !a.is_empty()) else {
                continue;
            };
            let status = match self.open_remote(address).await {
                Ok(client) => {
                    self.registry.register(host.id, client).await;
                    info!(host = %host.name, %address, "Remote host connected");
                    HostStatus::Online
                }
                Err(e) => {
                    warn!(host = %host.name, %address, error = %e, "Remote host unreachable");
                    HostStatus::Unreachable
                }
            };
            if status != host.status {
                if let Err(e) = self.store.set_host_status(host.id, status).await {
                    warn!(host = %host.name, error = %e, "Could not update host status");
                }
            }
        }
    }

    /// Display name of every host by id.
    pub(crate) async fn host_names(&self) -> Result<HashMap<HostId, String>, FleetError> {
        Ok(self
            .store
            .list_hosts()
            .await?
            .into_iter()
            .map(|h| (h.id, h.display_name().to_string()))
            .collect())
    }
}

/// Ping, read host facts, and create the managed network on a new host.
async fn prepare_host(
    client: &dyn ContainerRuntime,
    network: &str,
) -> Result<RuntimeHostInfo, FleetError> {
    client
        .ping()
        .await
        .map_err(|e| FleetError::runtime("ping host", e))?;
    let info = client
        .host_info()
        .await
        .map_err(|e| FleetError::runtime("host info", e))?;
    client
        .ensure_network(network)
        .await
        .map_err(|e| FleetError::runtime("ensure network", e))?;
    Ok(info)
}

#[async_trait]
impl HostApi for FleetManager {
    async fn add_host(&self, request: AddHostRequest) -> Result<Host, FleetError> {
        let name = request.name.trim();
        invariant_name_present("host", name)?;
        let address = request.remote_address.trim();
        if address.is_empty() {
            return Err(FleetError::Validation("remote address is required".into()));
        }
        if name == LOCAL_HOST_NAME {
            return Err(FleetError::Validation(format!(
                "host name {LOCAL_HOST_NAME:?} is reserved"
            )));
        }
        if self.store.host_name_exists(name).await? {
            return Err(FleetError::Conflict(format!("host {name:?} already exists")));
        }

        let client = self
            .connector
            .connect(address)
            .await
            .map_err(|e| FleetError::runtime(format!("connect to {address}"), e))?;
        let info = match prepare_host(client.as_ref(), &self.config.docker_network).await {
            Ok(info) => info,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };

        let inserted = self
            .store
            .insert_host(NewHost {
                name: name.to_string(),
                remote_address: address.to_string(),
                labels: info.labels(),
                status: HostStatus::Online,
            })
            .await;
        let host = match inserted {
            Ok(host) => host,
            Err(e) => {
                client.close().await;
                return Err(FleetError::from_store(e, || {
                    format!("host {name:?} already exists")
                }));
            }
        };
        self.registry.register(host.id, client).await;

        info!(host = %host.name, %address, host_id = host.id, "Host added");
        self.events
            .record_with(
                EventKind::HostAdded,
                &host.name,
                format!("Host added at {address}"),
                serde_json::to_value(&host.labels).unwrap_or_default(),
            )
            .await;
        Ok(host)
    }

    async fn remove_host(&self, id: HostId) -> Result<(), FleetError> {
        let host = self.get_host(id).await?;
        if host.id == self.local_host_id() || host.is_local() {
            return Err(FleetError::Validation("cannot remove the local host".into()));
        }
        let nodes = self.store.count_nodes_on_host(id).await?;
        if nodes > 0 {
            return Err(FleetError::Validation(format!(
                "host has {nodes} node(s), remove them first"
            )));
        }

        self.store.delete_host(id).await?;
        self.registry.unregister(id).await;

        info!(host = %host.name, host_id = id, "Host removed");
        self.events
            .record(EventKind::HostRemoved, &host.name, "Host removed")
            .await;
        Ok(())
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, FleetError> {
        Ok(self.store.list_hosts().await?)
    }

    async fn get_host(&self, id: HostId) -> Result<Host, FleetError> {
        self.store
            .get_host(id)
            .await?
            .ok_or_else(|| FleetError::not_found("host", id))
    }
}
