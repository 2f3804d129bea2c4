//! Host poller: probe remote hosts, flip their status, reconnect.

use async_trait::async_trait;
use fleet_telemetry::{metric_inc, HOSTS_UNREACHABLE, HOST_PROBES};
use tracing::{debug, info, warn};

use super::FleetManager;
use crate::domain::{EventKind, FleetError, Host, HostStatus};
use crate::poller::PollCycle;

/// Result of one host poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostPollReport {
    /// Remote hosts probed.
    pub probed: usize,
    /// Hosts that answered, including ones reconnected this cycle.
    pub online: usize,
    /// Hosts that came back through a fresh connection.
    pub reconnected: usize,
}

pub(super) struct HostPoll(pub(super) FleetManager);

#[async_trait]
impl PollCycle for HostPoll {
    fn name(&self) -> &'static str {
        "hosts"
    }

    async fn run_cycle(&self) {
        if let Err(e) = self.0.poll_hosts().await {
            warn!(error = %e, "Host poll cycle failed");
        }
    }
}

impl FleetManager {
    /// Run one host poll cycle.
    ///
    /// Reachable hosts are marked online. An unreachable host is marked
    /// unreachable, its client is dropped, and one fresh connection is tried.
    /// If any host came back, reconciliation runs again.
    pub async fn poll_hosts(&self) -> Result<HostPollReport, FleetError> {
        let mut report = HostPollReport::default();

        for host in self.store.list_hosts().await? {
            let Some(address) = host.remote_address.clone().filter(|a| !a.is_empty()) else {
                continue;
            };
            report.probed += 1;

            match self.poll_host(&host, &address).await {
                Ok(HostProbe::Reachable) => report.online += 1,
                Ok(HostProbe::Reconnected) => {
                    report.online += 1;
                    report.reconnected += 1;
                }
                Ok(HostProbe::Unreachable) => {}
                Ok(HostProbe::Removed) => report.probed -= 1,
                Err(e) => warn!(host = %host.name, error = %e, "Host poll failed"),
            }
        }

        HOSTS_UNREACHABLE.set((report.probed - report.online) as f64);

        if report.reconnected > 0 {
            match self.reconcile().await {
                Ok(r) => debug!(corrected = r.corrected, "Reconciled after reconnect"),
                Err(e) => warn!(error = %e, "Reconciliation after reconnect failed"),
            }
        }
        Ok(report)
    }

    async fn poll_host(&self, host: &Host, address: &str) -> Result<HostProbe, FleetError> {
        let reachable = match self.registry.get(host.id) {
            Some(client) => client.ping().await.is_ok(),
            None => false,
        };

        if reachable {
            metric_inc!(HOST_PROBES, &["reachable"]);
            if host.status != HostStatus::Online {
                self.store
                    .set_host_status(host.id, HostStatus::Online)
                    .await?;
                info!(host = %host.name, "Host back online");
                self.events
                    .record(EventKind::HostOnline, &host.name, "Host reconnected")
                    .await;
            }
            return Ok(HostProbe::Reachable);
        }

        metric_inc!(HOST_PROBES, &["unreachable"]);
        if host.status != HostStatus::Unreachable {
            self.store
                .set_host_status(host.id, HostStatus::Unreachable)
                .await?;
            warn!(host = %host.name, %address, "Host unreachable");
            self.events
                .record(EventKind::HostUnreachable, &host.name, "Host unreachable")
                .await;
        }
        self.registry.unregister(host.id).await;

        match self.open_remote(address).await {
            Ok(client) => {
                self.registry.register(host.id, client).await;
                // remove_host deletes the row before it unregisters, so a
                // missing row means nothing else will close this client.
                if self.store.get_host(host.id).await?.is_none() {
                    self.registry.unregister(host.id).await;
                    debug!(host = %host.name, "Host removed during poll");
                    return Ok(HostProbe::Removed);
                }
                self.store
                    .set_host_status(host.id, HostStatus::Online)
                    .await?;
                metric_inc!(HOST_PROBES, &["reconnected"]);
                info!(host = %host.name, %address, "Host reconnected");
                self.events
                    .record(EventKind::HostOnline, &host.name, "Host reconnected")
                    .await;
                Ok(HostProbe::Reconnected)
            }
            Err(e) => {
                debug!(host = %host.name, error = %e, "Reconnect failed");
                Ok(HostProbe::Unreachable)
            }
        }
    }
}

enum HostProbe {
    Reachable,
    Reconnected,
    Unreachable,
    Removed,
}
