//! # Periodic Pollers
//!
//! A [`Poller`] runs one [`PollCycle`] on a fixed period until stopped.
//!
//! - The first cycle runs one full period after start.
//! - Each cycle runs under its own timeout.
//! - Missed ticks are skipped rather than bunched up.
//! - Stopping is cooperative: the shutdown signal is only observed between
//!   cycles, and [`Poller::stop`] waits for an in-flight cycle to finish.

use async_trait::async_trait;
use fleet_telemetry::{HistogramTimer, POLL_CYCLE_DURATION};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// One unit of periodic work.
#[async_trait]
pub trait PollCycle: Send + Sync + 'static {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn run_cycle(&self);
}

/// Handle to a running poller.
pub struct Poller {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start running `cycle` every `period`.
    pub fn spawn(cycle: Arc<dyn PollCycle>, period: Duration, cycle_timeout: Duration) -> Self {
        let name = cycle.name();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(poller = name, period_ms = period.as_millis() as u64, "Poller started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _timer = HistogramTimer::new(&POLL_CYCLE_DURATION, name);
                        if tokio::time::timeout(cycle_timeout, cycle.run_cycle()).await.is_err() {
                            warn!(poller = name, timeout_ms = cycle_timeout.as_millis() as u64, "Poll cycle timed out");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(poller = name, "Poller loop exited");
        });

        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal shutdown and wait for the loop to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(poller = self.name, error = %e, "Poller task failed");
        }
        info!(poller = self.name, "Poller stopped");
    }
}

/// The health and host pollers of one manager.
pub struct PollerSet {
    pub(crate) health: Poller,
    pub(crate) hosts: Poller,
}

impl PollerSet {
    /// Stop both pollers, waiting for in-flight cycles.
    pub async fn shutdown(self) {
        tokio::join!(self.health.stop(), self.hosts.stop());
    }
}
