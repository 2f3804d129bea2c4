//! # Fleet Manager Configuration

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::domain::{FleetError, DEFAULT_HTTP_PORT, DEFAULT_STAKING_PORT};

/// Longest accepted health poller period.
pub const MAX_HEALTH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fleet manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Image used when a create request names none.
    pub image: String,
    /// Blockchain network id passed to every node (mainnet, fuji, local).
    pub network_id: String,
    /// Container network all managed containers join.
    pub docker_network: String,
    /// Health poller period. The host poller runs at twice this.
    pub health_interval: Duration,
    /// Upper bound for one provisioning task.
    pub provision_timeout: Duration,
    /// Upper bound for one reconfiguration task.
    pub reconfigure_timeout: Duration,
    /// Upper bound for one poller cycle.
    pub poll_cycle_timeout: Duration,
    /// Grace period for start/stop and reconfiguration stops.
    pub stop_grace: Duration,
    /// Grace period for the best-effort stop before deletion.
    pub delete_stop_grace: Duration,
    /// Timeout of a single health or identity request.
    pub health_request_timeout: Duration,
    pub staking_port: u16,
    pub http_port: u16,
    /// Background tasks allowed to run at once.
    pub max_concurrent_tasks: usize,
    pub default_log_tail: String,
    pub default_event_limit: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            image: "avaplatform/avalanchego:latest".to_string(),
            network_id: "mainnet".to_string(),
            docker_network: "avax".to_string(),
            health_interval: Duration::from_secs(30),
            provision_timeout: Duration::from_secs(10 * 60),
            reconfigure_timeout: Duration::from_secs(5 * 60),
            poll_cycle_timeout: Duration::from_secs(20),
            stop_grace: Duration::from_secs(30),
            delete_stop_grace: Duration::from_secs(10),
            health_request_timeout: Duration::from_secs(5),
            staking_port: DEFAULT_STAKING_PORT,
            http_port: DEFAULT_HTTP_PORT,
            max_concurrent_tasks: 32,
            default_log_tail: "100".to_string(),
            default_event_limit: 50,
        }
    }
}

impl FleetConfig {
    /// Short timeouts and intervals for tests.
    pub fn for_testing() -> Self {
        Self {
            network_id: "local".to_string(),
            health_interval: Duration::from_millis(50),
            provision_timeout: Duration::from_secs(5),
            reconfigure_timeout: Duration::from_secs(5),
            poll_cycle_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_millis(10),
            delete_stop_grace: Duration::from_millis(10),
            health_request_timeout: Duration::from_millis(200),
            max_concurrent_tasks: 8,
            ..Self::default()
        }
    }

    /// Overlay values from environment variables.
    ///
    /// - `AVAGO_IMAGE`: default node image
    /// - `AVAGO_NETWORK`: network id (default: mainnet)
    /// - `AVAX_DOCKER_NETWORK`: managed container network (default: avax)
    /// - `HEALTH_INTERVAL_SECS`: health poller period in seconds (default: 30)
    /// - `FLEET_MAX_TASKS`: background task cap (default: 32)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            image: env::var("AVAGO_IMAGE").unwrap_or(defaults.image),
            network_id: env::var("AVAGO_NETWORK").unwrap_or(defaults.network_id),
            docker_network: env::var("AVAX_DOCKER_NETWORK").unwrap_or(defaults.docker_network),
            health_interval: env::var("HEALTH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_interval),
            max_concurrent_tasks: env::var("FLEET_MAX_TASKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent_tasks),
            ..defaults
        }
    }

    /// Host poller period.
    pub fn host_poll_interval(&self) -> Duration {
        self.health_interval
            .checked_mul(2)
            .unwrap_or(MAX_HEALTH_INTERVAL * 2)
    }

    pub fn validate(&self) -> Result<(), FleetError> {
        if self.health_interval.is_zero() {
            return Err(FleetError::Validation(
                "health_interval must be non-zero".into(),
            ));
        }
        if self.health_interval > MAX_HEALTH_INTERVAL {
            return Err(FleetError::Validation(format!(
                "health_interval must be at most {}s",
                MAX_HEALTH_INTERVAL.as_secs()
            )));
        }
        if self.poll_cycle_timeout.is_zero() {
            return Err(FleetError::Validation(
                "poll_cycle_timeout must be non-zero".into(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(FleetError::Validation(
                "max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.image.is_empty() || self.docker_network.is_empty() {
            return Err(FleetError::Validation(
                "image and docker_network are required".into(),
            ));
        }
        Ok(())
    }
}
