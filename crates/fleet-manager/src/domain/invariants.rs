//! # Domain Invariants
//!
//! Pure rules shared by the lifecycle controller, the pollers, and the
//! reconciliation engine.

use super::errors::FleetError;
use super::value_objects::{ContainerState, L1Status, NodeStatus, DEFAULT_VALIDATOR_WEIGHT};

/// Outcome of one health probe round for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// The application answered healthy.
    Healthy,
    /// The application did not answer healthy but the container is up.
    Degraded,
    /// The application did not answer healthy and the container is down
    /// (or could not be inspected).
    Exited,
}

/// Status a health round moves a node to, or `None` if it stays put.
///
/// Only `running` and `unhealthy` nodes are probed.
pub fn health_transition(current: NodeStatus, verdict: HealthVerdict) -> Option<NodeStatus> {
    let next = match (current, verdict) {
        (NodeStatus::Unhealthy, HealthVerdict::Healthy) => NodeStatus::Running,
        (NodeStatus::Running, HealthVerdict::Degraded) => NodeStatus::Unhealthy,
        (NodeStatus::Running, HealthVerdict::Exited) => NodeStatus::Stopped,
        _ => return None,
    };
    debug_assert!(current.can_transition_to(next));
    Some(next)
}

/// Persisted status implied by the observed container state.
///
/// `None` means the container is absent from the runtime's managed list.
pub fn reconciled_status(observed: Option<&ContainerState>) -> NodeStatus {
    match observed {
        None => NodeStatus::Stopped,
        Some(ContainerState::Running) => NodeStatus::Running,
        Some(ContainerState::Exited | ContainerState::Dead) => NodeStatus::Stopped,
        Some(ContainerState::Created | ContainerState::Restarting) => NodeStatus::Creating,
        Some(_) => NodeStatus::Stopped,
    }
}

/// An L1 is `configured` exactly when it has a subnet id.
pub fn l1_status_for(subnet_id: Option<&str>) -> L1Status {
    match subnet_id {
        Some(s) if !s.is_empty() => L1Status::Configured,
        _ => L1Status::Pending,
    }
}

/// Weight stored for an assignment; non-positive or missing becomes the default.
pub fn effective_weight(weight: Option<i64>) -> u64 {
    match weight {
        Some(w) if w > 0 => w as u64,
        _ => DEFAULT_VALIDATOR_WEIGHT,
    }
}

/// Reject empty names.
pub fn invariant_name_present(kind: &str, name: &str) -> Result<(), FleetError> {
    if name.trim().is_empty() {
        return Err(FleetError::Validation(format!("{kind} name is required")));
    }
    Ok(())
}

/// Distinct subnet ids in first-seen order.
pub fn distinct_subnets<I, S>(subnets: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for s in subnets {
        let s = s.as_ref();
        if !s.is_empty() && !out.iter().any(|seen| seen == s) {
            out.push(s.to_string());
        }
    }
    out
}
