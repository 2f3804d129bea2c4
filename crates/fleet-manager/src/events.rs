//! # Event Log
//!
//! Append-only audit sink. Every event is persisted through the store and
//! then fanned out on a broadcast channel for live subscribers.
//!
//! Recording never fails the caller: an event that cannot be persisted is
//! logged and dropped, since the state change it describes already happened.

use fleet_telemetry::EVENTS_RECORDED;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::domain::{Event, EventKind, NewEvent};
use crate::ports::FleetStore;

const CHANNEL_CAPACITY: usize = 256;

/// Persisting event publisher.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn FleetStore>,
    sender: broadcast::Sender<Event>,
}

impl EventLog {
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { store, sender }
    }

    /// Append an event with no detail payload.
    pub async fn record(&self, kind: EventKind, target: &str, message: impl Into<String>) {
        self.record_with(kind, target, message, serde_json::Value::Null)
            .await
    }

    /// Append an event with a structured detail payload.
    pub async fn record_with(
        &self,
        kind: EventKind,
        target: &str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) {
        let new = NewEvent {
            kind,
            target: target.to_string(),
            message: message.into(),
            details,
        };
        match self.store.append_event(new).await {
            Ok(event) => {
                EVENTS_RECORDED.with_label_values(&[kind.as_str()]).inc();
                debug!(kind = %kind, subject = %event.target, "{}", event.message);
                // No subscribers is fine.
                let _ = self.sender.send(event);
            }
            Err(e) => {
                error!(kind = %kind, subject = target, error = %e, "Failed to record event");
            }
        }
    }

    /// Receive every event appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}
