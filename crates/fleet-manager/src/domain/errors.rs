//! # Domain Errors
//!
//! Caller-facing error taxonomy plus the errors raised by each outbound port.

use thiserror::Error;

/// Coarse category of a [`FleetError`], for adapters mapping to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Infra,
}

/// Errors returned by fleet manager operations.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Missing or malformed input, or an operation not allowed in the current state.
    #[error("{0}")]
    Validation(String),

    /// Duplicate name, port, or assignment.
    #[error("{0}")]
    Conflict(String),

    /// Unknown identifier.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Container runtime failure during an operation.
    #[error("{context}: {source}")]
    Runtime {
        context: String,
        #[source]
        source: RuntimeError,
    },

    /// Persistence failure during an operation.
    #[error("store: {0}")]
    Store(#[source] StoreError),
}

impl FleetError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Runtime { .. } | Self::Store(_) => ErrorKind::Infra,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn runtime(context: impl Into<String>, source: RuntimeError) -> Self {
        Self::Runtime {
            context: context.into(),
            source,
        }
    }

    /// Map a store error, reporting a uniqueness violation with `conflict` as the message.
    pub(crate) fn from_store(err: StoreError, conflict: impl FnOnce() -> String) -> Self {
        match err {
            StoreError::UniqueViolation { .. } => Self::Conflict(conflict()),
            other => other.into(),
        }
    }
}

impl From<StoreError> for FleetError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { constraint } => {
                Self::Conflict(format!("duplicate value violates {constraint}"))
            }
            StoreError::ForeignKeyViolation { constraint } => {
                Self::Validation(format!("row is still referenced ({constraint})"))
            }
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity,
                id: id.to_string(),
            },
            other => Self::Store(other),
        }
    }
}

/// Errors from the persistence port.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint {constraint} violated")]
    UniqueViolation { constraint: &'static str },

    /// A foreign key rejected the write or delete.
    #[error("foreign key {constraint} violated")]
    ForeignKeyViolation { constraint: &'static str },

    /// The targeted row does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Backend failure (connection, I/O, SQL).
    #[error("backend: {0}")]
    Backend(String),
}

/// Errors from a container runtime client.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The referenced container or image does not exist.
    #[error("no such {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Transport to the runtime failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The runtime rejected the request.
    #[error("{0}")]
    Engine(String),

    /// The client was closed.
    #[error("client closed")]
    Closed,
}

impl RuntimeError {
    /// Whether this is the "container not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Transport failure talking to a node's HTTP API.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Unrecognized status text read back from storage.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind} value {value:?}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// A failed step of a background provisioning or reconfiguration task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{step}: {message}")]
pub struct TaskFailure {
    pub step: &'static str,
    pub message: String,
}

impl TaskFailure {
    pub fn new(step: &'static str, message: impl ToString) -> Self {
        Self {
            step,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let err = FleetError::from_store(
            StoreError::UniqueViolation {
                constraint: "nodes_name_key",
            },
            || "node \"n1\" already exists".to_string(),
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "node \"n1\" already exists");
    }

    #[test]
    fn test_backend_error_is_infra() {
        let err: FleetError = StoreError::Backend("disk full".into()).into();
        assert_eq!(err.kind(), ErrorKind::Infra);
    }

    #[test]
    fn test_runtime_not_found_detection() {
        let err = RuntimeError::NotFound {
            kind: "container",
            id: "abc".into(),
        };
        assert!(err.is_not_found());
        assert!(!RuntimeError::Engine("boom".into()).is_not_found());
    }

    #[test]
    fn test_task_failure_display() {
        let failure = TaskFailure::new("image pull", "manifest unknown");
        assert_eq!(failure.to_string(), "image pull: manifest unknown");
    }
}
