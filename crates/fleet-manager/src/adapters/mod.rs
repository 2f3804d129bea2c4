//! Adapters layer for the fleet manager.
//!
//! Concrete implementations of the outbound ports: persistence, container
//! runtimes, and the node health protocol.

pub mod health_probe;
pub mod memory_store;
pub mod simulated_runtime;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use health_probe::{JsonRpcHealthProbe, StaticHealthProbe};
pub use memory_store::InMemoryFleetStore;
pub use simulated_runtime::{
    RuntimeCall, RuntimeOp, SimContainer, SimulatedConnector, SimulatedRuntime,
};
#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteFleetStore;
