//! # Validator Fleet Manager
//!
//! Control plane for validator node containers spread across one local and
//! any number of remote container hosts.
//!
//! ## Purpose
//!
//! Provisions validator nodes as containers, keeps their persisted status in
//! line with what the runtimes report, and rebuilds a node's container when
//! the set of L1s it validates changes.
//!
//! ## Domain Rules
//!
//! | Rule | Enforcement Location |
//! |------|---------------------|
//! | Node names unique | `FleetStore::insert_node` (`nodes_name_key`) |
//! | Staking port unique per host among active nodes | `FleetStore::insert_node`, `set_node_status` |
//! | One assignment per `(l1, node)` | `FleetStore::insert_assignment` |
//! | L1 `pending` iff no subnet id | `domain/invariants.rs` - `l1_status_for()` |
//! | Health never skips `running` | `domain/invariants.rs` - `health_transition()` |
//!
//! ## Node Lifecycle
//!
//! ```text
//! [creating] ──provisioned──→ [running] ⇄ [stopped] ──delete──→ (gone)
//!     │                        │    ↑
//!     └──failed step──→ [failed]  [unhealthy]
//!
//! reconfigure: running | stopped | unhealthy | failed ──→ [creating] ──→ running | failed
//! ```
//!
//! ## Background Work
//!
//! | Unit | Runs | Module |
//! |------|------|--------|
//! | Provisioning | per created node | `service/nodes.rs` |
//! | Reconfiguration | per validator change on a configured L1 | `service/l1s.rs` |
//! | Health poller | every health interval | `service/health.rs` |
//! | Host poller | every 2× health interval | `service/host_poll.rs` |
//! | Reconciliation | startup, after host reconnect | `service/reconcile.rs` |
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/ - in-memory + SQLite stores, simulated runtime,      │
//! │              JSON-RPC health probe                              │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - NodeLifecycleApi, HostApi, ValidatorSetApi │
//! │  ports/outbound.rs - ContainerRuntime, FleetStore, probe        │
//! │  service/          - FleetManager                               │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/entities.rs       - Host, Node, L1, assignments, events │
//! │  domain/value_objects.rs  - statuses, event kinds, host labels  │
//! │  domain/invariants.rs     - health and reconcile transitions    │
//! │  domain/container_spec.rs - container create parameters         │
//! │  domain/errors.rs         - FleetError and port errors          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = FleetManager::bootstrap(FleetConfig::from_env(), deps).await?;
//! let pollers = manager.start_pollers();
//!
//! let node = manager.create_node(CreateNodeRequest::named("n1")).await?;
//! // node.status == creating; provisioning continues in the background
//!
//! pollers.shutdown().await;
//! manager.close().await;
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod events;
pub mod poller;
pub mod ports;
pub mod registry;
pub mod service;
pub mod tasks;

pub use config::FleetConfig;
pub use domain::*;
pub use events::EventLog;
pub use poller::{PollCycle, Poller, PollerSet};
pub use ports::*;
pub use registry::HostRegistry;
pub use service::{FleetDependencies, FleetManager, HostPollReport, ReconcileReport};
pub use tasks::{BackgroundTasks, KeyedLocks, TaskOutcome};

/// Crate version reported in the status summary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
