//! # Domain Module
//!
//! Core types for the fleet manager.

pub mod container_spec;
pub mod entities;
pub mod errors;
pub mod invariants;
pub mod value_objects;

pub use container_spec::*;
pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use value_objects::*;
