//! Error type definitions and the serving-path propagation policy.
//!
//! The serving path is failure-tolerant: storage, tree-index, and network
//! faults inside a tier are logged and downgraded to a miss so the pipeline
//! advances. The typed errors below surface only at startup (fatal) and at
//! the promotion/rebuild boundary (logged, never client-visible).

mod types;

pub use types::{DatabaseError, InitializationError, LocalDbError};
