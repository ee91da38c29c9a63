//! # Chronorust
//!
//! Batch reconstruction of wiki user and page histories.
//!
//! Change events (creations, renames, group and block changes, deletions)
//! and point-in-time snapshot states are merged into a gap-free sequence of
//! time-bounded state intervals per entity, answering "what did this entity
//! look like at time T". Events recorded under a stale name are followed
//! through the rename graph to the lineage they belong to.
//!
//! The pipeline is partition-parallel: records are routed by entity
//! identity, sorted per shard, merged with a one-pass left outer zip and
//! replayed by the history builder. A run either succeeds completely or
//! fails with the violated invariant.

pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod keys;
pub mod metrics;
pub mod model;
pub mod partitioning;
pub mod runner;
pub mod temporal;
pub mod zipper;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigOverrides, DiagnosticsConfig, ReconstructionConfig};
pub use error::ReconstructionError;
pub use history::{state_at, HistoryBuilder};
pub use identity::IdentityGraph;
pub use keys::{EventKey, PartitionKey, StateKey};
pub use metrics::ReconstructionMetrics;
pub use model::{
    Diagnostic, DiagnosticCategory, EntityEvent, EntityKind, EntityState, EventAction, EventType,
    IdentityEdge, IdentityKey,
};
pub use partitioning::{PartitionedCollection, Partitioner};
pub use runner::{ReconstructionOutput, ReconstructionRunner};
pub use temporal::{Instant, Span};
pub use zipper::{collect_left_outer_zip, left_outer_zip};
