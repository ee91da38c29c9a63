//! Fatal error types for a reconstruction run.
//!
//! Per-record problems (parsing, matching, empty registration) are never
//! errors; they are collected as [`crate::model::Diagnostic`] values. The
//! variants here are structural invariant violations that abort the run.

use crate::keys::PartitionKey;
use thiserror::Error;

/// Result type alias for reconstruction stages.
pub type Result<T> = std::result::Result<T, ReconstructionError>;

/// Invariant violations that make the whole run invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructionError {
    /// A merge input was not sorted ascending by the comparator.
    #[error("merge input out of order on the {side} side: {detail}")]
    UnsortedInput {
        /// Which input violated monotonicity ("left" or "right").
        side: &'static str,
        /// Description of the offending keys.
        detail: String,
    },

    /// Following renames from a key revisited a key already on the walk.
    #[error("identity cycle in domain {domain}: {path}")]
    IdentityCycle {
        /// Domain whose rename graph is corrupt.
        domain: String,
        /// The walked chain, ending with the repeated key.
        path: String,
    },

    /// The partitioner was asked for zero buckets.
    #[error("partition count must be positive, got {0}")]
    InvalidPartitionCount(usize),

    /// The builder produced an interval whose start lies after its end.
    #[error("invalid interval for {key}: start {start} is after end {end}")]
    InvalidInterval {
        /// Entity the interval belongs to.
        key: PartitionKey,
        /// Offending start.
        start: i64,
        /// Offending end.
        end: i64,
    },
}

impl ReconstructionError {
    /// Short name of the violated invariant, for run reports.
    pub fn invariant(&self) -> &'static str {
        match self {
            ReconstructionError::UnsortedInput { .. } => "monotonic-merge-input",
            ReconstructionError::IdentityCycle { .. } => "acyclic-identity-graph",
            ReconstructionError::InvalidPartitionCount(_) => "positive-partition-count",
            ReconstructionError::InvalidInterval { .. } => "ordered-interval-bounds",
        }
    }
}
