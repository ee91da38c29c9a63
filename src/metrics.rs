//! Run counters.
//!
//! Each partition (or domain) fills its own [`ReconstructionMetrics`]; the
//! runner merges them once all partitions complete. Merging is a field-wise
//! sum, so merge order does not matter.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionMetrics {
    pub events_read: u64,
    pub snapshots_read: u64,
    /// Events dropped before reconstruction for parsing errors
    pub parsing_errors: u64,
    /// Events attributed to no lineage, or arriving while the entity was deleted
    pub unmatched_events: u64,
    pub events_applied: u64,
    pub attributed_via_holder: u64,
    pub attributed_via_graph: u64,
    pub attributed_via_snapshot: u64,
    pub new_lineages: u64,
    pub pseudo_id_snapshots: u64,
    pub duplicate_snapshots: u64,
    /// Events folded into an interval opened at the same instant
    pub same_instant_events: u64,
    /// Snapshot key differs from the key reached by replay
    pub snapshot_key_mismatches: u64,
    pub empty_registrations: u64,
    pub intervals_emitted: u64,
    pub entities_built: u64,
    pub partitions_processed: u64,
}

impl ReconstructionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &ReconstructionMetrics) {
        self.events_read += other.events_read;
        self.snapshots_read += other.snapshots_read;
        self.parsing_errors += other.parsing_errors;
        self.unmatched_events += other.unmatched_events;
        self.events_applied += other.events_applied;
        self.attributed_via_holder += other.attributed_via_holder;
        self.attributed_via_graph += other.attributed_via_graph;
        self.attributed_via_snapshot += other.attributed_via_snapshot;
        self.new_lineages += other.new_lineages;
        self.pseudo_id_snapshots += other.pseudo_id_snapshots;
        self.duplicate_snapshots += other.duplicate_snapshots;
        self.same_instant_events += other.same_instant_events;
        self.snapshot_key_mismatches += other.snapshot_key_mismatches;
        self.empty_registrations += other.empty_registrations;
        self.intervals_emitted += other.intervals_emitted;
        self.entities_built += other.entities_built;
        self.partitions_processed += other.partitions_processed;
    }
}

impl AddAssign for ReconstructionMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(&rhs);
    }
}

impl std::iter::Sum for ReconstructionMetrics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, m| {
            acc.merge(&m);
            acc
        })
    }
}
