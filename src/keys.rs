//! # Ordering Keys
//!
//! Composite keys defining the total order and co-location grouping used by
//! partitioning, merging and history building.
//!
//! - [`PartitionKey`]: `(domain, entity_id, year_bucket)`, lexicographic.
//! - [`StateKey`]: partition key, then start (absent = −∞), then end (absent = +∞).
//! - [`EventKey`]: partition key, then timestamp, then change-id tie-break.

use crate::model::{EntityEvent, EntityState};
use crate::temporal::{compare_end, compare_start, year_bucket, Instant};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hasher;

/// Entity identity plus a coarse time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub domain: String,
    /// Always non-zero: positive for real ids, negative for pseudo-ids
    pub entity_id: i64,
    pub year_bucket: i32,
}

impl PartitionKey {
    pub fn new(domain: impl Into<String>, entity_id: i64, year_bucket: i32) -> Self {
        Self {
            domain: domain.into(),
            entity_id,
            year_bucket,
        }
    }

    /// Whether both keys belong to the same entity, ignoring the time bucket.
    #[inline]
    pub fn same_entity(&self, other: &PartitionKey) -> bool {
        self.entity_id == other.entity_id && self.domain == other.domain
    }
}

/// Order on the entity-identity component only: `(domain, entity_id)`.
#[inline]
pub fn compare_entity(a: &PartitionKey, b: &PartitionKey) -> Ordering {
    a.domain
        .cmp(&b.domain)
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_entity(self, other).then_with(|| self.year_bucket.cmp(&other.year_bucket))
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.domain, self.entity_id, self.year_bucket)
    }
}

/// Key of a state interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub partition: PartitionKey,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
}

impl StateKey {
    pub fn for_state(state: &EntityState) -> Self {
        Self {
            partition: PartitionKey::new(
                state.domain.clone(),
                state.entity_id,
                year_bucket(state.start),
            ),
            start: state.start,
            end: state.end,
        }
    }
}

impl Ord for StateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partition
            .cmp(&other.partition)
            .then_with(|| compare_start(self.start, other.start))
            .then_with(|| compare_end(self.end, other.end))
    }
}

impl PartialOrd for StateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Key of a change event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub partition: PartitionKey,
    pub timestamp: Option<Instant>,
    /// Change id; resolves events sharing one timestamp
    pub tie_break: Option<i64>,
}

impl EventKey {
    /// Key for an event already attributed to `entity_id`.
    pub fn for_event(event: &EntityEvent, entity_id: i64) -> Self {
        Self {
            partition: PartitionKey::new(
                event.domain.clone(),
                entity_id,
                year_bucket(event.timestamp),
            ),
            timestamp: event.timestamp,
            tie_break: event.change_id,
        }
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partition
            .cmp(&other.partition)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.tie_break.cmp(&other.tie_break))
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A record that can be routed to a partition and sorted within it.
pub trait Keyed {
    type Key: Ord;

    fn partition_key(&self) -> &PartitionKey;

    fn sort_key(&self) -> &Self::Key;
}

/// An event with its final (attributed) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedEvent {
    pub key: EventKey,
    pub event: EntityEvent,
}

impl KeyedEvent {
    pub fn new(event: EntityEvent, entity_id: i64) -> Self {
        Self {
            key: EventKey::for_event(&event, entity_id),
            event,
        }
    }
}

impl Keyed for KeyedEvent {
    type Key = EventKey;

    fn partition_key(&self) -> &PartitionKey {
        &self.key.partition
    }

    fn sort_key(&self) -> &EventKey {
        &self.key
    }
}

/// A state with its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedState {
    pub key: StateKey,
    pub state: EntityState,
}

impl KeyedState {
    pub fn new(state: EntityState) -> Self {
        Self {
            key: StateKey::for_state(&state),
            state,
        }
    }
}

impl Keyed for KeyedState {
    type Key = StateKey;

    fn partition_key(&self) -> &PartitionKey {
        &self.key.partition
    }

    fn sort_key(&self) -> &StateKey {
        &self.key
    }
}

/// Deterministic negative pseudo-id derived from the full record.
///
/// Valid ids are strictly positive, so pseudo-ids never collide with them.
/// Distinct malformed records may still collide with each other.
pub fn pseudo_entity_id<T: Serialize>(record: &T) -> i64 {
    let bytes = serde_json::to_vec(record).unwrap_or_default();
    let mut hasher = FxHasher::default();
    hasher.write(&bytes);
    let hash = hasher.finish();
    // Drop the top bit so the value fits in i64, then shift below zero: [i64::MIN, -1].
    -((hash >> 1) as i64) - 1
}
