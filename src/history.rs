//! # History Builder
//!
//! Turns one partition's sorted events and snapshot states into
//! consecutive, non-overlapping state intervals per entity.
//!
//! Per entity the builder runs a small state machine:
//!
//! 1. **Seed**: the first interval starts at the snapshot's registration
//!    time, else at the first creation event, else at the snapshot's first
//!    activity, pulled back to the first event if one predates it. The
//!    attributes at the seed are carried backward from the "old" side of
//!    the first event of each kind, or taken from the snapshot.
//! 2. **Advance**: each event closes the open interval at its timestamp and
//!    opens the next one with the event's effect applied. Events sharing the
//!    open interval's start instant modify it in place.
//! 3. **Close**: the last interval stays open (`end == None`) unless a
//!    deletion closed it.
//!
//! Entities without a determinable start are not emitted; they are reported
//! as `empty-registration` diagnostics.

use crate::error::{ReconstructionError, Result};
use crate::keys::{compare_entity, KeyedEvent, KeyedState, PartitionKey};
use crate::metrics::ReconstructionMetrics;
use crate::model::{
    Diagnostic, DiagnosticCategory, EntityEvent, EntityState, EventAction, EventType,
};
use crate::temporal::Instant;
use crate::zipper::{collect_left_outer_zip, ZipKey};
use serde::Serialize;
use tracing::{debug, instrument, warn};

/// All events of one entity, sorted by event key.
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub entity: PartitionKey,
    pub events: Vec<KeyedEvent>,
}

impl ZipKey for EventGroup {
    type Key = PartitionKey;

    fn zip_key(&self) -> &PartitionKey {
        &self.entity
    }
}

/// Everything known about one entity: its events and optional snapshot.
#[derive(Debug, Clone)]
pub struct EntityTimeline {
    pub entity: PartitionKey,
    pub snapshot: Option<EntityState>,
    pub events: Vec<KeyedEvent>,
}

/// Intervals, diagnostics and counters produced from one partition.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub states: Vec<EntityState>,
    pub diagnostics: Vec<Diagnostic>,
    pub metrics: ReconstructionMetrics,
}

impl BuildOutput {
    pub fn extend(&mut self, other: BuildOutput) {
        self.states.extend(other.states);
        self.diagnostics.extend(other.diagnostics);
        self.metrics.merge(&other.metrics);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryBuilder {
    diagnostics_enabled: bool,
    max_raw_len: usize,
}

impl Default for HistoryBuilder {
    fn default() -> Self {
        Self {
            diagnostics_enabled: true,
            max_raw_len: crate::config::DEFAULT_MAX_RAW_LEN,
        }
    }
}

impl HistoryBuilder {
    pub fn new(diagnostics_enabled: bool, max_raw_len: usize) -> Self {
        Self {
            diagnostics_enabled,
            max_raw_len,
        }
    }

    fn diagnose<T: Serialize>(
        &self,
        out: &mut BuildOutput,
        domain: &str,
        category: DiagnosticCategory,
        record: &T,
    ) {
        if self.diagnostics_enabled {
            out.diagnostics.push(Diagnostic::from_record(
                domain,
                category,
                record,
                self.max_raw_len,
            ));
        }
    }

    /// Split sorted events into one group per entity.
    pub fn group_events(events: Vec<KeyedEvent>) -> Vec<EventGroup> {
        let mut groups: Vec<EventGroup> = Vec::new();
        for keyed in events {
            match groups.last_mut() {
                Some(group) if group.entity.same_entity(&keyed.key.partition) => {
                    group.events.push(keyed)
                }
                _ => groups.push(EventGroup {
                    entity: keyed.key.partition.clone(),
                    events: vec![keyed],
                }),
            }
        }
        groups
    }

    /// Build every entity of a partition.
    ///
    /// `events` and `states` must be sorted by their keys, as produced by
    /// [`crate::partitioning::PartitionedCollection`].
    ///
    /// # Errors
    /// Fails on out-of-order input or an interval with start after end.
    #[instrument(skip(self, events, states), fields(events = events.len(), states = states.len()), level = "debug")]
    pub fn build_partition(
        &self,
        events: Vec<KeyedEvent>,
        states: Vec<KeyedState>,
    ) -> Result<BuildOutput> {
        let mut out = BuildOutput::default();

        let mut snapshots: Vec<KeyedState> = Vec::with_capacity(states.len());
        for state in states {
            match snapshots.last() {
                Some(previous) if previous.key.partition.same_entity(&state.key.partition) => {
                    warn!(entity = %state.key.partition, "duplicate snapshot state ignored");
                    out.metrics.duplicate_snapshots += 1;
                }
                _ => snapshots.push(state),
            }
        }

        let groups = Self::group_events(events);

        // Entities known only from the snapshot.
        let snapshot_only = collect_left_outer_zip(
            compare_entity,
            |snapshot: &KeyedState, group: Option<&&EventGroup>| {
                group.is_none().then(|| EntityTimeline {
                    entity: snapshot.key.partition.clone(),
                    snapshot: Some(snapshot.state.clone()),
                    events: Vec::new(),
                })
            },
            snapshots.iter(),
            groups.iter(),
        )?;

        // Entities with events, paired with their snapshot if any.
        let mut timelines = collect_left_outer_zip(
            compare_entity,
            |group: EventGroup, snapshot: Option<&&KeyedState>| EntityTimeline {
                entity: group.entity,
                snapshot: snapshot.map(|s| s.state.clone()),
                events: group.events,
            },
            groups,
            snapshots.iter(),
        )?;
        timelines.extend(snapshot_only.into_iter().flatten());
        timelines.sort_by(|a, b| compare_entity(&a.entity, &b.entity));

        for timeline in timelines {
            self.build_entity(timeline, &mut out)?;
        }
        out.metrics.partitions_processed += 1;
        debug!(
            intervals = out.states.len(),
            diagnostics = out.diagnostics.len(),
            "partition built"
        );
        Ok(out)
    }

    /// Build one entity's intervals into `out`.
    pub fn build_entity(&self, timeline: EntityTimeline, out: &mut BuildOutput) -> Result<()> {
        let EntityTimeline {
            entity,
            snapshot,
            events,
        } = timeline;

        let Some(seed) = seed_state(&entity, snapshot.as_ref(), &events) else {
            out.metrics.empty_registrations += 1;
            match (&snapshot, events.first()) {
                (Some(state), _) => self.diagnose(
                    out,
                    &entity.domain,
                    DiagnosticCategory::EmptyRegistration,
                    state,
                ),
                (None, Some(first)) => self.diagnose(
                    out,
                    &entity.domain,
                    DiagnosticCategory::EmptyRegistration,
                    &first.event,
                ),
                (None, None) => {}
            }
            return Ok(());
        };

        let mut replay = Replay {
            open: Some(seed),
            closed: Vec::new(),
        };
        for keyed in events {
            let event = keyed.event;
            match replay.apply(&event) {
                Applied::Yes { same_instant } => {
                    out.metrics.events_applied += 1;
                    if same_instant {
                        out.metrics.same_instant_events += 1;
                    }
                }
                Applied::NotLive => {
                    out.metrics.unmatched_events += 1;
                    self.diagnose(out, &entity.domain, DiagnosticCategory::Matching, &event);
                }
            }
        }

        let mut intervals = replay.finish();
        let Some(replay_key) = intervals.last().map(|s| s.key_historical.clone()) else {
            return Ok(());
        };
        let current_key = match &snapshot {
            Some(state) => {
                if state.key != replay_key {
                    out.metrics.snapshot_key_mismatches += 1;
                    warn!(
                        entity = %entity,
                        snapshot = %state.key,
                        replay = %replay_key,
                        "snapshot key differs from replayed key"
                    );
                }
                state.key.clone()
            }
            None => replay_key,
        };

        for interval in &mut intervals {
            if let (Some(start), Some(end)) = (interval.start, interval.end) {
                if start > end {
                    return Err(ReconstructionError::InvalidInterval {
                        key: entity.clone(),
                        start,
                        end,
                    });
                }
            }
            interval.key = current_key.clone();
        }

        out.metrics.entities_built += 1;
        out.metrics.intervals_emitted += intervals.len() as u64;
        out.states.extend(intervals);
        Ok(())
    }
}

/// The first interval of an entity, or `None` when no start is determinable.
fn seed_state(
    entity: &PartitionKey,
    snapshot: Option<&EntityState>,
    events: &[KeyedEvent],
) -> Option<EntityState> {
    let first_create = events
        .iter()
        .map(|k| &k.event)
        .find(|e| matches!(e.action, EventAction::Create { .. }));
    let registered = snapshot.and_then(|s| s.creation_timestamp);

    let start = registered
        .or_else(|| first_create.and_then(|e| e.timestamp))
        .or_else(|| snapshot.and_then(|s| s.first_activity_timestamp))?;
    let start = match events.first().and_then(|k| k.event.timestamp) {
        Some(first) => start.min(first),
        None => start,
    };

    let kind = snapshot
        .map(|s| s.kind)
        .or_else(|| events.first().map(|k| k.event.kind))?;

    let key = events
        .iter()
        .find_map(|k| match k.event.action {
            EventAction::Create { .. } | EventAction::Rename { .. } => {
                Some(k.event.target.clone())
            }
            _ => None,
        })
        .or_else(|| snapshot.map(|s| s.key.clone()))
        .or_else(|| events.first().map(|k| k.event.target.clone()))?;

    let has_rename = events
        .iter()
        .any(|k| matches!(k.event.action, EventAction::Rename { .. }));
    let is_content = match first_create.map(|e| &e.action) {
        Some(EventAction::Create { is_content }) => *is_content,
        _ if !has_rename => snapshot.and_then(|s| s.is_content),
        _ => None,
    };

    let groups = events
        .iter()
        .find_map(|k| match &k.event.action {
            EventAction::AlterGroups { old_groups, .. } => Some(old_groups.clone()),
            _ => None,
        })
        .or_else(|| snapshot.map(|s| s.groups.clone()))
        .unwrap_or_default();

    let (blocks, block_expiration) = events
        .iter()
        .find_map(|k| match &k.event.action {
            EventAction::AlterBlocks { old_blocks, .. } => Some((old_blocks.clone(), None)),
            _ => None,
        })
        .or_else(|| snapshot.map(|s| (s.blocks.clone(), s.block_expiration.clone())))
        .unwrap_or_default();

    Some(EntityState {
        kind,
        domain: entity.domain.clone(),
        entity_id: entity.entity_id,
        key_historical: key.clone(),
        key,
        is_content,
        groups,
        blocks,
        block_expiration,
        creation_timestamp: registered
            .or_else(|| first_create.and_then(|e| e.timestamp))
            .or(Some(start)),
        first_activity_timestamp: snapshot.and_then(|s| s.first_activity_timestamp),
        start: Some(start),
        end: None,
        caused_by_event: Some(EventType::Create),
        caused_by_actor_id: first_create.and_then(|e| e.actor_id),
        is_deleted: false,
    })
}

enum Applied {
    Yes { same_instant: bool },
    /// The entity was deleted when the event arrived
    NotLive,
}

struct Replay {
    open: Option<EntityState>,
    closed: Vec<EntityState>,
}

impl Replay {
    fn apply(&mut self, event: &EntityEvent) -> Applied {
        let at = event.timestamp.unwrap_or(Instant::MIN);
        let Some(open) = self.open.as_mut() else {
            return self.reopen(event, at);
        };

        match &event.action {
            // Already live: only tags an interval opened at the same instant.
            EventAction::Create { .. } | EventAction::Restore => {
                if open.start == Some(at) {
                    open.caused_by_event = Some(event.event_type());
                    open.caused_by_actor_id = event.actor_id;
                }
                Applied::Yes {
                    same_instant: false,
                }
            }
            EventAction::Rename {
                new,
                new_is_content,
            } => self.transition(event, at, |state| {
                state.key_historical = new.clone();
                if new_is_content.is_some() {
                    state.is_content = *new_is_content;
                }
            }),
            EventAction::AlterGroups { new_groups, .. } => {
                self.transition(event, at, |state| state.groups = new_groups.clone())
            }
            EventAction::AlterBlocks {
                new_blocks,
                expiration,
                ..
            } => self.transition(event, at, |state| {
                state.blocks = new_blocks.clone();
                state.block_expiration = if new_blocks.is_empty() {
                    None
                } else {
                    expiration.clone()
                };
            }),
            EventAction::Delete => {
                if let Some(mut last) = self.open.take() {
                    last.end = Some(at);
                    last.is_deleted = true;
                    self.closed.push(last);
                }
                Applied::Yes {
                    same_instant: false,
                }
            }
        }
    }

    /// Close the open interval at `at` and open the next with `change` applied.
    fn transition<F>(&mut self, event: &EntityEvent, at: Instant, change: F) -> Applied
    where
        F: FnOnce(&mut EntityState),
    {
        let Some(open) = self.open.as_mut() else {
            return Applied::NotLive;
        };
        if open.start == Some(at) {
            change(open);
            open.caused_by_event = Some(event.event_type());
            open.caused_by_actor_id = event.actor_id;
            return Applied::Yes { same_instant: true };
        }

        let mut next = open.clone();
        open.end = Some(at);
        next.start = Some(at);
        next.end = None;
        change(&mut next);
        next.caused_by_event = Some(event.event_type());
        next.caused_by_actor_id = event.actor_id;

        if let Some(previous) = self.open.replace(next) {
            self.closed.push(previous);
        }
        Applied::Yes {
            same_instant: false,
        }
    }

    /// Handle an event arriving while the entity is deleted.
    fn reopen(&mut self, event: &EntityEvent, at: Instant) -> Applied {
        let Some(last) = self.closed.last() else {
            return Applied::NotLive;
        };
        let mut next = match &event.action {
            EventAction::Restore => last.clone(),
            EventAction::Create { is_content } => {
                let mut state = last.clone();
                state.key_historical = event.target.clone();
                state.is_content = *is_content;
                state.groups.clear();
                state.blocks.clear();
                state.block_expiration = None;
                state
            }
            _ => return Applied::NotLive,
        };
        next.start = Some(at);
        next.end = None;
        next.is_deleted = false;
        next.caused_by_event = Some(event.event_type());
        next.caused_by_actor_id = event.actor_id;
        self.open = Some(next);
        Applied::Yes {
            same_instant: false,
        }
    }

    fn finish(mut self) -> Vec<EntityState> {
        if let Some(open) = self.open.take() {
            self.closed.push(open);
        }
        self.closed
    }
}

/// The interval of `intervals` (one entity, sorted by start) containing `at`.
pub fn state_at(intervals: &[EntityState], at: Instant) -> Option<&EntityState> {
    let upto = intervals.partition_point(|s| s.start.map_or(true, |start| start <= at));
    intervals[..upto]
        .last()
        .filter(|state| state.span().contains(at))
}
