//! # Reconstruction Runner
//!
//! Thin orchestrator over in-memory collections for one entity kind:
//!
//! ```text
//! events ──► domain filter ──► parsing check ──► per-domain attribution (parallel)
//!                                                        │
//! snapshots ──► domain filter ──► pseudo-ids ────────────┤
//!                                                        ▼
//!                                       repartition + sort (events, states)
//!                                                        │
//!                                       per-shard history build (parallel)
//!                                                        │
//!                                        merge ──► sorted states + diagnostics
//! ```
//!
//! A run is all-or-nothing: the first invariant violation in any domain or
//! shard fails the whole run and no partial output is returned.

use crate::config::ReconstructionConfig;
use crate::history::{state_at, BuildOutput, HistoryBuilder};
use crate::identity::{attribute_domain, DomainAttribution};
use crate::keys::{pseudo_entity_id, KeyedEvent, KeyedState, StateKey};
use crate::metrics::ReconstructionMetrics;
use crate::model::{Diagnostic, DiagnosticCategory, EntityEvent, EntityKind, EntityState};
use crate::partitioning::{PartitionedCollection, Partitioner};
use crate::temporal::Instant;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct ReconstructionOutput {
    pub kind: EntityKind,
    /// All intervals, sorted by [`StateKey`]
    pub states: Vec<EntityState>,
    /// Empty when diagnostics are disabled
    pub diagnostics: Vec<Diagnostic>,
    pub metrics: ReconstructionMetrics,
}

impl ReconstructionOutput {
    /// Intervals grouped by domain, for per-domain storage.
    pub fn states_by_domain(&self) -> BTreeMap<&str, Vec<&EntityState>> {
        let mut by_domain: BTreeMap<&str, Vec<&EntityState>> = BTreeMap::new();
        for state in &self.states {
            by_domain.entry(state.domain.as_str()).or_default().push(state);
        }
        by_domain
    }

    /// All intervals of one entity, oldest first.
    pub fn entity_history(&self, domain: &str, entity_id: i64) -> &[EntityState] {
        fn position(s: &EntityState) -> (&str, i64) {
            (s.domain.as_str(), s.entity_id)
        }
        let from = self
            .states
            .partition_point(|s| position(s) < (domain, entity_id));
        let to = self
            .states
            .partition_point(|s| position(s) <= (domain, entity_id));
        &self.states[from..to]
    }

    /// The state of one entity at `at`.
    pub fn state_at(&self, domain: &str, entity_id: i64, at: Instant) -> Option<&EntityState> {
        state_at(self.entity_history(domain, entity_id), at)
    }
}

/// Runs reconstructions with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ReconstructionRunner {
    config: ReconstructionConfig,
    partitioner: Partitioner,
    builder: HistoryBuilder,
}

impl ReconstructionRunner {
    pub fn new(config: ReconstructionConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let partitioner = Partitioner::new(config.partition_count)?;
        let builder =
            HistoryBuilder::new(config.diagnostics.enabled, config.diagnostics.max_raw_len);
        Ok(Self {
            config,
            partitioner,
            builder,
        })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    fn diagnostic<T: serde::Serialize>(
        &self,
        domain: &str,
        category: DiagnosticCategory,
        record: &T,
    ) -> Option<Diagnostic> {
        self.config.diagnostics.enabled.then(|| {
            Diagnostic::from_record(
                domain,
                category,
                record,
                self.config.diagnostics.max_raw_len,
            )
        })
    }

    /// Reconstruct the histories of every `kind` entity in the inputs.
    ///
    /// Records of other kinds and of domains outside the allow-list are
    /// skipped. Users and pages are never reconstructed together.
    ///
    /// # Errors
    /// Fails when an invariant is violated anywhere in the run: an identity
    /// cycle, out-of-order merge input, or an interval ending before it starts.
    #[instrument(skip(self, events, snapshots), fields(events = events.len(), snapshots = snapshots.len()), level = "debug")]
    pub fn run(
        &self,
        kind: EntityKind,
        events: Vec<EntityEvent>,
        snapshots: Vec<EntityState>,
    ) -> anyhow::Result<ReconstructionOutput> {
        let mut metrics = ReconstructionMetrics::new();
        let mut diagnostics = Vec::new();

        let input_events = events.len();
        let input_snapshots = snapshots.len();
        let mut events: Vec<EntityEvent> = events
            .into_iter()
            .filter(|e| e.kind == kind && self.config.allows_domain(&e.domain))
            .collect();
        let mut snapshots: Vec<EntityState> = snapshots
            .into_iter()
            .filter(|s| s.kind == kind && self.config.allows_domain(&s.domain))
            .collect();
        let skipped = (input_events - events.len()) + (input_snapshots - snapshots.len());
        if skipped > 0 {
            debug!(skipped, %kind, "skipped records of other kinds or domains");
        }
        metrics.events_read = events.len() as u64;
        metrics.snapshots_read = snapshots.len() as u64;

        // Parsing failures never reach reconstruction.
        events.retain(|event| {
            if event.has_parsing_errors() || event.timestamp.is_none() {
                metrics.parsing_errors += 1;
                diagnostics.extend(self.diagnostic(
                    &event.domain,
                    DiagnosticCategory::Parsing,
                    event,
                ));
                false
            } else {
                true
            }
        });

        for state in &mut snapshots {
            if state.entity_id <= 0 {
                let pseudo = pseudo_entity_id(&*state);
                state.entity_id = pseudo;
                metrics.pseudo_id_snapshots += 1;
            }
        }

        let attributions = self.attribute(events, &snapshots)?;
        let mut keyed_events: Vec<KeyedEvent> = Vec::new();
        for attribution in attributions {
            metrics.attributed_via_holder += attribution.via_holder;
            metrics.attributed_via_graph += attribution.via_graph;
            metrics.attributed_via_snapshot += attribution.via_snapshot;
            metrics.new_lineages += attribution.new_lineages;
            metrics.unmatched_events += attribution.unmatched.len() as u64;
            for event in &attribution.unmatched {
                diagnostics.extend(self.diagnostic(
                    &event.domain,
                    DiagnosticCategory::Matching,
                    event,
                ));
            }
            keyed_events.extend(attribution.events);
        }
        let keyed_states: Vec<KeyedState> = snapshots.into_iter().map(KeyedState::new).collect();

        let event_shards =
            PartitionedCollection::repartition_and_sort(keyed_events, &self.partitioner);
        let state_shards =
            PartitionedCollection::repartition_and_sort(keyed_states, &self.partitioner);

        let built: Vec<BuildOutput> = event_shards
            .into_shards()
            .into_par_iter()
            .zip(state_shards.into_shards().into_par_iter())
            .enumerate()
            .map(|(shard, (events, states))| {
                self.builder
                    .build_partition(events, states)
                    .map_err(|err| {
                        let invariant = err.invariant();
                        anyhow::Error::new(err).context(format!(
                            "{invariant} violated building {kind} histories in partition {shard}"
                        ))
                    })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut merged = BuildOutput::default();
        for output in built {
            merged.extend(output);
        }
        metrics.merge(&merged.metrics);
        diagnostics.extend(merged.diagnostics);

        let mut states = merged.states;
        states.sort_by_cached_key(StateKey::for_state);
        diagnostics.sort();

        if metrics.duplicate_snapshots > 0 {
            warn!(
                duplicates = metrics.duplicate_snapshots,
                "snapshot inputs carried duplicate entities"
            );
        }
        info!(
            %kind,
            events = metrics.events_read,
            snapshots = metrics.snapshots_read,
            entities = metrics.entities_built,
            intervals = metrics.intervals_emitted,
            parsing_errors = metrics.parsing_errors,
            unmatched = metrics.unmatched_events,
            empty_registrations = metrics.empty_registrations,
            "reconstruction complete"
        );

        Ok(ReconstructionOutput {
            kind,
            states,
            diagnostics,
            metrics,
        })
    }

    /// Attribute events to entity ids, one domain per task.
    fn attribute(
        &self,
        events: Vec<EntityEvent>,
        snapshots: &[EntityState],
    ) -> anyhow::Result<Vec<DomainAttribution>> {
        let mut events_by_domain: BTreeMap<String, Vec<EntityEvent>> = BTreeMap::new();
        for event in events {
            events_by_domain
                .entry(event.domain.clone())
                .or_default()
                .push(event);
        }
        let mut snapshots_by_domain: BTreeMap<&str, Vec<EntityState>> = BTreeMap::new();
        for state in snapshots {
            snapshots_by_domain
                .entry(state.domain.as_str())
                .or_default()
                .push(state.clone());
        }

        events_by_domain
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(domain, events)| {
                let domain_snapshots = snapshots_by_domain
                    .get(domain.as_str())
                    .map_or(&[][..], Vec::as_slice);
                attribute_domain(&domain, events, domain_snapshots).map_err(|err| {
                    let invariant = err.invariant();
                    anyhow::Error::new(err).context(format!(
                        "{invariant} violated attributing events of domain {domain}"
                    ))
                })
            })
            .collect()
    }
}
