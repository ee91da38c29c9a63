//! # Identity Graph
//!
//! Follows entities through key-changing events. Renames form a forward-only
//! adjacency map `historical key -> [(timestamp, next key)]` per domain.
//! Resolving a key walks renames forward in time, never stepping back, until
//! the key that was live at the lookup time. A walk that reaches a key it has
//! already visited is a corrupt graph and fails the run, even when the
//! return happens later in time (`A -> B -> A`).
//!
//! [`attribute_domain`] uses the resolver to assign entity ids to events
//! recorded without one (or under a stale key).

use crate::error::{ReconstructionError, Result};
use crate::keys::{pseudo_entity_id, KeyedEvent};
use crate::model::{EntityEvent, EntityState, EventAction, IdentityEdge, IdentityKey};
use crate::temporal::Instant;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct Link {
    timestamp: Instant,
    to: IdentityKey,
}

/// Rename graph of a single domain.
#[derive(Debug, Clone, Default)]
pub struct IdentityGraph {
    domain: String,
    /// Outgoing renames per key, ascending by timestamp
    outgoing: FxHashMap<IdentityKey, Vec<Link>>,
    edge_count: usize,
}

impl IdentityGraph {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Build a graph from edges; edges from other domains are ignored.
    pub fn from_edges<I>(domain: impl Into<String>, edges: I) -> Self
    where
        I: IntoIterator<Item = IdentityEdge>,
    {
        let mut graph = Self::new(domain);
        for edge in edges {
            graph.add_edge(edge);
        }
        graph.finish();
        graph
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Record a rename. Call [`IdentityGraph::finish`] before resolving if
    /// edges were added out of time order.
    pub fn add_edge(&mut self, edge: IdentityEdge) {
        if edge.domain != self.domain || edge.from == edge.to {
            return;
        }
        self.outgoing.entry(edge.from).or_default().push(Link {
            timestamp: edge.timestamp,
            to: edge.to,
        });
        self.edge_count += 1;
    }

    /// Restore timestamp order on every adjacency list (stable for ties).
    pub fn finish(&mut self) {
        for links in self.outgoing.values_mut() {
            links.sort_by_key(|link| link.timestamp);
        }
    }

    /// Latest rename out of `key` at or before `at`.
    fn latest_outgoing(&self, key: &IdentityKey, at: Instant) -> Option<&Link> {
        let links = self.outgoing.get(key)?;
        let upto = links.partition_point(|link| link.timestamp <= at);
        links[..upto].last()
    }

    /// Earliest rename out of `key` with `from <= timestamp <= at`.
    fn next_outgoing(&self, key: &IdentityKey, from: Instant, at: Instant) -> Option<&Link> {
        let links = self.outgoing.get(key)?;
        let first = links.partition_point(|link| link.timestamp < from);
        links.get(first).filter(|link| link.timestamp <= at)
    }

    /// The key that `key` had become by time `at`.
    ///
    /// `key` is taken as a historical key: the walk starts from its most
    /// recent rename at or before `at`. A key never renamed by then resolves
    /// to itself.
    ///
    /// # Errors
    /// [`ReconstructionError::IdentityCycle`] when the walk revisits a key.
    pub fn resolve(&self, key: &IdentityKey, at: Instant) -> Result<IdentityKey> {
        match self.latest_outgoing(key, at) {
            Some(link) => self.walk(key, Some(link), at),
            None => Ok(key.clone()),
        }
    }

    /// The key carried at `at` by whichever entity held `key` at `from`.
    ///
    /// Renames out of `key` before `from` belong to an earlier holder of the
    /// name and are not followed.
    ///
    /// # Errors
    /// [`ReconstructionError::IdentityCycle`] when the walk revisits a key.
    pub fn resolve_between(
        &self,
        key: &IdentityKey,
        from: Instant,
        at: Instant,
    ) -> Result<IdentityKey> {
        self.walk(key, self.next_outgoing(key, from, at), at)
    }

    /// The key carried at the end of the recorded history by whichever
    /// entity held `key` at `from`.
    pub fn resolve_current(&self, key: &IdentityKey, from: Instant) -> Result<IdentityKey> {
        self.resolve_between(key, from, Instant::MAX)
    }

    /// Walk forward from every recorded rename, failing on the first key
    /// revisited. Keys are visited in sorted order so the reported path is
    /// the same on every run.
    ///
    /// # Errors
    /// [`ReconstructionError::IdentityCycle`] for the first cycle found.
    pub fn check_acyclic(&self) -> Result<()> {
        let mut sources: Vec<&IdentityKey> = self.outgoing.keys().collect();
        sources.sort_unstable();
        for key in sources {
            for link in self.outgoing.get(key).into_iter().flatten() {
                self.walk(key, Some(link), Instant::MAX)?;
            }
        }
        Ok(())
    }

    fn walk(&self, start: &IdentityKey, first: Option<&Link>, at: Instant) -> Result<IdentityKey> {
        let mut current = start.clone();
        let mut visited: FxHashSet<IdentityKey> = FxHashSet::default();
        let mut path = vec![current.clone()];
        visited.insert(current.clone());

        let mut step = first;
        while let Some(link) = step {
            let next = link.to.clone();
            path.push(next.clone());
            if !visited.insert(next.clone()) {
                return Err(ReconstructionError::IdentityCycle {
                    domain: self.domain.clone(),
                    path: path
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" -> "),
                });
            }
            step = self.next_outgoing(&next, link.timestamp, at);
            current = next;
        }
        Ok(current)
    }
}

/// Events of one domain with their entity ids decided.
#[derive(Debug, Clone, Default)]
pub struct DomainAttribution {
    pub events: Vec<KeyedEvent>,
    /// Events that could not be tied to any lineage
    pub unmatched: Vec<EntityEvent>,
    pub via_holder: u64,
    pub via_graph: u64,
    pub via_snapshot: u64,
    pub new_lineages: u64,
}

/// Assign entity ids to a domain's events by replaying them forward.
///
/// Events carrying a valid id keep it. Otherwise the key the event was
/// recorded under is looked up, in order, as: the key's current holder in
/// the replay; the holder of the key it had been renamed to by the event
/// time; the snapshot entity owning the key's present-day successor. The
/// successor is followed from the event time only, so a name reused after a
/// rename never leads back to its previous holder.
/// Creations and renames that match nothing start a new lineage with a
/// pseudo-id; anything else is unmatched.
///
/// `events` must already be free of parsing errors and all belong to
/// `domain`. `snapshots` are the domain's snapshot states with final ids.
#[instrument(skip(events, snapshots), fields(events = events.len()), level = "debug")]
pub fn attribute_domain(
    domain: &str,
    mut events: Vec<EntityEvent>,
    snapshots: &[EntityState],
) -> Result<DomainAttribution> {
    events.sort_by_key(|event| (event.timestamp, event.change_id));
    let graph = IdentityGraph::from_edges(
        domain,
        events.iter().filter_map(EntityEvent::identity_edge),
    );
    // Events attributed through their key's holder never reach the resolver.
    graph.check_acyclic()?;

    let mut snapshot_owner: FxHashMap<&IdentityKey, i64> = FxHashMap::default();
    for state in snapshots {
        snapshot_owner.entry(&state.key).or_insert(state.entity_id);
    }

    let mut holders: FxHashMap<IdentityKey, i64> = FxHashMap::default();
    let mut out = DomainAttribution::default();

    for event in events {
        let at = event.timestamp.unwrap_or(Instant::MIN);
        let is_creation = matches!(event.action, EventAction::Create { .. });

        let entity_id = match event.valid_entity_id() {
            Some(id) => Some(id),
            None if is_creation => {
                let present = graph.resolve_current(&event.target, at)?;
                snapshot_owner.get(&present).copied()
            }
            None => {
                if let Some(id) = holders.get(&event.target) {
                    out.via_holder += 1;
                    Some(*id)
                } else {
                    let resolved = graph.resolve(&event.target, at)?;
                    match holders.get(&resolved) {
                        Some(id) if resolved != event.target => {
                            out.via_graph += 1;
                            Some(*id)
                        }
                        _ => {
                            let present = graph.resolve_current(&resolved, at)?;
                            let owner = snapshot_owner.get(&present).copied();
                            if owner.is_some() {
                                out.via_snapshot += 1;
                            }
                            owner
                        }
                    }
                }
            }
        };

        let entity_id = match entity_id {
            Some(id) => id,
            None if is_creation || matches!(event.action, EventAction::Rename { .. }) => {
                out.new_lineages += 1;
                pseudo_entity_id(&event)
            }
            None => {
                out.unmatched.push(event);
                continue;
            }
        };

        match &event.action {
            EventAction::Create { .. } | EventAction::Restore => {
                holders.insert(event.target.clone(), entity_id);
            }
            EventAction::Rename { new, .. } => {
                if holders.get(&event.target) == Some(&entity_id) {
                    holders.remove(&event.target);
                }
                holders.insert(new.clone(), entity_id);
            }
            // Only creations, restores and renames move key ownership.
            EventAction::AlterGroups { .. }
            | EventAction::AlterBlocks { .. }
            | EventAction::Delete => {}
        }

        out.events.push(KeyedEvent::new(event, entity_id));
    }

    debug!(
        domain,
        renames = graph.edge_count(),
        attributed = out.events.len(),
        unmatched = out.unmatched.len(),
        new_lineages = out.new_lineages,
        "attributed domain events"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;

    fn edge(from: &str, to: &str, at: Instant) -> IdentityEdge {
        IdentityEdge {
            domain: "x".to_string(),
            from: IdentityKey::user(from),
            to: IdentityKey::user(to),
            timestamp: at,
        }
    }

    fn user(name: &str) -> IdentityKey {
        IdentityKey::user(name)
    }

    #[test]
    fn test_resolve_follows_chain_up_to_lookup_time() {
        let graph = IdentityGraph::from_edges("x", vec![edge("A", "B", 200), edge("B", "C", 300)]);
        assert_eq!(graph.resolve(&user("A"), 150).unwrap(), user("A"));
        assert_eq!(graph.resolve(&user("A"), 250).unwrap(), user("B"));
        assert_eq!(graph.resolve(&user("A"), 300).unwrap(), user("C"));
        assert_eq!(graph.resolve_current(&user("B"), 0).unwrap(), user("C"));
    }

    #[test]
    fn test_unknown_key_resolves_to_itself() {
        let graph = IdentityGraph::from_edges("x", vec![edge("A", "B", 200)]);
        assert_eq!(graph.resolve(&user("Z"), 1_000).unwrap(), user("Z"));
    }

    #[test]
    fn test_walk_never_steps_back_in_time() {
        // C -> D happened before B -> C, so it is not part of A's lineage
        let graph = IdentityGraph::from_edges(
            "x",
            vec![edge("C", "D", 100), edge("A", "B", 200), edge("B", "C", 300)],
        );
        assert_eq!(graph.resolve(&user("A"), 400).unwrap(), user("C"));
    }

    #[test]
    fn test_rename_back_later_in_time_is_fatal() {
        let graph = IdentityGraph::from_edges("x", vec![edge("A", "B", 200), edge("B", "A", 300)]);
        assert_eq!(graph.resolve(&user("A"), 250).unwrap(), user("B"));
        match graph.resolve(&user("A"), 350) {
            Err(ReconstructionError::IdentityCycle { path, .. }) => assert_eq!(path, "A -> B -> A"),
            other => panic!("expected identity cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_check_acyclic_finds_rename_back() {
        let clean = IdentityGraph::from_edges("x", vec![edge("A", "B", 200), edge("B", "C", 300)]);
        assert!(clean.check_acyclic().is_ok());

        let looped = IdentityGraph::from_edges(
            "x",
            vec![edge("A", "B", 200), edge("B", "C", 300), edge("C", "A", 400)],
        );
        match looped.check_acyclic() {
            Err(ReconstructionError::IdentityCycle { path, .. }) => {
                assert_eq!(path, "A -> B -> C -> A")
            }
            other => panic!("expected identity cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_between_skips_earlier_holder() {
        // A was renamed to B at 200 and re-registered afterwards
        let graph = IdentityGraph::from_edges("x", vec![edge("A", "B", 200), edge("B", "C", 400)]);
        assert_eq!(graph.resolve_current(&user("A"), 100).unwrap(), user("C"));
        assert_eq!(graph.resolve_current(&user("A"), 300).unwrap(), user("A"));
        assert_eq!(graph.resolve_between(&user("A"), 100, 300).unwrap(), user("B"));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let graph = IdentityGraph::from_edges("x", vec![edge("A", "B", 200), edge("B", "A", 200)]);
        let err = graph.resolve(&user("A"), 250).unwrap_err();
        match err {
            ReconstructionError::IdentityCycle { domain, path } => {
                assert_eq!(domain, "x");
                assert_eq!(path, "A -> B -> A");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_edges_from_other_domains_are_ignored() {
        let mut foreign = edge("A", "B", 200);
        foreign.domain = "y".to_string();
        let graph = IdentityGraph::from_edges("x", vec![foreign]);
        assert_eq!(graph.edge_count(), 0);
    }

    fn event(at: Instant, target: &str, action: EventAction) -> EntityEvent {
        EntityEvent::new(EntityKind::User, "x", at, user(target), action)
    }

    fn rename(at: Instant, from: &str, to: &str) -> EntityEvent {
        event(
            at,
            from,
            EventAction::Rename {
                new: user(to),
                new_is_content: None,
            },
        )
    }

    fn block(at: Instant, target: &str) -> EntityEvent {
        event(
            at,
            target,
            EventAction::AlterBlocks {
                old_blocks: vec![],
                new_blocks: vec!["nocreate".to_string()],
                expiration: None,
            },
        )
    }

    #[test]
    fn test_stale_key_attributed_through_graph() {
        let events = vec![
            event(100, "A", EventAction::Create { is_content: None }).with_entity_id(42),
            rename(200, "A", "B"),
            rename(300, "B", "C"),
            block(250, "A"),
        ];
        let attribution = attribute_domain("x", events, &[]).unwrap();
        assert!(attribution.unmatched.is_empty());
        assert_eq!(attribution.events.len(), 4);
        assert!(attribution
            .events
            .iter()
            .all(|keyed| keyed.key.partition.entity_id == 42));
        assert_eq!(attribution.via_graph, 1);
    }

    #[test]
    fn test_snapshot_anchors_pre_log_entities() {
        let snapshot = EntityState::snapshot(EntityKind::User, "x", 7, user("Final"), Some(10));
        let events = vec![rename(200, "Old", "Final"), block(300, "Final")];
        let attribution = attribute_domain("x", events, &[snapshot]).unwrap();
        assert_eq!(attribution.via_snapshot, 1);
        assert!(attribution
            .events
            .iter()
            .all(|keyed| keyed.key.partition.entity_id == 7));
    }

    #[test]
    fn test_reused_name_goes_to_new_holder() {
        let snapshots = vec![
            EntityState::snapshot(EntityKind::User, "x", 5, user("B"), Some(100)),
            EntityState::snapshot(EntityKind::User, "x", 6, user("A"), Some(300)),
        ];
        let events = vec![
            event(100, "A", EventAction::Create { is_content: None }),
            rename(200, "A", "B"),
            event(300, "A", EventAction::Create { is_content: None }),
            block(400, "A"),
        ];
        let attribution = attribute_domain("x", events, &snapshots).unwrap();
        let ids: Vec<_> = attribution
            .events
            .iter()
            .map(|keyed| keyed.key.partition.entity_id)
            .collect();
        assert_eq!(ids, vec![5, 5, 6, 6]);
        assert!(attribution.unmatched.is_empty());
    }

    #[test]
    fn test_unknown_rename_starts_new_lineage_and_orphans_are_unmatched() {
        let events = vec![rename(200, "Ghost", "Spirit"), block(300, "Spirit"), block(50, "Nobody")];
        let attribution = attribute_domain("x", events, &[]).unwrap();
        assert_eq!(attribution.new_lineages, 1);
        assert_eq!(attribution.unmatched.len(), 1);
        assert_eq!(attribution.unmatched[0].target, user("Nobody"));
        let ids: Vec<_> = attribution
            .events
            .iter()
            .map(|keyed| keyed.key.partition.entity_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < 0);
        assert_eq!(ids[0], ids[1]);
    }
}
