use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use chronorust_rs::{
    EntityEvent, EntityKind, EntityState, EventAction, IdentityKey, Instant, ReconstructionConfig,
    ReconstructionRunner,
};

pub const DOMAIN: &str = "x";

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[allow(dead_code)]
pub fn runner(partition_count: usize) -> ReconstructionRunner {
    ReconstructionRunner::new(ReconstructionConfig {
        partition_count,
        ..Default::default()
    })
    .expect("valid runner config")
}

pub fn user(name: &str) -> IdentityKey {
    IdentityKey::user(name)
}

fn event(at: Instant, name: &str, action: EventAction) -> EntityEvent {
    EntityEvent::new(EntityKind::User, DOMAIN, at, user(name), action)
}

#[allow(dead_code)]
pub fn create(at: Instant, name: &str) -> EntityEvent {
    event(at, name, EventAction::Create { is_content: None })
}

#[allow(dead_code)]
pub fn rename(at: Instant, from: &str, to: &str) -> EntityEvent {
    event(
        at,
        from,
        EventAction::Rename {
            new: user(to),
            new_is_content: None,
        },
    )
}

#[allow(dead_code)]
pub fn alter_groups(at: Instant, name: &str, old: &[&str], new: &[&str]) -> EntityEvent {
    event(
        at,
        name,
        EventAction::AlterGroups {
            old_groups: old.iter().map(|g| g.to_string()).collect(),
            new_groups: new.iter().map(|g| g.to_string()).collect(),
        },
    )
}

#[allow(dead_code)]
pub fn block(at: Instant, name: &str) -> EntityEvent {
    event(
        at,
        name,
        EventAction::AlterBlocks {
            old_blocks: vec![],
            new_blocks: vec!["nocreate".to_string()],
            expiration: Some("infinity".to_string()),
        },
    )
}

#[allow(dead_code)]
pub fn delete(at: Instant, name: &str) -> EntityEvent {
    event(at, name, EventAction::Delete)
}

#[allow(dead_code)]
pub fn restore(at: Instant, name: &str) -> EntityEvent {
    event(at, name, EventAction::Restore)
}

#[allow(dead_code)]
pub fn snapshot(entity_id: i64, name: &str, created: Option<Instant>) -> EntityState {
    EntityState::snapshot(EntityKind::User, DOMAIN, entity_id, user(name), created)
}

/// `(start, end, historical name)` per interval.
#[allow(dead_code)]
pub fn spans(states: &[EntityState]) -> Vec<(Option<Instant>, Option<Instant>, String)> {
    states
        .iter()
        .map(|s| (s.start, s.end, s.key_historical.name.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct GeneratedDataset {
    pub events: Vec<EntityEvent>,
    pub snapshots: Vec<EntityState>,
}

/// Users with creation, renames (recorded without ids), group changes and
/// blocks across a few domains. Most users also have a snapshot row.
#[allow(dead_code)]
pub fn generate_dataset(entities: i64, seed: u64) -> GeneratedDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let domains = ["enwiki", "dewiki", "frwiki"];
    let mut events = Vec::new();
    let mut snapshots = Vec::new();
    let mut change_id = 0i64;

    for id in 1..=entities {
        let domain = domains[rng.random_range(0..domains.len())];
        let created: Instant = rng.random_range(1_000_000_000..1_500_000_000);
        let mut at = created;
        let mut name = format!("user{id}");
        let mut groups: Vec<String> = Vec::new();

        change_id += 1;
        events.push(
            EntityEvent::new(
                EntityKind::User,
                domain,
                at,
                user(&name),
                EventAction::Create { is_content: None },
            )
            .with_entity_id(id)
            .with_change_id(change_id),
        );

        for step in 0..rng.random_range(0..6) {
            at += rng.random_range(1..10_000_000);
            change_id += 1;
            let actor = rng.random_range(1..100);
            let event = match rng.random_range(0..3) {
                0 => {
                    let new_name = format!("user{id}_{step}");
                    let event = EntityEvent::new(
                        EntityKind::User,
                        domain,
                        at,
                        user(&name),
                        EventAction::Rename {
                            new: user(&new_name),
                            new_is_content: None,
                        },
                    );
                    name = new_name;
                    event
                }
                1 => {
                    let mut new_groups = groups.clone();
                    new_groups.push(format!("group{step}"));
                    let event = EntityEvent::new(
                        EntityKind::User,
                        domain,
                        at,
                        user(&name),
                        EventAction::AlterGroups {
                            old_groups: groups.clone(),
                            new_groups: new_groups.clone(),
                        },
                    )
                    .with_entity_id(id);
                    groups = new_groups;
                    event
                }
                _ => EntityEvent::new(
                    EntityKind::User,
                    domain,
                    at,
                    user(&name),
                    EventAction::AlterBlocks {
                        old_blocks: vec![],
                        new_blocks: vec!["nocreate".to_string()],
                        expiration: None,
                    },
                )
                .with_entity_id(id),
            };
            events.push(event.with_change_id(change_id).with_actor(actor));
        }

        if rng.random_bool(0.8) {
            let mut state =
                EntityState::snapshot(EntityKind::User, domain, id, user(&name), Some(created));
            state.groups = groups;
            snapshots.push(state);
        }
    }

    GeneratedDataset { events, snapshots }
}
