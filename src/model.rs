//! # Data Model
//!
//! Change events, snapshot/interval states, identity edges and diagnostics
//! for users and pages.

use crate::temporal::{Instant, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of entity whose history is reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Page,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Page => write!(f, "page"),
        }
    }
}

/// Natural (mutable) key of an entity: user name, or page namespace + title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    /// Page namespace; `None` for users
    pub namespace: Option<i32>,
    pub name: String,
}

impl IdentityKey {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn page(namespace: i32, title: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace),
            name: title.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Some(ns) => write!(f, "{}:{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Tag recording which kind of event opened an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Create,
    Rename,
    AlterGroups,
    AlterBlocks,
    Delete,
    Restore,
}

/// Type-specific payload of a change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAction {
    /// User registration or page creation under the event's target key.
    Create { is_content: Option<bool> },
    /// The target key changes to `new`.
    Rename {
        new: IdentityKey,
        new_is_content: Option<bool>,
    },
    /// Permission-group change.
    AlterGroups {
        old_groups: Vec<String>,
        new_groups: Vec<String>,
    },
    /// Block, reblock or unblock; an empty `new_blocks` lifts the block.
    AlterBlocks {
        old_blocks: Vec<String>,
        new_blocks: Vec<String>,
        expiration: Option<String>,
    },
    Delete,
    Restore,
}

impl EventAction {
    pub fn event_type(&self) -> EventType {
        match self {
            EventAction::Create { .. } => EventType::Create,
            EventAction::Rename { .. } => EventType::Rename,
            EventAction::AlterGroups { .. } => EventType::AlterGroups,
            EventAction::AlterBlocks { .. } => EventType::AlterBlocks,
            EventAction::Delete => EventType::Delete,
            EventAction::Restore => EventType::Restore,
        }
    }
}

/// A discrete change event from the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub kind: EntityKind,
    pub domain: String,
    pub timestamp: Option<Instant>,
    /// Monotonically assigned change id, breaks ties between events sharing a timestamp
    pub change_id: Option<i64>,
    /// Entity id when the log recorded one; often absent for renames
    pub entity_id: Option<i64>,
    /// Actor who caused the event
    pub actor_id: Option<i64>,
    /// Key the event was recorded under (the old key for renames)
    pub target: IdentityKey,
    pub action: EventAction,
    #[serde(default)]
    pub parsing_errors: Vec<String>,
}

impl EntityEvent {
    pub fn new(
        kind: EntityKind,
        domain: impl Into<String>,
        timestamp: Instant,
        target: IdentityKey,
        action: EventAction,
    ) -> Self {
        Self {
            kind,
            domain: domain.into(),
            timestamp: Some(timestamp),
            change_id: None,
            entity_id: None,
            actor_id: None,
            target,
            action,
            parsing_errors: Vec::new(),
        }
    }

    pub fn with_entity_id(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_change_id(mut self, change_id: i64) -> Self {
        self.change_id = Some(change_id);
        self
    }

    pub fn with_actor(mut self, actor_id: i64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn event_type(&self) -> EventType {
        self.action.event_type()
    }

    /// Usable entity id (strictly positive), if the log recorded one.
    pub fn valid_entity_id(&self) -> Option<i64> {
        self.entity_id.filter(|id| *id > 0)
    }

    /// Whether this event is excluded from reconstruction.
    pub fn has_parsing_errors(&self) -> bool {
        !self.parsing_errors.is_empty()
    }

    /// The identity edge carried by a key-changing event.
    pub fn identity_edge(&self) -> Option<IdentityEdge> {
        match (&self.action, self.timestamp) {
            (EventAction::Rename { new, .. }, Some(timestamp)) => Some(IdentityEdge {
                domain: self.domain.clone(),
                from: self.target.clone(),
                to: new.clone(),
                timestamp,
            }),
            _ => None,
        }
    }
}

/// A rename: `from` stops naming the entity and `to` starts at `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityEdge {
    pub domain: String,
    pub from: IdentityKey,
    pub to: IdentityKey,
    pub timestamp: Instant,
}

/// Entity attributes over a time span.
///
/// Used both for snapshot inputs (a single state per entity taken from the
/// live database, `caused_by_event == None`) and for reconstructed intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub kind: EntityKind,
    pub domain: String,
    pub entity_id: i64,
    /// Key valid during this interval
    pub key_historical: IdentityKey,
    /// Key the entity carries now (end of the lineage)
    pub key: IdentityKey,
    pub is_content: Option<bool>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    pub block_expiration: Option<String>,
    /// Registration / creation time
    pub creation_timestamp: Option<Instant>,
    /// Earliest known activity, used when registration is missing
    pub first_activity_timestamp: Option<Instant>,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub caused_by_event: Option<EventType>,
    pub caused_by_actor_id: Option<i64>,
    /// The interval was closed by a deletion
    #[serde(default)]
    pub is_deleted: bool,
}

impl EntityState {
    /// A snapshot row: the entity as the live database holds it today.
    pub fn snapshot(
        kind: EntityKind,
        domain: impl Into<String>,
        entity_id: i64,
        key: IdentityKey,
        creation_timestamp: Option<Instant>,
    ) -> Self {
        Self {
            kind,
            domain: domain.into(),
            entity_id,
            key_historical: key.clone(),
            key,
            is_content: None,
            groups: Vec::new(),
            blocks: Vec::new(),
            block_expiration: None,
            creation_timestamp,
            first_activity_timestamp: None,
            start: creation_timestamp,
            end: None,
            caused_by_event: None,
            caused_by_actor_id: None,
            is_deleted: false,
        }
    }

    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
    }
}

/// Category of a non-fatal, per-record problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCategory {
    /// Record failed to convert into a typed event or state
    Parsing,
    /// Event could not be attributed to a live lineage
    Matching,
    /// State without a determinable start
    EmptyRegistration,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCategory::Parsing => write!(f, "parsing"),
            DiagnosticCategory::Matching => write!(f, "matching"),
            DiagnosticCategory::EmptyRegistration => write!(f, "empty-registration"),
        }
    }
}

/// A diagnostics row: (domain, category, raw-record-text).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub domain: String,
    pub category: DiagnosticCategory,
    pub raw: String,
}

impl Diagnostic {
    /// Build a diagnostic carrying the JSON text of `record`, truncated to
    /// `max_raw_len` bytes on a character boundary.
    pub fn from_record<T: Serialize>(
        domain: &str,
        category: DiagnosticCategory,
        record: &T,
        max_raw_len: usize,
    ) -> Self {
        let mut raw = serde_json::to_string(record)
            .unwrap_or_else(|err| format!("<unserializable record: {err}>"));
        if raw.len() > max_raw_len {
            let mut cut = max_raw_len;
            while !raw.is_char_boundary(cut) {
                cut -= 1;
            }
            raw.truncate(cut);
        }
        Self {
            domain: domain.to_string(),
            category,
            raw,
        }
    }
}
