//! Event envelope — the fundamental unit of the Silo data pod.
//!
//! An event is an immutable record of something that happened (or was asked
//! to happen) to a subject. Events are never updated or deleted; the log is
//! the source of truth and every projection table is derived from it.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, policy::PolicySource};

// ─── Name segments ───────────────────────────────────────────────────────────

/// The subject family an event belongs to. Families are the plural table
/// names; the set is closed, so routing can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
  Entities,
  Projects,
  WorkspaceMembers,
  ApiKeys,
  Proposals,
}

impl Family {
  pub const ALL: [Family; 5] = [
    Family::Entities,
    Family::Projects,
    Family::WorkspaceMembers,
    Family::ApiKeys,
    Family::Proposals,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Entities => "entities",
      Self::Projects => "projects",
      Self::WorkspaceMembers => "workspace_members",
      Self::ApiKeys => "api_keys",
      Self::Proposals => "proposals",
    }
  }

  /// The default `subject_type` category for events in this family.
  pub fn singular(&self) -> &'static str {
    match self {
      Self::Entities => "entity",
      Self::Projects => "project",
      Self::WorkspaceMembers => "workspace_member",
      Self::ApiKeys => "api_key",
      Self::Proposals => "proposal",
    }
  }

  /// The actions this family's event names may carry. Membership uses its
  /// own verb set; every other family uses plain CRUD.
  pub fn supports(&self, action: Action) -> bool {
    match self {
      Self::WorkspaceMembers => {
        matches!(action, Action::Add | Action::Remove | Action::UpdateRole)
      }
      Self::ApiKeys => matches!(action, Action::Create | Action::Delete),
      _ => matches!(action, Action::Create | Action::Update | Action::Delete),
    }
  }
}

impl FromStr for Family {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Family::ALL
      .into_iter()
      .find(|f| f.as_str() == s)
      .ok_or_else(|| Error::UnknownEventType(s.to_string()))
  }
}

impl fmt::Display for Family {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The operation segment of an event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  Create,
  Update,
  Delete,
  // Membership verbs.
  Add,
  Remove,
  UpdateRole,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Add => "add",
      Self::Remove => "remove",
      Self::UpdateRole => "update_role",
    }
  }
}

impl FromStr for Action {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "create" => Ok(Self::Create),
      "update" => Ok(Self::Update),
      "delete" => Ok(Self::Delete),
      "add" => Ok(Self::Add),
      "remove" => Ok(Self::Remove),
      "update_role" => Ok(Self::UpdateRole),
      other => Err(Error::UnknownEventType(other.to_string())),
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The lifecycle phase of an event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Requested,
  Validated,
  Completed,
}

impl Phase {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Requested => "requested",
      Self::Validated => "validated",
      Self::Completed => "completed",
    }
  }
}

impl FromStr for Phase {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "requested" => Ok(Self::Requested),
      "validated" => Ok(Self::Validated),
      "completed" => Ok(Self::Completed),
      other => Err(Error::UnknownEventType(other.to_string())),
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── EventName ───────────────────────────────────────────────────────────────

/// A fully decoded `{family}.{action}.{phase}` event name.
///
/// Names are parsed exactly once, at construction or at the dispatch
/// boundary; everything downstream matches on the typed segments instead of
/// re-splitting strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventName {
  pub family: Family,
  pub action: Action,
  pub phase:  Phase,
}

impl EventName {
  pub fn new(family: Family, action: Action, phase: Phase) -> Result<Self> {
    if !family.supports(action) {
      return Err(Error::UnknownEventType(format!(
        "{family}.{action}.{phase}"
      )));
    }
    Ok(Self { family, action, phase })
  }

  /// Parse a wire name. Exactly three lowercase dot-delimited segments;
  /// anything else is an error, never a silent fallback.
  pub fn parse(s: &str) -> Result<Self> {
    let mut parts = s.split('.');
    let (Some(family), Some(action), Some(phase), None) =
      (parts.next(), parts.next(), parts.next(), parts.next())
    else {
      return Err(Error::UnknownEventType(s.to_string()));
    };
    Self::new(family.parse()?, action.parse()?, phase.parse()?)
  }

  /// The same name with a different phase — used to rewrite `requested`
  /// into `validated` on the fast path.
  pub fn with_phase(self, phase: Phase) -> Self {
    Self { phase, ..self }
  }
}

impl fmt::Display for EventName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.family, self.action, self.phase)
  }
}

impl Serialize for EventName {
  fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for EventName {
  fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(d)?;
    EventName::parse(&raw).map_err(serde::de::Error::custom)
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Fixed system event names that exist outside the per-family grid.
pub const SYSTEM_EVENT_TYPES: [&str; 2] =
  ["system.migration.completed", "system.replay.completed"];

/// Membership test against the closed registry: the generated
/// `{family}.{action}.{phase}` grid plus the fixed system names. Returns
/// `false` for unrecognised strings rather than erroring.
pub fn is_valid_event_type(s: &str) -> bool {
  SYSTEM_EVENT_TYPES.contains(&s) || EventName::parse(s).is_ok()
}

// ─── Provenance ──────────────────────────────────────────────────────────────

/// How an event entered the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
  /// Submitted by a client through the HTTP surface.
  Api,
  /// Produced by the system itself (executors, completed-event audit).
  Automation,
  /// Mirrored in from an external synchronisation source.
  Sync,
  /// Backfilled by a data migration.
  Migration,
}

impl EventSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Api => "api",
      Self::Automation => "automation",
      Self::Sync => "sync",
      Self::Migration => "migration",
    }
  }
}

impl FromStr for EventSource {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "api" => Ok(Self::Api),
      "automation" => Ok(Self::Automation),
      "sync" => Ok(Self::Sync),
      "migration" => Ok(Self::Migration),
      other => Err(Error::Validation(format!("unknown event source: {other:?}"))),
    }
  }
}

// ─── Metadata ────────────────────────────────────────────────────────────────

/// Free-form annotation bag attached to every event. Policy decisions leave
/// their audit trail here; the fast path is explicitly tagged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub policy_reason:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub policy_source:         Option<PolicySource>,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub fast_path:             bool,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub requires_confirmation: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority:              Option<u8>,
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// An immutable event record. Once appended, no field ever changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub event_id:       Uuid,
  pub name:           EventName,
  /// The entity the event concerns.
  pub subject_id:     Uuid,
  /// Semantic category of the subject, e.g. `"entity"`.
  pub subject_type:   String,
  /// Structured payload specific to the event name.
  pub data:           serde_json::Value,
  /// The actor on whose behalf the event occurred. Mandatory — tenant
  /// isolation hangs off this field.
  pub user_id:        Uuid,
  pub source:         EventSource,
  /// Server-assigned; never changes after creation.
  pub recorded_at:    DateTime<Utc>,
  /// Groups causally related events (a `requested` event and the
  /// `validated`/`completed` events it leads to share this key).
  pub correlation_id: Option<Uuid>,
  pub metadata:       EventMetadata,
}

/// Input to [`Event::create`]. `event_id` and `recorded_at` are always
/// assigned at construction; they are not accepted from callers.
#[derive(Debug, Clone)]
pub struct NewEvent {
  pub name:           String,
  pub subject_id:     Uuid,
  pub subject_type:   String,
  pub data:           serde_json::Value,
  pub user_id:        Uuid,
  pub source:         EventSource,
  pub correlation_id: Option<Uuid>,
  pub metadata:       EventMetadata,
}

impl Event {
  /// Construct (but do not persist) an event.
  ///
  /// Fails with [`Error::Validation`] when the actor is missing, with
  /// [`Error::UnknownEventType`] when the name is outside the registry, and
  /// with [`Error::Validation`] when a registered payload check rejects the
  /// data. Pure construction — persistence is a separate step.
  pub fn create(input: NewEvent) -> Result<Self> {
    if input.user_id.is_nil() {
      return Err(Error::Validation(
        "event is missing an acting user id".to_string(),
      ));
    }
    let name = EventName::parse(&input.name)?;
    check_payload(&name, &input.data)?;

    Ok(Self {
      event_id: Uuid::new_v4(),
      name,
      subject_id: input.subject_id,
      subject_type: input.subject_type,
      data: input.data,
      user_id: input.user_id,
      source: input.source,
      recorded_at: Utc::now(),
      correlation_id: input.correlation_id,
      metadata: input.metadata,
    })
  }
}

// ─── Payload checks ──────────────────────────────────────────────────────────

/// Per-family payload requirements for intent phases. Completed events are
/// notifications and carry only identifying fields, so they are exempt.
fn check_payload(name: &EventName, data: &serde_json::Value) -> Result<()> {
  if name.phase == Phase::Completed {
    return Ok(());
  }
  let required: &[&str] = match (name.family, name.action) {
    (Family::Entities, Action::Create) => &["title"],
    (Family::Projects, Action::Create) => &["workspace_id", "name"],
    (Family::WorkspaceMembers, Action::Add) => &["workspace_id", "role"],
    (Family::WorkspaceMembers, Action::UpdateRole) => &["workspace_id", "role"],
    (Family::WorkspaceMembers, Action::Remove) => &["workspace_id"],
    _ => &[],
  };

  for field in required {
    let present = data
      .get(field)
      .map(|v| !v.is_null() && v.as_str() != Some(""))
      .unwrap_or(false);
    if !present {
      return Err(Error::Validation(format!(
        "{name} payload is missing required field {field:?}"
      )));
    }
  }
  Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
