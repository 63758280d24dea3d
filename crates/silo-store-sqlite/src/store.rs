//! [`SqliteStore`] — the SQLite implementation of the Silo storage seams.
//!
//! One store type implements every narrow trait the rest of the system
//! needs: the append-only [`EventLog`], the per-family projection
//! repositories, the membership and rules lookups, and the executor step
//! memo. Higher layers depend on those traits, never on this type directly.

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use silo_core::{
  Error, Result,
  event::{Action, Event, EventMetadata, EventName, EventSource, Family, NewEvent, Phase},
  log::{EventLog, StepMemo},
  policy::{RuleSource, WorkspaceRules},
  role::{Membership, MembershipStore},
};

use crate::{
  encode::{RawEvent, RawMember, encode_dt, encode_uuid},
  schema::SCHEMA,
};

// ─── Error helpers ───────────────────────────────────────────────────────────

/// Infrastructure failures map onto the retryable `Storage` class.
pub(crate) fn storage(e: tokio_rusqlite::Error) -> Error {
  Error::Storage(e.to_string())
}

/// True when the failure is a uniqueness/primary-key violation rather than
/// an infrastructure fault.
pub(crate) fn is_constraint(e: &tokio_rusqlite::Error) -> bool {
  matches!(
    e,
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, _))
      if f.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Silo data pod backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted, and all
/// database access serialises through its dedicated thread.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await.map_err(storage)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory()
      .await
      .map_err(storage)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
      .map_err(storage)
  }

  /// Append the `{family}.{action}.completed` audit record that follows
  /// every successful projection write. Completed events are notifications,
  /// not triggers — they go to the log but never to the queue.
  pub(crate) async fn append_completed(
    &self,
    family: Family,
    action: Action,
    subject_id: Uuid,
    data: serde_json::Value,
    user_id: Uuid,
  ) -> Result<()> {
    let name = EventName::new(family, action, Phase::Completed)?;
    let event = Event::create(NewEvent {
      name:           name.to_string(),
      subject_id,
      subject_type:   family.singular().to_string(),
      data,
      user_id,
      source:         EventSource::Automation,
      correlation_id: None,
      metadata:       EventMetadata::default(),
    })?;
    self.append(event).await
  }

  /// Store or replace the policy rules for a workspace.
  pub async fn put_workspace_rules(
    &self,
    workspace_id: Uuid,
    rules: &WorkspaceRules,
  ) -> Result<()> {
    let ws_str    = encode_uuid(workspace_id);
    let rules_str = serde_json::to_string(rules)?;
    let at_str    = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO workspace_settings (workspace_id, rules, updated_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (workspace_id) DO UPDATE SET rules = ?2, updated_at = ?3",
          rusqlite::params![ws_str, rules_str, at_str],
        )?;
        Ok(())
      })
      .await
      .map_err(storage)
  }
}

// ─── EventLog impl ───────────────────────────────────────────────────────────

const EVENT_COLUMNS: &str = "event_id, name, subject_id, subject_type, data,
                             user_id, source, recorded_at, correlation_id, metadata";

fn event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
  Ok(RawEvent {
    event_id:       row.get(0)?,
    name:           row.get(1)?,
    subject_id:     row.get(2)?,
    subject_type:   row.get(3)?,
    data:           row.get(4)?,
    user_id:        row.get(5)?,
    source:         row.get(6)?,
    recorded_at:    row.get(7)?,
    correlation_id: row.get(8)?,
    metadata:       row.get(9)?,
  })
}

impl EventLog for SqliteStore {
  async fn append(&self, event: Event) -> Result<()> {
    let event_id            = event.event_id;
    let event_id_str        = encode_uuid(event.event_id);
    let name_str            = event.name.to_string();
    let subject_id_str      = encode_uuid(event.subject_id);
    let subject_type        = event.subject_type;
    let data_str            = event.data.to_string();
    let user_id_str         = encode_uuid(event.user_id);
    let source_str          = event.source.as_str().to_owned();
    let recorded_at_str     = encode_dt(event.recorded_at);
    let correlation_id_str  = event.correlation_id.map(encode_uuid);
    let metadata_str        = serde_json::to_string(&event.metadata)?;

    let outcome = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO events (
             event_id, name, subject_id, subject_type, data,
             user_id, source, recorded_at, correlation_id, metadata
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            event_id_str,
            name_str,
            subject_id_str,
            subject_type,
            data_str,
            user_id_str,
            source_str,
            recorded_at_str,
            correlation_id_str,
            metadata_str,
          ],
        )?;
        Ok(())
      })
      .await;

    match outcome {
      Ok(()) => Ok(()),
      Err(e) if is_constraint(&e) => Err(Error::DuplicateEvent(event_id)),
      Err(e) => Err(storage(e)),
    }
  }

  async fn events_for_subject(&self, subject_id: Uuid) -> Result<Vec<Event>> {
    let subject_id_str = encode_uuid(subject_id);

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM events
           WHERE subject_id = ?1
           ORDER BY recorded_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![subject_id_str], event_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn events_for_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>> {
    let correlation_id_str = encode_uuid(correlation_id);

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM events
           WHERE correlation_id = ?1
           ORDER BY recorded_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![correlation_id_str], event_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(storage)?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }
}

// ─── MembershipStore impl ────────────────────────────────────────────────────

impl MembershipStore for SqliteStore {
  async fn membership(
    &self,
    workspace_id: Uuid,
    user_id: Uuid,
  ) -> Result<Option<Membership>> {
    let ws_str   = encode_uuid(workspace_id);
    let user_str = encode_uuid(user_id);

    let raw: Option<RawMember> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT workspace_id, user_id, role, added_by, created_at, updated_at
               FROM workspace_members
               WHERE workspace_id = ?1 AND user_id = ?2",
              rusqlite::params![ws_str, user_str],
              |row| {
                Ok(RawMember {
                  workspace_id: row.get(0)?,
                  user_id:      row.get(1)?,
                  role:         row.get(2)?,
                  added_by:     row.get(3)?,
                  created_at:   row.get(4)?,
                  updated_at:   row.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await
      .map_err(storage)?;

    raw.map(RawMember::into_membership).transpose()
  }
}

// ─── RuleSource impl ─────────────────────────────────────────────────────────

impl RuleSource for SqliteStore {
  async fn workspace_rules(&self, workspace_id: Uuid) -> Result<WorkspaceRules> {
    let ws_str = encode_uuid(workspace_id);

    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT rules FROM workspace_settings WHERE workspace_id = ?1",
              rusqlite::params![ws_str],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await
      .map_err(storage)?;

    match raw {
      Some(json) => Ok(serde_json::from_str(&json)?),
      None => Ok(WorkspaceRules::default()),
    }
  }
}

// ─── StepMemo impl ───────────────────────────────────────────────────────────

impl StepMemo for SqliteStore {
  async fn step_done(&self, event_id: Uuid, label: &str) -> Result<bool> {
    let event_id_str = encode_uuid(event_id);
    let label        = label.to_owned();

    self
      .conn
      .call(move |conn| {
        let found: bool = conn
          .query_row(
            "SELECT 1 FROM executor_steps WHERE event_id = ?1 AND label = ?2",
            rusqlite::params![event_id_str, label],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        Ok(found)
      })
      .await
      .map_err(storage)
  }

  async fn record_step(&self, event_id: Uuid, label: &str) -> Result<()> {
    let event_id_str = encode_uuid(event_id);
    let label        = label.to_owned();
    let at_str       = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        // A concurrent redelivery may have raced us here; the record is
        // the same either way.
        conn.execute(
          "INSERT OR IGNORE INTO executor_steps (event_id, label, completed_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![event_id_str, label, at_str],
        )?;
        Ok(())
      })
      .await
      .map_err(storage)
  }
}
