//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Structured fields (event
//! metadata, payloads, workspace rules) are stored as compact JSON. UUIDs
//! are stored as hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use silo_core::{
  Error, Result,
  event::{Event, EventMetadata, EventName, EventSource},
  projection::{ApiKeyRecord, EntityRecord, ProjectRecord, ProposalRecord, ProposalStatus},
  role::Membership,
};
use uuid::Uuid;

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| Error::Validation(format!("stored uuid: {e}")))
}

pub fn decode_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>> {
  s.map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Validation(format!("stored timestamp: {e}")))
}

pub fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── JSON ────────────────────────────────────────────────────────────────────

pub fn decode_json(s: &str) -> Result<serde_json::Value> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `events` row.
pub struct RawEvent {
  pub event_id:       String,
  pub name:           String,
  pub subject_id:     String,
  pub subject_type:   String,
  pub data:           String,
  pub user_id:        String,
  pub source:         String,
  pub recorded_at:    String,
  pub correlation_id: Option<String>,
  pub metadata:       String,
}

impl RawEvent {
  pub fn into_event(self) -> Result<Event> {
    let metadata: EventMetadata = serde_json::from_str(&self.metadata)?;
    Ok(Event {
      event_id:       decode_uuid(&self.event_id)?,
      name:           EventName::parse(&self.name)?,
      subject_id:     decode_uuid(&self.subject_id)?,
      subject_type:   self.subject_type,
      data:           decode_json(&self.data)?,
      user_id:        decode_uuid(&self.user_id)?,
      source:         self.source.parse::<EventSource>()?,
      recorded_at:    decode_dt(&self.recorded_at)?,
      correlation_id: decode_opt_uuid(self.correlation_id.as_deref())?,
      metadata,
    })
  }
}

/// Raw strings read directly from an `entities` row.
pub struct RawEntity {
  pub entity_id:    String,
  pub workspace_id: Option<String>,
  pub user_id:      String,
  pub title:        String,
  pub body:         String,
  pub created_at:   String,
  pub updated_at:   String,
  pub deleted_at:   Option<String>,
}

impl RawEntity {
  pub fn into_record(self) -> Result<EntityRecord> {
    Ok(EntityRecord {
      entity_id:    decode_uuid(&self.entity_id)?,
      workspace_id: decode_opt_uuid(self.workspace_id.as_deref())?,
      user_id:      decode_uuid(&self.user_id)?,
      title:        self.title,
      body:         decode_json(&self.body)?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
      deleted_at:   decode_opt_dt(self.deleted_at.as_deref())?,
    })
  }
}

/// Raw strings read directly from a `projects` row.
pub struct RawProject {
  pub project_id:   String,
  pub workspace_id: String,
  pub user_id:      String,
  pub name:         String,
  pub description:  Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawProject {
  pub fn into_record(self) -> Result<ProjectRecord> {
    Ok(ProjectRecord {
      project_id:   decode_uuid(&self.project_id)?,
      workspace_id: decode_uuid(&self.workspace_id)?,
      user_id:      decode_uuid(&self.user_id)?,
      name:         self.name,
      description:  self.description,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `workspace_members` row.
pub struct RawMember {
  pub workspace_id: String,
  pub user_id:      String,
  pub role:         String,
  pub added_by:     Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawMember {
  pub fn into_membership(self) -> Result<Membership> {
    Ok(Membership {
      workspace_id: decode_uuid(&self.workspace_id)?,
      user_id:      decode_uuid(&self.user_id)?,
      role:         self.role.parse()?,
      added_by:     decode_opt_uuid(self.added_by.as_deref())?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from an `api_keys` row.
pub struct RawApiKey {
  pub api_key_id:   String,
  pub user_id:      String,
  pub workspace_id: Option<String>,
  pub name:         String,
  pub prefix:       String,
  pub digest:       String,
  pub created_at:   String,
  pub revoked_at:   Option<String>,
}

impl RawApiKey {
  pub fn into_record(self) -> Result<ApiKeyRecord> {
    Ok(ApiKeyRecord {
      api_key_id:   decode_uuid(&self.api_key_id)?,
      user_id:      decode_uuid(&self.user_id)?,
      workspace_id: decode_opt_uuid(self.workspace_id.as_deref())?,
      name:         self.name,
      prefix:       self.prefix,
      digest:       self.digest,
      created_at:   decode_dt(&self.created_at)?,
      revoked_at:   decode_opt_dt(self.revoked_at.as_deref())?,
    })
  }
}

/// Raw strings read directly from a `proposals` row.
pub struct RawProposal {
  pub proposal_id:    String,
  pub workspace_id:   String,
  pub target_family:  String,
  pub target_id:      String,
  pub operation:      String,
  pub payload:        String,
  pub correlation_id: Option<String>,
  pub status:         String,
  pub proposed_by:    String,
  pub reviewed_by:    Option<String>,
  pub created_at:     String,
  pub reviewed_at:    Option<String>,
}

impl RawProposal {
  pub fn into_record(self) -> Result<ProposalRecord> {
    let status = match self.status.as_str() {
      "pending" => ProposalStatus::Pending,
      "validated" => ProposalStatus::Validated,
      "rejected" => ProposalStatus::Rejected,
      other => {
        return Err(Error::Validation(format!("unknown proposal status: {other:?}")));
      }
    };
    Ok(ProposalRecord {
      proposal_id:    decode_uuid(&self.proposal_id)?,
      workspace_id:   decode_uuid(&self.workspace_id)?,
      target_family:  self.target_family.parse()?,
      target_id:      decode_uuid(&self.target_id)?,
      operation:      self.operation.parse()?,
      payload:        decode_json(&self.payload)?,
      correlation_id: decode_opt_uuid(self.correlation_id.as_deref())?,
      status,
      proposed_by:    decode_uuid(&self.proposed_by)?,
      reviewed_by:    decode_opt_uuid(self.reviewed_by.as_deref())?,
      created_at:     decode_dt(&self.created_at)?,
      reviewed_at:    decode_opt_dt(self.reviewed_at.as_deref())?,
    })
  }
}
