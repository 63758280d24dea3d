//! Projection records and the per-family repository seams.
//!
//! Projections are the queryable read side of the pod — derived tables that
//! executors materialise from validated events. Each family gets a narrow
//! repository trait with explicit signatures returning domain types; there
//! is no shared untyped database handle.
//!
//! Every repository write is scoped by `(id, user_id)` at the query level.
//! Zero affected rows — wrong id or wrong tenant — surfaces as `NotFound`,
//! and the two cases are indistinguishable to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Result,
  event::{Action, Family},
  role::{Membership, WorkspaceRole},
};

// ─── Entities ────────────────────────────────────────────────────────────────

/// A row from the `entities` projection. Soft-deleted rows keep their
/// history but drop out of every scoped query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
  pub entity_id:    Uuid,
  pub workspace_id: Option<Uuid>,
  pub user_id:      Uuid,
  pub title:        String,
  pub body:         serde_json::Value,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  pub deleted_at:   Option<DateTime<Utc>>,
}

/// Input to [`EntityRepo::create`]. The id is the event's `subject_id`,
/// chosen when the intent was emitted, so redeliveries collide instead of
/// duplicating.
#[derive(Debug, Clone)]
pub struct NewEntity {
  pub entity_id:    Uuid,
  pub workspace_id: Option<Uuid>,
  pub title:        String,
  pub body:         serde_json::Value,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityPatch {
  pub title: Option<String>,
  pub body:  Option<serde_json::Value>,
}

pub trait EntityRepo: Send + Sync {
  fn create_entity(
    &self,
    input: NewEntity,
    user_id: Uuid,
  ) -> impl Future<Output = Result<EntityRecord>> + Send + '_;

  fn update_entity(
    &self,
    id: Uuid,
    patch: EntityPatch,
    user_id: Uuid,
  ) -> impl Future<Output = Result<EntityRecord>> + Send + '_;

  /// Soft delete; the row stays but leaves all scoped queries.
  fn delete_entity(
    &self,
    id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<()>> + Send + '_;
}

// ─── Projects ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
  pub project_id:   Uuid,
  pub workspace_id: Uuid,
  pub user_id:      Uuid,
  pub name:         String,
  pub description:  Option<String>,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
  pub project_id:   Uuid,
  pub workspace_id: Uuid,
  pub name:         String,
  pub description:  Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
  pub name:        Option<String>,
  pub description: Option<String>,
}

pub trait ProjectRepo: Send + Sync {
  fn create_project(
    &self,
    input: NewProject,
    user_id: Uuid,
  ) -> impl Future<Output = Result<ProjectRecord>> + Send + '_;

  fn update_project(
    &self,
    id: Uuid,
    patch: ProjectPatch,
    user_id: Uuid,
  ) -> impl Future<Output = Result<ProjectRecord>> + Send + '_;

  fn delete_project(
    &self,
    id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<()>> + Send + '_;
}

// ─── Workspace members ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewMember {
  pub user_id: Uuid,
  pub role:    WorkspaceRole,
}

/// Membership mutations are scoped by workspace rather than owner; the role
/// gate in front of the executor is what keeps them tenant-safe. `acting`
/// is the user recorded on the audit event.
pub trait MemberRepo: Send + Sync {
  fn add_member(
    &self,
    workspace_id: Uuid,
    member: NewMember,
    acting: Uuid,
  ) -> impl Future<Output = Result<Membership>> + Send + '_;

  fn update_member_role(
    &self,
    workspace_id: Uuid,
    user_id: Uuid,
    role: WorkspaceRole,
    acting: Uuid,
  ) -> impl Future<Output = Result<Membership>> + Send + '_;

  fn remove_member(
    &self,
    workspace_id: Uuid,
    user_id: Uuid,
    acting: Uuid,
  ) -> impl Future<Output = Result<()>> + Send + '_;
}

// ─── API keys ────────────────────────────────────────────────────────────────

/// A stored API key. Only the SHA-256 digest of the secret is kept; the
/// plaintext is returned exactly once at issue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
  pub api_key_id:   Uuid,
  pub user_id:      Uuid,
  pub workspace_id: Option<Uuid>,
  pub name:         String,
  /// First characters of the secret, for display ("which key is this?").
  pub prefix:       String,
  pub digest:       String,
  pub created_at:   DateTime<Utc>,
  pub revoked_at:   Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
  pub name:         String,
  pub workspace_id: Option<Uuid>,
}

/// An issued key together with its one-time plaintext secret.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
  pub record: ApiKeyRecord,
  pub secret: String,
}

pub trait ApiKeyRepo: Send + Sync {
  fn issue_api_key(
    &self,
    input: NewApiKey,
    user_id: Uuid,
  ) -> impl Future<Output = Result<IssuedKey>> + Send + '_;

  fn revoke_api_key(
    &self,
    id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<()>> + Send + '_;
}

// ─── Proposals ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
  Pending,
  Validated,
  Rejected,
}

impl ProposalStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Validated => "validated",
      Self::Rejected => "rejected",
    }
  }
}

/// A pending change awaiting review. Proposals are themselves artifacts of
/// the `requested → validated` flow, so the repository never appends events
/// for them — double-logging is forbidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
  pub proposal_id:    Uuid,
  pub workspace_id:   Uuid,
  pub target_family:  Family,
  pub target_id:      Uuid,
  pub operation:      Action,
  /// The requested change payload, released verbatim on approval.
  pub payload:        serde_json::Value,
  /// Correlation key of the originating `requested` event.
  pub correlation_id: Option<Uuid>,
  pub status:         ProposalStatus,
  pub proposed_by:    Uuid,
  pub reviewed_by:    Option<Uuid>,
  pub created_at:     DateTime<Utc>,
  pub reviewed_at:    Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewProposal {
  pub workspace_id:   Uuid,
  pub target_family:  Family,
  pub target_id:      Uuid,
  pub operation:      Action,
  pub payload:        serde_json::Value,
  pub correlation_id: Option<Uuid>,
  pub proposed_by:    Uuid,
}

pub trait ProposalRepo: Send + Sync {
  fn file_proposal(
    &self,
    input: NewProposal,
  ) -> impl Future<Output = Result<ProposalRecord>> + Send + '_;

  fn proposal(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ProposalRecord>>> + Send + '_;

  /// Move a pending proposal to `validated` or `rejected`. Fails with
  /// `NotFound` if the row is absent and `Validation` if it was already
  /// resolved.
  fn resolve_proposal(
    &self,
    id: Uuid,
    status: ProposalStatus,
    reviewer: Uuid,
  ) -> impl Future<Output = Result<ProposalRecord>> + Send + '_;
}

// ─── Read side ───────────────────────────────────────────────────────────────

/// Tenant-scoped queries over the projection tables, consumed by the HTTP
/// surface. Soft-deleted rows are never returned.
pub trait ReadStore: Send + Sync {
  fn entity(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<EntityRecord>>> + Send + '_;

  fn entities_in_workspace(
    &self,
    workspace_id: Uuid,
  ) -> impl Future<Output = Result<Vec<EntityRecord>>> + Send + '_;

  fn entities_for_user(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<EntityRecord>>> + Send + '_;

  fn project(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ProjectRecord>>> + Send + '_;

  fn projects_in_workspace(
    &self,
    workspace_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ProjectRecord>>> + Send + '_;

  fn members(
    &self,
    workspace_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Membership>>> + Send + '_;

  fn proposals(
    &self,
    workspace_id: Uuid,
    status: Option<ProposalStatus>,
  ) -> impl Future<Output = Result<Vec<ProposalRecord>>> + Send + '_;

  fn api_keys_for_user(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ApiKeyRecord>>> + Send + '_;
}
