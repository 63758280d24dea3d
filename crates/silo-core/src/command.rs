//! The command port: the write-side seam the HTTP surface talks to.
//!
//! Every write intent enters the pod through [`CommandPort`]; the concrete
//! implementation (the command gateway in `silo-dispatch`) decides the
//! validation path, appends to the log, and hands the event to the queue.

use serde::Serialize;
use uuid::Uuid;

use crate::{Result, projection::ProposalRecord, role::WorkspaceRole};

/// A write intent. `name` carries the `requested` phase; the gateway may
/// rewrite it to `validated` on the fast path.
#[derive(Debug, Clone)]
pub struct RequestInput {
  pub name:         String,
  pub subject_id:   Uuid,
  /// Defaults to the family's singular form when `None`.
  pub subject_type: Option<String>,
  pub data:         serde_json::Value,
  pub user_id:      Uuid,
  pub workspace_id: Option<Uuid>,
  pub project_id:   Option<Uuid>,
  /// The actor's role in `workspace_id`, resolved by the caller.
  pub user_role:    Option<WorkspaceRole>,
}

/// What the caller gets back for an accepted intent. The mutation itself
/// happens asynchronously; `correlation_id` ties the eventual `completed`
/// events back to this call.
#[derive(Debug, Clone, Serialize)]
pub struct EmitReceipt {
  pub event_id:       Uuid,
  pub correlation_id: Uuid,
  /// The name the event was appended and dispatched under.
  pub name:           String,
  pub fast_path:      bool,
}

pub trait CommandPort: Send + Sync {
  /// Accept a write intent: exactly one log append and exactly one queue
  /// dispatch, in that order, or an error and neither.
  fn emit_request_event(
    &self,
    input: RequestInput,
  ) -> impl Future<Output = Result<EmitReceipt>> + Send + '_;

  /// Release a pending proposal: the reviewer must hold `admin` or higher
  /// in the proposal's workspace; the held change is emitted as a
  /// `validated` event under the original correlation id.
  fn approve_proposal(
    &self,
    proposal_id: Uuid,
    reviewer: Uuid,
  ) -> impl Future<Output = Result<ProposalRecord>> + Send + '_;

  /// Reject a pending proposal. No event is emitted.
  fn reject_proposal(
    &self,
    proposal_id: Uuid,
    reviewer: Uuid,
  ) -> impl Future<Output = Result<ProposalRecord>> + Send + '_;
}
