//! Audit-log reads: the raw event trail behind a subject or a correlation
//! group. Admin-gated, since the trail names actors and spans the workspace.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use silo_core::{
  event::Event,
  log::EventLog,
  role::{MembershipStore, WorkspaceRole, require_workspace_role},
};
use uuid::Uuid;

use crate::{AppState, auth::Actor, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AuditParams {
  pub subject_id:     Option<Uuid>,
  pub correlation_id: Option<Uuid>,
}

/// `GET /workspaces/{id}/audit?subject_id=<uuid>` or `?correlation_id=<uuid>`
pub async fn trail<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(workspace_id): Path<Uuid>,
  Query(params): Query<AuditParams>,
) -> Result<Json<Vec<Event>>, ApiError>
where
  S: EventLog + MembershipStore,
  C: Send + Sync,
{
  require_workspace_role(&*state.store, workspace_id, actor.0, WorkspaceRole::Admin).await?;

  let events = match (params.subject_id, params.correlation_id) {
    (Some(subject), None) => state.store.events_for_subject(subject).await?,
    (None, Some(correlation)) => state.store.events_for_correlation(correlation).await?,
    _ => {
      return Err(ApiError::BadRequest(
        "exactly one of subject_id or correlation_id is required".to_string(),
      ));
    }
  };
  Ok(Json(events))
}
