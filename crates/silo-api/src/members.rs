//! Handlers for workspace membership endpoints.
//!
//! Membership changes always take the event flow (and, for non-admins, the
//! review path): the handlers emit `workspace_members.*` intents rather
//! than writing rows. The affected member is the event's subject.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use silo_core::{
  command::{CommandPort, RequestInput},
  projection::ReadStore,
  role::{Membership, MembershipStore, WorkspaceRole},
};
use uuid::Uuid;

use crate::{AppState, auth::{Actor, workspace_role}, error::ApiError};

/// `GET /workspaces/{id}/members`
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<Membership>>, ApiError>
where
  S: ReadStore + MembershipStore,
  C: Send + Sync,
{
  workspace_role(&*state.store, Some(workspace_id), actor.0).await?;
  Ok(Json(state.store.members(workspace_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddBody {
  pub user_id: Uuid,
  pub role:    WorkspaceRole,
}

/// `POST /workspaces/{id}/members` — emits `workspace_members.add.requested`.
pub async fn add<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(workspace_id): Path<Uuid>,
  Json(body): Json<AddBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReadStore + MembershipStore,
  C: CommandPort,
{
  let role = workspace_role(&*state.store, Some(workspace_id), actor.0).await?;
  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "workspace_members.add.requested".to_string(),
      subject_id:   body.user_id,
      subject_type: None,
      data: json!({
        "workspace_id": workspace_id,
        "user_id": body.user_id,
        "role": body.role,
      }),
      user_id:      actor.0,
      workspace_id: Some(workspace_id),
      project_id:   None,
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct RoleBody {
  pub role: WorkspaceRole,
}

/// `PATCH /workspaces/{id}/members/{user_id}` — emits
/// `workspace_members.update_role.requested`.
pub async fn update_role<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path((workspace_id, user_id)): Path<(Uuid, Uuid)>,
  Json(body): Json<RoleBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReadStore + MembershipStore,
  C: CommandPort,
{
  let role = workspace_role(&*state.store, Some(workspace_id), actor.0).await?;
  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "workspace_members.update_role.requested".to_string(),
      subject_id:   user_id,
      subject_type: None,
      data: json!({
        "workspace_id": workspace_id,
        "user_id": user_id,
        "role": body.role,
      }),
      user_id:      actor.0,
      workspace_id: Some(workspace_id),
      project_id:   None,
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// `DELETE /workspaces/{id}/members/{user_id}` — emits
/// `workspace_members.remove.requested`.
pub async fn remove<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path((workspace_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReadStore + MembershipStore,
  C: CommandPort,
{
  let role = workspace_role(&*state.store, Some(workspace_id), actor.0).await?;
  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "workspace_members.remove.requested".to_string(),
      subject_id:   user_id,
      subject_type: None,
      data:         json!({ "workspace_id": workspace_id, "user_id": user_id }),
      user_id:      actor.0,
      workspace_id: Some(workspace_id),
      project_id:   None,
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}
