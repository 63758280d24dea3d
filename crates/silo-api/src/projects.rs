//! Handlers for `/projects` endpoints. Projects are always
//! workspace-scoped; every route goes through the membership gate.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use silo_core::{
  command::{CommandPort, RequestInput},
  projection::{ProjectRecord, ReadStore},
  role::MembershipStore,
};
use uuid::Uuid;

use crate::{AppState, auth::{Actor, workspace_role}, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub workspace_id: Uuid,
}

/// `GET /projects?workspace_id=<uuid>`
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ProjectRecord>>, ApiError>
where
  S: ReadStore + MembershipStore,
  C: Send + Sync,
{
  workspace_role(&*state.store, Some(params.workspace_id), actor.0).await?;
  Ok(Json(state.store.projects_in_workspace(params.workspace_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub workspace_id: Uuid,
  pub name:         String,
  #[serde(default)]
  pub description:  Option<String>,
}

/// `POST /projects` — emits `projects.create.requested`.
pub async fn create<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReadStore + MembershipStore,
  C: CommandPort,
{
  let role = workspace_role(&*state.store, Some(body.workspace_id), actor.0).await?;
  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "projects.create.requested".to_string(),
      subject_id:   Uuid::new_v4(),
      subject_type: None,
      data: json!({
        "workspace_id": body.workspace_id,
        "name": body.name,
        "description": body.description,
      }),
      user_id:      actor.0,
      workspace_id: Some(body.workspace_id),
      project_id:   None,
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// `GET /projects/{id}`
pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(id): Path<Uuid>,
) -> Result<Json<ProjectRecord>, ApiError>
where
  S: ReadStore + MembershipStore,
  C: Send + Sync,
{
  let record = state
    .store
    .project(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("project {id} not found")))?;
  workspace_role(&*state.store, Some(record.workspace_id), actor.0).await?;
  Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
  pub name:        Option<String>,
  pub description: Option<String>,
}

/// `PATCH /projects/{id}` — emits `projects.update.requested`.
pub async fn update<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(id): Path<Uuid>,
  Json(body): Json<UpdateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReadStore + MembershipStore,
  C: CommandPort,
{
  let record = state
    .store
    .project(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("project {id} not found")))?;
  let role = workspace_role(&*state.store, Some(record.workspace_id), actor.0).await?;

  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "projects.update.requested".to_string(),
      subject_id:   id,
      subject_type: None,
      data: json!({
        "name": body.name,
        "description": body.description,
        "workspace_id": record.workspace_id,
      }),
      user_id:      actor.0,
      workspace_id: Some(record.workspace_id),
      project_id:   Some(id),
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// `DELETE /projects/{id}` — emits `projects.delete.requested`.
pub async fn delete<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReadStore + MembershipStore,
  C: CommandPort,
{
  let record = state
    .store
    .project(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("project {id} not found")))?;
  let role = workspace_role(&*state.store, Some(record.workspace_id), actor.0).await?;

  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "projects.delete.requested".to_string(),
      subject_id:   id,
      subject_type: None,
      data:         json!({ "workspace_id": record.workspace_id }),
      user_id:      actor.0,
      workspace_id: Some(record.workspace_id),
      project_id:   Some(id),
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}
