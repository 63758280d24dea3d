//! Handlers for `/entities` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/entities` | Optional `?workspace_id=`; defaults to the actor's own |
//! | `POST`   | `/entities` | 202: the mutation is asynchronous |
//! | `GET`    | `/entities/{id}` | 404 if absent or out of scope |
//! | `PATCH`  | `/entities/{id}` | 202 |
//! | `DELETE` | `/entities/{id}` | 202 |

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
  projection::{EntityRecord, ReadStore},
  role::MembershipStore,
};
use uuid::Uuid;

use crate::{
  AppState,
  auth::{Actor, check_entity_access, workspace_role},
  error::ApiError,
};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub workspace_id: Option<Uuid>,
}

/// `GET /entities[?workspace_id=<uuid>]`
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<EntityRecord>>, ApiError>
where
  S: ReadStore + MembershipStore,
  C: Send + Sync,
{
  let records = match params.workspace_id {
    Some(ws) => {
      workspace_role(&*state.store, Some(ws), actor.0).await?;
      state.store.entities_in_workspace(ws).await?
    }
    None => state.store.entities_for_user(actor.0).await?,
  };
  Ok(Json(records))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub workspace_id: Option<Uuid>,
  pub title:        String,
  #[serde(default)]
  pub body:         Option<serde_json::Value>,
}

/// `POST /entities` — emits `entities.create.requested`.
pub async fn create<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ReadStore + MembershipStore,
  C: CommandPort,
{
  let role = workspace_role(&*state.store, body.workspace_id, actor.0).await?;
  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "entities.create.requested".to_string(),
      subject_id:   Uuid::new_v4(),
      subject_type: None,
      data: json!({
        "title": body.title,
        "body": body.body,
        "workspace_id": body.workspace_id,
      }),
      user_id:      actor.0,
      workspace_id: body.workspace_id,
      project_id:   None,
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /entities/{id}`
pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(id): Path<Uuid>,
) -> Result<Json<EntityRecord>, ApiError>
where
  S: ReadStore + MembershipStore,
  C: Send + Sync,
{
  let record = state
    .store
    .entity(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("entity {id} not found")))?;
  check_entity_access(&*state.store, &record, actor.0).await?;
  Ok(Json(record))
}

// ─── Update ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
  pub title: Option<String>,
  pub body:  Option<serde_json::Value>,
}

/// `PATCH /entities/{id}` — emits `entities.update.requested`.
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
    .entity(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("entity {id} not found")))?;
  let role = check_entity_access(&*state.store, &record, actor.0).await?;

  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "entities.update.requested".to_string(),
      subject_id:   id,
      subject_type: None,
      data: json!({
        "title": body.title,
        "body": body.body,
        "workspace_id": record.workspace_id,
      }),
      user_id:      actor.0,
      workspace_id: record.workspace_id,
      project_id:   None,
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /entities/{id}` — emits `entities.delete.requested`.
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
    .entity(id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("entity {id} not found")))?;
  let role = check_entity_access(&*state.store, &record, actor.0).await?;

  let receipt = state
    .commands
    .emit_request_event(RequestInput {
      name:         "entities.delete.requested".to_string(),
      subject_id:   id,
      subject_type: None,
      data:         json!({ "workspace_id": record.workspace_id }),
      user_id:      actor.0,
      workspace_id: record.workspace_id,
      project_id:   None,
      user_role:    role,
    })
    .await?;
  Ok((StatusCode::ACCEPTED, Json(receipt)))
}
