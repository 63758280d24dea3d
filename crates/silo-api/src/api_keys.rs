//! Handlers for `/api-keys` endpoints.
//!
//! Key issuance is deliberately synchronous: the plaintext secret can only
//! be returned once, which a 202-and-poll flow cannot do. The repository
//! still appends `api_keys.*.completed` audit events for every mutation.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use silo_core::projection::{ApiKeyRecord, ApiKeyRepo, NewApiKey, ReadStore};
use uuid::Uuid;

use crate::{AppState, auth::Actor, error::ApiError};

/// `GET /api-keys` lists the actor's keys: digests only, never secrets.
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
) -> Result<Json<Vec<ApiKeyRecord>>, ApiError>
where
  S: ReadStore,
  C: Send + Sync,
{
  Ok(Json(state.store.api_keys_for_user(actor.0).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name:         String,
  #[serde(default)]
  pub workspace_id: Option<Uuid>,
}

/// `POST /api-keys` — 201 with the one-time plaintext secret.
pub async fn create<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ApiKeyRepo,
  C: Send + Sync,
{
  let issued = state
    .store
    .issue_api_key(NewApiKey { name: body.name, workspace_id: body.workspace_id }, actor.0)
    .await?;
  Ok((StatusCode::CREATED, Json(issued)))
}

/// `DELETE /api-keys/{id}`. 404 for anyone but the owner.
pub async fn revoke<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ApiKeyRepo,
  C: Send + Sync,
{
  state.store.revoke_api_key(id, actor.0).await?;
  Ok(StatusCode::NO_CONTENT)
}
