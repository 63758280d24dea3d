//! Handlers for `/proposals` endpoints: listing held changes and
//! releasing or rejecting them. The admin check lives behind the command
//! port, alongside the emission it gates.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use silo_core::{
  command::CommandPort,
  projection::{ProposalRecord, ProposalStatus, ReadStore},
  role::MembershipStore,
};
use uuid::Uuid;

use crate::{AppState, auth::{Actor, workspace_role}, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub workspace_id: Uuid,
  pub status:       Option<ProposalStatus>,
}

/// `GET /proposals?workspace_id=<uuid>[&status=pending]`
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ProposalRecord>>, ApiError>
where
  S: ReadStore + MembershipStore,
  C: Send + Sync,
{
  workspace_role(&*state.store, Some(params.workspace_id), actor.0).await?;
  Ok(Json(
    state
      .store
      .proposals(params.workspace_id, params.status)
      .await?,
  ))
}

/// `POST /proposals/{id}/approve`
pub async fn approve<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(id): Path<Uuid>,
) -> Result<Json<ProposalRecord>, ApiError>
where
  S: Send + Sync,
  C: CommandPort,
{
  Ok(Json(state.commands.approve_proposal(id, actor.0).await?))
}

/// `POST /proposals/{id}/reject`
pub async fn reject<S, C>(
  State(state): State<AppState<S, C>>,
  actor: Actor,
  Path(id): Path<Uuid>,
) -> Result<Json<ProposalRecord>, ApiError>
where
  S: Send + Sync,
  C: CommandPort,
{
  Ok(Json(state.commands.reject_proposal(id, actor.0).await?))
}
