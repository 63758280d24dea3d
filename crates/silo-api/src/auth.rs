//! Actor extraction and access helpers.
//!
//! Identity itself is an external collaborator: a session validator in
//! front of this service authenticates the request and forwards the user id
//! in the `x-user-id` header. The core trusts that header as given and
//! never re-derives identity.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use silo_core::{
  projection::EntityRecord,
  role::{MembershipStore, WorkspaceRole, require_workspace_role},
};

use crate::{AppState, error::ApiError};

pub const USER_HEADER: &str = "x-user-id";

/// The authenticated actor. Its absence is rejected with 401 before any
/// log or dispatch activity can occur.
#[derive(Debug, Clone, Copy)]
pub struct Actor(pub Uuid);

impl<S, C> FromRequestParts<AppState<S, C>> for Actor
where
  S: Send + Sync,
  C: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    _state: &AppState<S, C>,
  ) -> Result<Self, Self::Rejection> {
    let user_id = parts
      .headers
      .get(USER_HEADER)
      .and_then(|v| v.to_str().ok())
      .and_then(|s| Uuid::parse_str(s).ok())
      .ok_or(ApiError::Unauthorized)?;
    Ok(Actor(user_id))
  }
}

/// Resolve the actor's role for an optional workspace scope. Inside a
/// workspace, viewer membership is the floor for submitting intents; a
/// non-member gets the same 404 a missing workspace would.
pub(crate) async fn workspace_role<M: MembershipStore>(
  store: &M,
  workspace_id: Option<Uuid>,
  user_id: Uuid,
) -> Result<Option<WorkspaceRole>, ApiError> {
  match workspace_id {
    None => Ok(None),
    Some(ws) => {
      let membership =
        require_workspace_role(store, ws, user_id, WorkspaceRole::Viewer).await?;
      Ok(Some(membership.role))
    }
  }
}

/// Access check for a single entity: workspace members may see
/// workspace-scoped rows; personal rows are visible to their owner only,
/// and anyone else gets an indistinguishable 404.
pub(crate) async fn check_entity_access<M: MembershipStore>(
  store: &M,
  record: &EntityRecord,
  user_id: Uuid,
) -> Result<Option<WorkspaceRole>, ApiError> {
  match record.workspace_id {
    Some(_) => workspace_role(store, record.workspace_id, user_id).await,
    None if record.user_id == user_id => Ok(None),
    None => Err(ApiError::NotFound(format!("entity {} not found", record.entity_id))),
  }
}
