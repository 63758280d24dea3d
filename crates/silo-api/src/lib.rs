//! JSON REST API for the Silo data pod.
//!
//! Exposes an axum [`Router`] generic over the read-store traits and the
//! [`CommandPort`]. Writes return `202 Accepted` with an [`EmitReceipt`] —
//! the mutation itself happens asynchronously behind the event flow.
//! Transport, TLS, and session validation are the caller's responsibility.
//!
//! [`CommandPort`]: silo_core::command::CommandPort
//! [`EmitReceipt`]: silo_core::command::EmitReceipt

pub mod api_keys;
pub mod audit;
pub mod auth;
pub mod entities;
pub mod error;
pub mod members;
pub mod projects;
pub mod proposals;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, patch, post},
};
use silo_core::{
  command::CommandPort,
  log::EventLog,
  projection::{ApiKeyRepo, ReadStore},
  role::MembershipStore,
};

pub use auth::Actor;
pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct AppState<S, C> {
  pub store:    Arc<S>,
  pub commands: Arc<C>,
}

impl<S, C> Clone for AppState<S, C> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), commands: self.commands.clone() }
  }
}

/// Build a fully-materialised API router over `store` and `commands`.
///
/// The returned `Router<()>` can be nested into any parent router
/// regardless of its own state type.
pub fn api_router<S, C>(store: Arc<S>, commands: Arc<C>) -> Router<()>
where
  S: ReadStore + MembershipStore + ApiKeyRepo + EventLog + Send + Sync + 'static,
  C: CommandPort + Send + Sync + 'static,
{
  Router::new()
    // Entities
    .route("/entities", get(entities::list::<S, C>).post(entities::create::<S, C>))
    .route(
      "/entities/{id}",
      get(entities::get_one::<S, C>)
        .patch(entities::update::<S, C>)
        .delete(entities::delete::<S, C>),
    )
    // Projects
    .route("/projects", get(projects::list::<S, C>).post(projects::create::<S, C>))
    .route(
      "/projects/{id}",
      get(projects::get_one::<S, C>)
        .patch(projects::update::<S, C>)
        .delete(projects::delete::<S, C>),
    )
    // Workspace members
    .route(
      "/workspaces/{id}/members",
      get(members::list::<S, C>).post(members::add::<S, C>),
    )
    .route(
      "/workspaces/{id}/members/{user_id}",
      patch(members::update_role::<S, C>).delete(members::remove::<S, C>),
    )
    // Audit trail
    .route("/workspaces/{id}/audit", get(audit::trail::<S, C>))
    // Proposals
    .route("/proposals", get(proposals::list::<S, C>))
    .route("/proposals/{id}/approve", post(proposals::approve::<S, C>))
    .route("/proposals/{id}/reject", post(proposals::reject::<S, C>))
    // API keys
    .route("/api-keys", get(api_keys::list::<S, C>).post(api_keys::create::<S, C>))
    .route("/api-keys/{id}", delete(api_keys::revoke::<S, C>))
    .with_state(AppState { store, commands })
}

// ─── Integration tests ────────────────────────────────────────────────────────
