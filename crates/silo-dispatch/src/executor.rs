//! Family executors — the consumers of `validated` events.
//!
//! An executor performs the actual mutation for its family by calling the
//! projection repository, wrapped in a durably-memoized step so that
//! redelivery of the same event never double-applies. Delivery order across
//! subjects is not assumed: creates tolerate "already exists", deletes
//! tolerate "already deleted", and updates are last-write-wins by explicit
//! id.
//!
//! Routing matches on the typed `(family, action)` pair of the decoded
//! name. A pair with no branch is a permanent error surfaced to the dead
//! letter list, never a silent no-op.

use serde::Deserialize;
use uuid::Uuid;

use silo_core::{
  Error, Result,
  event::{Action, Event, EventName, Family},
  log::StepMemo,
  projection::{
    EntityPatch, EntityRepo, NewEntity, NewMember, NewProject, ProjectPatch,
    ProjectRepo, MemberRepo,
  },
  role::WorkspaceRole,
};

// ─── Step context ────────────────────────────────────────────────────────────

/// A durably-memoized unit of work, keyed by `(event_id, label)`.
///
/// If the step already ran to completion for this event, `run` skips the
/// work and returns `None`; otherwise it runs the future and records
/// completion afterwards. A crash between the work and the record leaves
/// the step un-memoized, which is why the mutations themselves must also
/// tolerate re-application.
pub struct StepContext<'a, M: StepMemo> {
  memo:     &'a M,
  event_id: Uuid,
}

impl<'a, M: StepMemo> StepContext<'a, M> {
  pub fn new(memo: &'a M, event_id: Uuid) -> Self {
    Self { memo, event_id }
  }

  pub async fn run<T, F>(&self, label: &str, work: F) -> Result<Option<T>>
  where
    F: Future<Output = Result<T>>,
  {
    if self.memo.step_done(self.event_id, label).await? {
      tracing::debug!(event_id = %self.event_id, label, "step already recorded, skipping");
      return Ok(None);
    }
    let out = work.await?;
    self.memo.record_step(self.event_id, label).await?;
    Ok(Some(out))
  }
}

// ─── Payload shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EntityCreateData {
  title:        String,
  #[serde(default)]
  body:         Option<serde_json::Value>,
  #[serde(default)]
  workspace_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ProjectCreateData {
  workspace_id: Uuid,
  name:         String,
  #[serde(default)]
  description:  Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberAddData {
  workspace_id: Uuid,
  role:         WorkspaceRole,
}

#[derive(Debug, Deserialize)]
struct MemberRoleData {
  workspace_id: Uuid,
  role:         WorkspaceRole,
}

#[derive(Debug, Deserialize)]
struct MemberRemoveData {
  workspace_id: Uuid,
}

fn decode<T: serde::de::DeserializeOwned>(name: &EventName, event: &Event) -> Result<T> {
  serde_json::from_value(event.data.clone())
    .map_err(|e| Error::Validation(format!("{name} payload: {e}")))
}

// ─── Executors ───────────────────────────────────────────────────────────────

/// The executor suite for every subject family, dispatching on the typed
/// action. One instance serves all families; the queue applies per-family
/// concurrency limits around it.
#[derive(Clone)]
pub struct Executors<S> {
  store: S,
}

impl<S> Executors<S>
where
  S: EntityRepo + ProjectRepo + MemberRepo + StepMemo + Send + Sync,
{
  pub fn new(store: S) -> Self {
    Self { store }
  }

  /// Process one `validated` event. Idempotent: replaying the same event
  /// reaches the same terminal state.
  pub async fn execute(&self, name: &EventName, event: &Event) -> Result<()> {
    let steps = StepContext::new(&self.store, event.event_id);

    match (name.family, name.action) {
      // ── Entities ──────────────────────────────────────────────────────
      (Family::Entities, Action::Create) => {
        let data: EntityCreateData = decode(name, event)?;
        steps
          .run("create-entity", async {
            let input = NewEntity {
              entity_id:    event.subject_id,
              workspace_id: data.workspace_id,
              title:        data.title,
              body:         data.body.unwrap_or_else(|| serde_json::json!({})),
            };
            match self.store.create_entity(input, event.user_id).await {
              Ok(_) => Ok(()),
              // Redelivered create: the row is already there.
              Err(Error::AlreadyExists(_)) => Ok(()),
              Err(e) => Err(e),
            }
          })
          .await?;
      }
      (Family::Entities, Action::Update) => {
        let patch: EntityPatch = decode(name, event)?;
        steps
          .run("update-entity", async {
            self
              .store
              .update_entity(event.subject_id, patch, event.user_id)
              .await
              .map(|_| ())
          })
          .await?;
      }
      (Family::Entities, Action::Delete) => {
        steps
          .run("delete-entity", async {
            match self.store.delete_entity(event.subject_id, event.user_id).await {
              Ok(()) => Ok(()),
              // Redelivered delete: already gone counts as success.
              Err(Error::NotFound(_)) => Ok(()),
              Err(e) => Err(e),
            }
          })
          .await?;
      }

      // ── Projects ──────────────────────────────────────────────────────
      (Family::Projects, Action::Create) => {
        let data: ProjectCreateData = decode(name, event)?;
        steps
          .run("create-project", async {
            let input = NewProject {
              project_id:   event.subject_id,
              workspace_id: data.workspace_id,
              name:         data.name,
              description:  data.description,
            };
            match self.store.create_project(input, event.user_id).await {
              Ok(_) => Ok(()),
              Err(Error::AlreadyExists(_)) => Ok(()),
              Err(e) => Err(e),
            }
          })
          .await?;
      }
      (Family::Projects, Action::Update) => {
        let patch: ProjectPatch = decode(name, event)?;
        steps
          .run("update-project", async {
            self
              .store
              .update_project(event.subject_id, patch, event.user_id)
              .await
              .map(|_| ())
          })
          .await?;
      }
      (Family::Projects, Action::Delete) => {
        steps
          .run("delete-project", async {
            match self.store.delete_project(event.subject_id, event.user_id).await {
              Ok(()) => Ok(()),
              Err(Error::NotFound(_)) => Ok(()),
              Err(e) => Err(e),
            }
          })
          .await?;
      }

      // ── Workspace members ─────────────────────────────────────────────
      // The member being changed is the event's subject; the acting user
      // is the envelope's actor.
      (Family::WorkspaceMembers, Action::Add) => {
        let data: MemberAddData = decode(name, event)?;
        steps
          .run("add-member", async {
            let member = NewMember { user_id: event.subject_id, role: data.role };
            match self.store.add_member(data.workspace_id, member, event.user_id).await {
              Ok(_) => Ok(()),
              Err(Error::AlreadyExists(_)) => Ok(()),
              Err(e) => Err(e),
            }
          })
          .await?;
      }
      (Family::WorkspaceMembers, Action::UpdateRole) => {
        let data: MemberRoleData = decode(name, event)?;
        steps
          .run("update-member-role", async {
            self
              .store
              .update_member_role(
                data.workspace_id,
                event.subject_id,
                data.role,
                event.user_id,
              )
              .await
              .map(|_| ())
          })
          .await?;
      }
      (Family::WorkspaceMembers, Action::Remove) => {
        let data: MemberRemoveData = decode(name, event)?;
        steps
          .run("remove-member", async {
            match self
              .store
              .remove_member(data.workspace_id, event.subject_id, event.user_id)
              .await
            {
              Ok(()) => Ok(()),
              Err(Error::NotFound(_)) => Ok(()),
              Err(e) => Err(e),
            }
          })
          .await?;
      }

      // API keys are issued synchronously and proposals are artifacts of
      // the flow itself; neither is event-executed.
      (family, action) => {
        return Err(Error::Validation(format!(
          "no executor branch for {family}.{action}"
        )));
      }
    }

    Ok(())
  }
}
