//! The global validator — the consumer of every `requested` event.
//!
//! An authorized intent is re-emitted as its `validated` twin under the
//! original correlation id and flows on to the family executor. An actor
//! who is a member but under-ranked gets a pending [`Proposal`] instead of
//! a rejection; an admin releases or rejects it later through the command
//! port. A non-member is a terminal failure; intents like that should
//! never have passed the API gate.
//!
//! [`Proposal`]: silo_core::projection::ProposalRecord

use uuid::Uuid;

use silo_core::{
  Error, Result,
  event::{Event, EventName, Phase},
  log::{EventLog, StepMemo},
  policy::RuleSource,
  projection::{NewProposal, ProposalRepo},
  role::{MembershipStore, WorkspaceRole, require_workspace_role},
};

use crate::{
  executor::StepContext,
  gateway::{CommandGateway, ValidatedRelease},
  queue::QueueHandle,
};

/// Minimum role for a standard-path intent to be released without review.
const RELEASE_ROLE: WorkspaceRole = WorkspaceRole::Editor;

#[derive(Clone)]
pub struct GlobalValidator<S> {
  store:   S,
  gateway: CommandGateway<S, QueueHandle>,
}

impl<S> GlobalValidator<S>
where
  S: EventLog + RuleSource + MembershipStore + ProposalRepo + StepMemo + Clone + Send + Sync,
{
  pub fn new(store: S, gateway: CommandGateway<S, QueueHandle>) -> Self {
    Self { store, gateway }
  }

  /// Process one `requested` event: authorize, then either release the
  /// `validated` twin or file a pending proposal. Both sides run inside
  /// memoized steps so redelivery never releases or files twice.
  pub async fn process(&self, name: &EventName, event: &Event) -> Result<()> {
    debug_assert_eq!(name.phase, Phase::Requested);
    let steps = StepContext::new(&self.store, event.event_id);

    let workspace_id = workspace_of(event)?;
    let authorized = match workspace_id {
      // Personal resource: there is no workspace role to check. The
      // repository's tenant-scoped WHERE clause is the enforcement.
      None => true,
      Some(ws) => {
        match require_workspace_role(&self.store, ws, event.user_id, RELEASE_ROLE).await {
          Ok(_) => true,
          Err(Error::Forbidden(_)) => false,
          // NotFound (non-member) and transient failures propagate: the
          // queue retries the transient ones and dead-letters the rest.
          Err(e) => return Err(e),
        }
      }
    };

    if authorized {
      steps
        .run("release-validated", async {
          self
            .gateway
            .emit_validated(ValidatedRelease {
              family:         name.family,
              action:         name.action,
              subject_id:     event.subject_id,
              subject_type:   event.subject_type.clone(),
              data:           event.data.clone(),
              user_id:        event.user_id,
              correlation_id: event.correlation_id,
              reason:         Some(format!("released: actor holds {RELEASE_ROLE} or higher")),
            })
            .await
            .map(|_| ())
        })
        .await?;
    } else {
      let ws = workspace_id.expect("under-ranked actors imply a workspace");
      steps
        .run("file-proposal", async {
          let proposal = self
            .store
            .file_proposal(NewProposal {
              workspace_id:   ws,
              target_family:  name.family,
              target_id:      event.subject_id,
              operation:      name.action,
              payload:        event.data.clone(),
              correlation_id: event.correlation_id,
              proposed_by:    event.user_id,
            })
            .await?;
          tracing::info!(
            proposal_id = %proposal.proposal_id,
            event_id = %event.event_id,
            name = %name,
            "intent held for review"
          );
          Ok(())
        })
        .await?;
    }

    Ok(())
  }
}

/// The workspace an intent concerns, read from its payload. `null` and a
/// missing key both mean "personal resource".
fn workspace_of(event: &Event) -> Result<Option<Uuid>> {
  match event.data.get("workspace_id") {
    None | Some(serde_json::Value::Null) => Ok(None),
    Some(value) => serde_json::from_value(value.clone())
      .map(Some)
      .map_err(|e| Error::Validation(format!("workspace_id in event payload: {e}"))),
  }
}
