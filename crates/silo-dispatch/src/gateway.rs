//! The command emission gateway — the single entry point for write intents.
//!
//! Every mutation enters here. The gateway consults the validation policy,
//! appends exactly one event to the log, and hands exactly one job to the
//! queue — in that order. The append-then-dispatch pair is not one
//! transaction: once the event is durably logged the operation is accepted,
//! and a dispatch failure is the queue layer's to retry. Durability over
//! atomicity.

use uuid::Uuid;

use silo_core::{
  Error, Result,
  command::{CommandPort, EmitReceipt, RequestInput},
  event::{
    Action, Event, EventMetadata, EventName, EventSource, Family, NewEvent, Phase,
  },
  log::{Dispatch, DispatchJob, EventLog},
  policy::{self, PolicyInput, WorkspaceRules},
  projection::{ProposalRecord, ProposalRepo, ProposalStatus},
  role::{MembershipStore, WorkspaceRole, require_workspace_role},
};

/// A pre-authorized change to release under the `validated` phase — used by
/// the global validator and by proposal approval.
#[derive(Debug, Clone)]
pub struct ValidatedRelease {
  pub family:         Family,
  pub action:         Action,
  pub subject_id:     Uuid,
  pub subject_type:   String,
  pub data:           serde_json::Value,
  pub user_id:        Uuid,
  pub correlation_id: Option<Uuid>,
  pub reason:         Option<String>,
}

/// The command gateway. Collaborators are injected at construction — the
/// log, the queue, the rules lookup, and the proposal store all arrive as
/// explicit parameters, never as process-global state.
#[derive(Clone)]
pub struct CommandGateway<S, D> {
  store:    S,
  dispatch: D,
}

impl<S, D> CommandGateway<S, D>
where
  S: EventLog + MembershipStore + ProposalRepo + policy::RuleSource,
  D: Dispatch,
{
  pub fn new(store: S, dispatch: D) -> Self {
    Self { store, dispatch }
  }

  /// Append `event` to the log, then hand it to the queue. The log write
  /// always comes first; if it fails, no dispatch is attempted.
  async fn append_then_dispatch(&self, event: Event) -> Result<()> {
    let job = DispatchJob::for_event(&event);
    self.store.append(event).await?;
    self.dispatch.send(job).await
  }

  /// Release a change under its `validated` name. Appends and dispatches
  /// like any other emission; the correlation id ties it back to the
  /// originating `requested` event.
  pub async fn emit_validated(&self, release: ValidatedRelease) -> Result<EmitReceipt> {
    let name = EventName::new(release.family, release.action, Phase::Validated)?;
    let correlation_id = release.correlation_id.unwrap_or_else(Uuid::new_v4);

    let event = Event::create(NewEvent {
      name:           name.to_string(),
      subject_id:     release.subject_id,
      subject_type:   release.subject_type,
      data:           release.data,
      user_id:        release.user_id,
      source:         EventSource::Api,
      correlation_id: Some(correlation_id),
      metadata:       EventMetadata {
        policy_reason: release.reason,
        ..EventMetadata::default()
      },
    })?;

    let receipt = EmitReceipt {
      event_id:       event.event_id,
      correlation_id,
      name:           name.to_string(),
      fast_path:      false,
    };
    self.append_then_dispatch(event).await?;
    Ok(receipt)
  }

  async fn load_proposal_for_review(
    &self,
    proposal_id: Uuid,
    reviewer: Uuid,
  ) -> Result<ProposalRecord> {
    let proposal = self
      .store
      .proposal(proposal_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("proposal {proposal_id} not found")))?;

    if proposal.status != ProposalStatus::Pending {
      return Err(Error::Validation(format!(
        "proposal {proposal_id} is already {}",
        proposal.status.as_str()
      )));
    }

    require_workspace_role(&self.store, proposal.workspace_id, reviewer, WorkspaceRole::Admin)
      .await?;
    Ok(proposal)
  }
}

impl<S, D> CommandPort for CommandGateway<S, D>
where
  S: EventLog + MembershipStore + ProposalRepo + policy::RuleSource,
  D: Dispatch,
{
  async fn emit_request_event(&self, input: RequestInput) -> Result<EmitReceipt> {
    let name = EventName::parse(&input.name)?;
    if name.phase != Phase::Requested {
      return Err(Error::Validation(format!(
        "intents must carry the requested phase, got {}",
        name.phase
      )));
    }

    // Fail-closed: a failing rules lookup aborts the whole emission.
    let rules = match input.workspace_id {
      Some(ws) => self.store.workspace_rules(ws).await?,
      None => WorkspaceRules::default(),
    };
    let decision = policy::evaluate(&rules, &PolicyInput {
      operation:    name.action,
      family:       name.family,
      workspace_id: input.workspace_id,
      project_id:   input.project_id,
      user_role:    input.user_role,
    });

    let (wire_name, metadata) = if decision.requires_validation {
      (name, EventMetadata {
        policy_reason: Some(decision.reason),
        policy_source: Some(decision.source),
        ..EventMetadata::default()
      })
    } else {
      (name.with_phase(Phase::Validated), EventMetadata {
        policy_reason: Some(decision.reason),
        policy_source: Some(decision.source),
        fast_path: true,
        ..EventMetadata::default()
      })
    };

    let correlation_id = Uuid::new_v4();
    let subject_type = input
      .subject_type
      .unwrap_or_else(|| name.family.singular().to_string());

    let event = Event::create(NewEvent {
      name:           wire_name.to_string(),
      subject_id:     input.subject_id,
      subject_type,
      data:           input.data,
      user_id:        input.user_id,
      source:         EventSource::Api,
      correlation_id: Some(correlation_id),
      metadata,
    })?;

    let receipt = EmitReceipt {
      event_id:       event.event_id,
      correlation_id,
      name:           wire_name.to_string(),
      fast_path:      !decision.requires_validation,
    };
    self.append_then_dispatch(event).await?;
    Ok(receipt)
  }

  async fn approve_proposal(
    &self,
    proposal_id: Uuid,
    reviewer: Uuid,
  ) -> Result<ProposalRecord> {
    let proposal = self.load_proposal_for_review(proposal_id, reviewer).await?;

    // Emission precedes resolution: if resolving fails the proposal stays
    // pending and the approval can be retried — re-emission is safe because
    // executors are idempotent.
    self
      .emit_validated(ValidatedRelease {
        family:         proposal.target_family,
        action:         proposal.operation,
        subject_id:     proposal.target_id,
        subject_type:   proposal.target_family.singular().to_string(),
        data:           proposal.payload.clone(),
        user_id:        proposal.proposed_by,
        correlation_id: proposal.correlation_id,
        reason:         Some(format!("proposal {proposal_id} approved")),
      })
      .await?;

    self
      .store
      .resolve_proposal(proposal_id, ProposalStatus::Validated, reviewer)
      .await
  }

  async fn reject_proposal(
    &self,
    proposal_id: Uuid,
    reviewer: Uuid,
  ) -> Result<ProposalRecord> {
    self.load_proposal_for_review(proposal_id, reviewer).await?;
    self
      .store
      .resolve_proposal(proposal_id, ProposalStatus::Rejected, reviewer)
      .await
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
  };

  use chrono::Utc;
  use serde_json::json;
  use silo_core::{
    policy::{GuardedOp, RuleSource},
    projection::NewProposal,
    role::Membership,
  };

  use super::*;

  /// In-memory backend for gateway tests: a recording log, a recording
  /// queue, configurable rules, and a toggle to make either side fail.
  #[derive(Default)]
  struct Backend {
    events:      Mutex<Vec<Event>>,
    jobs:        Mutex<Vec<DispatchJob>>,
    proposals:   Mutex<Vec<ProposalRecord>>,
    memberships: Mutex<Vec<Membership>>,
    rules:       WorkspaceRules,
    fail_rules:  AtomicBool,
    fail_append: AtomicBool,
  }

  impl Backend {
    fn appended(&self) -> Vec<Event> {
      self.events.lock().unwrap().clone()
    }

    fn dispatched(&self) -> Vec<DispatchJob> {
      self.jobs.lock().unwrap().clone()
    }
  }

  impl EventLog for &Backend {
    async fn append(&self, event: Event) -> Result<()> {
      if self.fail_append.load(Ordering::SeqCst) {
        return Err(Error::Storage("log is down".to_string()));
      }
      self.events.lock().unwrap().push(event);
      Ok(())
    }

    async fn events_for_subject(&self, subject_id: Uuid) -> Result<Vec<Event>> {
      Ok(
        self
          .appended()
          .into_iter()
          .filter(|e| e.subject_id == subject_id)
          .collect(),
      )
    }

    async fn events_for_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>> {
      Ok(
        self
          .appended()
          .into_iter()
          .filter(|e| e.correlation_id == Some(correlation_id))
          .collect(),
      )
    }
  }

  impl Dispatch for &Backend {
    async fn send(&self, job: DispatchJob) -> Result<()> {
      self.jobs.lock().unwrap().push(job);
      Ok(())
    }
  }

  impl RuleSource for &Backend {
    async fn workspace_rules(&self, _workspace_id: Uuid) -> Result<WorkspaceRules> {
      if self.fail_rules.load(Ordering::SeqCst) {
        return Err(Error::Storage("settings store unreachable".to_string()));
      }
      Ok(self.rules.clone())
    }
  }

  impl MembershipStore for &Backend {
    async fn membership(
      &self,
      workspace_id: Uuid,
      user_id: Uuid,
    ) -> Result<Option<Membership>> {
      Ok(
        self
          .memberships
          .lock()
          .unwrap()
          .iter()
          .find(|m| m.workspace_id == workspace_id && m.user_id == user_id)
          .cloned(),
      )
    }
  }

  impl ProposalRepo for &Backend {
    async fn file_proposal(&self, input: NewProposal) -> Result<ProposalRecord> {
      let record = ProposalRecord {
        proposal_id:    Uuid::new_v4(),
        workspace_id:   input.workspace_id,
        target_family:  input.target_family,
        target_id:      input.target_id,
        operation:      input.operation,
        payload:        input.payload,
        correlation_id: input.correlation_id,
        status:         ProposalStatus::Pending,
        proposed_by:    input.proposed_by,
        reviewed_by:    None,
        created_at:     Utc::now(),
        reviewed_at:    None,
      };
      self.proposals.lock().unwrap().push(record.clone());
      Ok(record)
    }

    async fn proposal(&self, id: Uuid) -> Result<Option<ProposalRecord>> {
      Ok(
        self
          .proposals
          .lock()
          .unwrap()
          .iter()
          .find(|p| p.proposal_id == id)
          .cloned(),
      )
    }

    async fn resolve_proposal(
      &self,
      id: Uuid,
      status: ProposalStatus,
      reviewer: Uuid,
    ) -> Result<ProposalRecord> {
      let mut proposals = self.proposals.lock().unwrap();
      let proposal = proposals
        .iter_mut()
        .find(|p| p.proposal_id == id)
        .ok_or_else(|| Error::NotFound(format!("proposal {id} not found")))?;
      if proposal.status != ProposalStatus::Pending {
        return Err(Error::Validation(format!("proposal {id} is already resolved")));
      }
      proposal.status = status;
      proposal.reviewed_by = Some(reviewer);
      proposal.reviewed_at = Some(Utc::now());
      Ok(proposal.clone())
    }
  }

  fn intent(workspace_id: Option<Uuid>) -> RequestInput {
    RequestInput {
      name:         "entities.create.requested".to_string(),
      subject_id:   Uuid::new_v4(),
      subject_type: None,
      data:         json!({"title": "Test", "workspace_id": workspace_id}),
      user_id:      Uuid::new_v4(),
      workspace_id,
      project_id:   None,
      user_role:    None,
    }
  }

  #[tokio::test]
  async fn fast_path_appends_validated_and_dispatches_once() {
    let backend = Backend::default();
    let gateway = CommandGateway::new(&backend, &backend);
    let ws = Uuid::new_v4();

    let receipt = gateway.emit_request_event(intent(Some(ws))).await.unwrap();

    assert!(receipt.fast_path);
    assert_eq!(receipt.name, "entities.create.validated");

    let events = backend.appended();
    assert_eq!(events.len(), 1, "exactly one append");
    assert_eq!(events[0].name.to_string(), "entities.create.validated");
    assert!(events[0].metadata.fast_path);
    assert_eq!(events[0].correlation_id, Some(receipt.correlation_id));

    let jobs = backend.dispatched();
    assert_eq!(jobs.len(), 1, "exactly one dispatch");
    assert_eq!(jobs[0].name, "entities.create.validated");
    assert_eq!(jobs[0].event.event_id, receipt.event_id);
  }

  #[tokio::test]
  async fn guarded_operation_takes_the_standard_path() {
    let backend = Backend {
      rules: WorkspaceRules {
        guarded: vec![GuardedOp {
          family:    Family::Entities,
          operation: Some(Action::Create),
        }],
      },
      ..Backend::default()
    };
    let gateway = CommandGateway::new(&backend, &backend);

    let receipt = gateway
      .emit_request_event(intent(Some(Uuid::new_v4())))
      .await
      .unwrap();

    assert!(!receipt.fast_path);
    assert_eq!(receipt.name, "entities.create.requested");

    let events = backend.appended();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name.to_string(), "entities.create.requested");
    assert!(!events[0].metadata.fast_path);
    assert!(
      events[0]
        .metadata
        .policy_reason
        .as_deref()
        .unwrap()
        .contains("admin-configured")
    );

    let jobs = backend.dispatched();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "entities.create.requested");
  }

  #[tokio::test]
  async fn rules_failure_aborts_before_any_side_effect() {
    let backend = Backend::default();
    backend.fail_rules.store(true, Ordering::SeqCst);
    let gateway = CommandGateway::new(&backend, &backend);

    let err = gateway
      .emit_request_event(intent(Some(Uuid::new_v4())))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    assert!(backend.appended().is_empty());
    assert!(backend.dispatched().is_empty());
  }

  #[tokio::test]
  async fn append_failure_prevents_dispatch() {
    let backend = Backend::default();
    backend.fail_append.store(true, Ordering::SeqCst);
    let gateway = CommandGateway::new(&backend, &backend);

    let err = gateway
      .emit_request_event(intent(Some(Uuid::new_v4())))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(backend.dispatched().is_empty());
  }

  #[tokio::test]
  async fn non_requested_phase_is_rejected() {
    let backend = Backend::default();
    let gateway = CommandGateway::new(&backend, &backend);

    let mut input = intent(None);
    input.name = "entities.create.validated".to_string();
    let err = gateway.emit_request_event(input).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(backend.appended().is_empty());
  }

  #[tokio::test]
  async fn missing_actor_is_rejected_before_any_side_effect() {
    let backend = Backend::default();
    let gateway = CommandGateway::new(&backend, &backend);

    let mut input = intent(None);
    input.user_id = Uuid::nil();
    let err = gateway.emit_request_event(input).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(backend.appended().is_empty());
    assert!(backend.dispatched().is_empty());
  }

  #[tokio::test]
  async fn proposal_approval_requires_admin_and_reemits() {
    let backend = Backend::default();
    let ws = Uuid::new_v4();
    let admin = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    for (user, role) in [(admin, WorkspaceRole::Admin), (viewer, WorkspaceRole::Viewer)] {
      backend.memberships.lock().unwrap().push(Membership {
        workspace_id: ws,
        user_id:      user,
        role,
        added_by:     None,
        created_at:   Utc::now(),
        updated_at:   Utc::now(),
      });
    }

    let gateway = CommandGateway::new(&backend, &backend);
    let correlation = Uuid::new_v4();
    let filed = (&backend)
      .file_proposal(NewProposal {
        workspace_id:   ws,
        target_family:  Family::Entities,
        target_id:      Uuid::new_v4(),
        operation:      Action::Delete,
        payload:        json!({"workspace_id": ws}),
        correlation_id: Some(correlation),
        proposed_by:    viewer,
      })
      .await
      .unwrap();

    // A viewer cannot approve.
    let err = gateway.approve_proposal(filed.proposal_id, viewer).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    assert!(backend.appended().is_empty());

    // An admin can; the released event carries the original correlation id.
    let resolved = gateway.approve_proposal(filed.proposal_id, admin).await.unwrap();
    assert_eq!(resolved.status, ProposalStatus::Validated);
    assert_eq!(resolved.reviewed_by, Some(admin));

    let events = backend.appended();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name.to_string(), "entities.delete.validated");
    assert_eq!(events[0].correlation_id, Some(correlation));
    assert_eq!(events[0].user_id, viewer);
    assert_eq!(backend.dispatched().len(), 1);

    // Approval is single-shot.
    let err = gateway.approve_proposal(filed.proposal_id, admin).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[tokio::test]
  async fn proposal_rejection_emits_nothing() {
    let backend = Backend::default();
    let ws = Uuid::new_v4();
    let admin = Uuid::new_v4();
    backend.memberships.lock().unwrap().push(Membership {
      workspace_id: ws,
      user_id:      admin,
      role:         WorkspaceRole::Owner,
      added_by:     None,
      created_at:   Utc::now(),
      updated_at:   Utc::now(),
    });

    let gateway = CommandGateway::new(&backend, &backend);
    let filed = (&backend)
      .file_proposal(NewProposal {
        workspace_id:   ws,
        target_family:  Family::Projects,
        target_id:      Uuid::new_v4(),
        operation:      Action::Delete,
        payload:        json!({}),
        correlation_id: None,
        proposed_by:    Uuid::new_v4(),
      })
      .await
      .unwrap();

    let resolved = gateway.reject_proposal(filed.proposal_id, admin).await.unwrap();
    assert_eq!(resolved.status, ProposalStatus::Rejected);
    assert!(backend.appended().is_empty());
    assert!(backend.dispatched().is_empty());
  }
}
