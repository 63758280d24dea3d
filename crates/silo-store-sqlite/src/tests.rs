//! Integration tests for `SqliteStore` against an in-memory database.

use serde_json::json;
use silo_core::{
  Error,
  event::{Action, Event, EventMetadata, EventSource, Family, NewEvent},
  log::{EventLog, StepMemo},
  policy::{GuardedOp, RuleSource, WorkspaceRules},
  projection::{
    ApiKeyRepo, EntityPatch, EntityRepo, NewApiKey, NewEntity, NewMember,
    NewProject, NewProposal, ProjectRepo, ProposalRepo, ProposalStatus,
    MemberRepo, ReadStore,
  },
  role::{MembershipStore, WorkspaceRole},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn event_count(s: &SqliteStore) -> i64 {
  s.conn
    .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?))
    .await
    .unwrap()
}

fn api_event(name: &str, subject_id: Uuid, data: serde_json::Value) -> Event {
  Event::create(NewEvent {
    name:           name.to_string(),
    subject_id,
    subject_type:   "entity".to_string(),
    data,
    user_id:        Uuid::new_v4(),
    source:         EventSource::Api,
    correlation_id: None,
    metadata:       EventMetadata::default(),
  })
  .unwrap()
}

// ─── Event log ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_and_read_back_by_subject() {
  let s = store().await;
  let subject = Uuid::new_v4();

  let event = api_event("entities.create.validated", subject, json!({"title": "A"}));
  s.append(event.clone()).await.unwrap();

  let found = s.events_for_subject(subject).await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].event_id, event.event_id);
  assert_eq!(found[0].name, event.name);
  assert_eq!(found[0].data, json!({"title": "A"}));
  assert_eq!(found[0].user_id, event.user_id);
}

#[tokio::test]
async fn append_rejects_duplicate_event_id() {
  let s = store().await;
  let event = api_event("entities.create.validated", Uuid::new_v4(), json!({"title": "A"}));

  s.append(event.clone()).await.unwrap();
  let err = s.append(event.clone()).await.unwrap_err();
  assert!(matches!(err, Error::DuplicateEvent(id) if id == event.event_id));

  // The log is unchanged.
  assert_eq!(event_count(&s).await, 1);
}

#[tokio::test]
async fn events_group_by_correlation() {
  let s = store().await;
  let correlation = Uuid::new_v4();

  for name in ["entities.update.requested", "entities.update.validated"] {
    let mut event = api_event(name, Uuid::new_v4(), json!({}));
    event.correlation_id = Some(correlation);
    s.append(event).await.unwrap();
  }
  let unrelated = api_event("entities.create.validated", Uuid::new_v4(), json!({"title": "x"}));
  s.append(unrelated).await.unwrap();

  let found = s.events_for_correlation(correlation).await.unwrap();
  assert_eq!(found.len(), 2);
  assert!(found.iter().all(|e| e.correlation_id == Some(correlation)));
}

// ─── Entities ────────────────────────────────────────────────────────────────

fn new_entity(title: &str) -> NewEntity {
  NewEntity {
    entity_id:    Uuid::new_v4(),
    workspace_id: Some(Uuid::new_v4()),
    title:        title.to_string(),
    body:         json!({}),
  }
}

#[tokio::test]
async fn create_entity_writes_row_and_completed_event() {
  let s = store().await;
  let user = Uuid::new_v4();

  let record = s.create_entity(new_entity("Test"), user).await.unwrap();

  let fetched = s.entity(record.entity_id).await.unwrap().unwrap();
  assert_eq!(fetched.title, "Test");
  assert_eq!(fetched.user_id, user);

  // Exactly one completed event, referencing the mutated row.
  let events = s.events_for_subject(record.entity_id).await.unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].name.to_string(), "entities.create.completed");
  assert_eq!(events[0].subject_id, record.entity_id);
  assert_eq!(events[0].source, EventSource::Automation);
}

#[tokio::test]
async fn create_entity_with_taken_id_is_already_exists() {
  let s = store().await;
  let input = new_entity("First");

  s.create_entity(input.clone(), Uuid::new_v4()).await.unwrap();
  let err = s.create_entity(input, Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyExists(_)));
}

#[tokio::test]
async fn update_entity_scoped_to_owner() {
  let s = store().await;
  let owner = Uuid::new_v4();
  let record = s.create_entity(new_entity("Before"), owner).await.unwrap();

  let patch = EntityPatch { title: Some("After".to_string()), body: None };
  let updated = s.update_entity(record.entity_id, patch, owner).await.unwrap();
  assert_eq!(updated.title, "After");

  let events = s.events_for_subject(record.entity_id).await.unwrap();
  assert_eq!(events.len(), 2);
  assert_eq!(events[1].name.to_string(), "entities.update.completed");
}

#[tokio::test]
async fn update_by_other_tenant_is_not_found_and_mutates_nothing() {
  let s = store().await;
  let owner = Uuid::new_v4();
  let intruder = Uuid::new_v4();
  let record = s.create_entity(new_entity("Mine"), owner).await.unwrap();
  let before = event_count(&s).await;

  let patch = EntityPatch { title: Some("Stolen".to_string()), body: None };
  let err = s.update_entity(record.entity_id, patch, intruder).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));

  // No row changed, no event appended.
  let row = s.entity(record.entity_id).await.unwrap().unwrap();
  assert_eq!(row.title, "Mine");
  assert_eq!(event_count(&s).await, before);
}

#[tokio::test]
async fn delete_entity_is_soft_and_not_repeatable() {
  let s = store().await;
  let owner = Uuid::new_v4();
  let record = s.create_entity(new_entity("Doomed"), owner).await.unwrap();

  s.delete_entity(record.entity_id, owner).await.unwrap();
  assert!(s.entity(record.entity_id).await.unwrap().is_none());

  // Redelivery case: the row is already gone from the scoped view.
  let err = s.delete_entity(record.entity_id, owner).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));

  // And updates no longer reach it either.
  let patch = EntityPatch { title: Some("Back".to_string()), body: None };
  assert!(matches!(
    s.update_entity(record.entity_id, patch, owner).await.unwrap_err(),
    Error::NotFound(_)
  ));
}

#[tokio::test]
async fn entity_listings_are_scoped() {
  let s = store().await;
  let ws = Uuid::new_v4();
  let alice = Uuid::new_v4();
  let bob = Uuid::new_v4();

  let mut in_ws = new_entity("Shared");
  in_ws.workspace_id = Some(ws);
  s.create_entity(in_ws, alice).await.unwrap();

  let mut personal = new_entity("Private");
  personal.workspace_id = None;
  s.create_entity(personal, bob).await.unwrap();

  assert_eq!(s.entities_in_workspace(ws).await.unwrap().len(), 1);
  assert_eq!(s.entities_for_user(bob).await.unwrap().len(), 1);
  assert_eq!(s.entities_for_user(alice).await.unwrap().len(), 1);
}

// ─── Projects ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn project_lifecycle_with_completed_events() {
  let s = store().await;
  let user = Uuid::new_v4();
  let input = NewProject {
    project_id:   Uuid::new_v4(),
    workspace_id: Uuid::new_v4(),
    name:         "Atlas".to_string(),
    description:  None,
  };

  let record = s.create_project(input, user).await.unwrap();
  s.delete_project(record.project_id, user).await.unwrap();
  assert!(s.project(record.project_id).await.unwrap().is_none());

  let events = s.events_for_subject(record.project_id).await.unwrap();
  let names: Vec<String> = events.iter().map(|e| e.name.to_string()).collect();
  assert_eq!(names, ["projects.create.completed", "projects.delete.completed"]);
}

#[tokio::test]
async fn delete_project_scoped_to_owner() {
  let s = store().await;
  let owner = Uuid::new_v4();
  let input = NewProject {
    project_id:   Uuid::new_v4(),
    workspace_id: Uuid::new_v4(),
    name:         "Keep".to_string(),
    description:  None,
  };
  let record = s.create_project(input, owner).await.unwrap();

  let err = s.delete_project(record.project_id, Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
  assert!(s.project(record.project_id).await.unwrap().is_some());
}

// ─── Workspace members ───────────────────────────────────────────────────────

#[tokio::test]
async fn membership_lifecycle() {
  let s = store().await;
  let ws = Uuid::new_v4();
  let admin = Uuid::new_v4();
  let member = Uuid::new_v4();

  let added = s
    .add_member(ws, NewMember { user_id: member, role: WorkspaceRole::Viewer }, admin)
    .await
    .unwrap();
  assert_eq!(added.role, WorkspaceRole::Viewer);
  assert_eq!(added.added_by, Some(admin));

  let found = s.membership(ws, member).await.unwrap().unwrap();
  assert_eq!(found.role, WorkspaceRole::Viewer);

  let promoted = s
    .update_member_role(ws, member, WorkspaceRole::Editor, admin)
    .await
    .unwrap();
  assert_eq!(promoted.role, WorkspaceRole::Editor);

  s.remove_member(ws, member, admin).await.unwrap();
  assert!(s.membership(ws, member).await.unwrap().is_none());

  let names: Vec<String> = s
    .events_for_subject(member)
    .await
    .unwrap()
    .iter()
    .map(|e| e.name.to_string())
    .collect();
  assert_eq!(names, [
    "workspace_members.add.completed",
    "workspace_members.update_role.completed",
    "workspace_members.remove.completed",
  ]);
}

#[tokio::test]
async fn duplicate_member_is_already_exists() {
  let s = store().await;
  let ws = Uuid::new_v4();
  let member = Uuid::new_v4();
  let admin = Uuid::new_v4();

  s.add_member(ws, NewMember { user_id: member, role: WorkspaceRole::Viewer }, admin)
    .await
    .unwrap();
  let err = s
    .add_member(ws, NewMember { user_id: member, role: WorkspaceRole::Editor }, admin)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyExists(_)));
}

#[tokio::test]
async fn update_role_for_unknown_member_is_not_found() {
  let s = store().await;
  let err = s
    .update_member_role(Uuid::new_v4(), Uuid::new_v4(), WorkspaceRole::Admin, Uuid::new_v4())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

// ─── API keys ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn issued_key_exposes_secret_once_and_stores_digest() {
  use sha2::{Digest as _, Sha256};

  let s = store().await;
  let user = Uuid::new_v4();

  let issued = s
    .issue_api_key(NewApiKey { name: "ci".to_string(), workspace_id: None }, user)
    .await
    .unwrap();

  assert!(issued.secret.starts_with("sk_"));
  assert!(issued.secret.starts_with(&issued.record.prefix));
  assert_eq!(
    issued.record.digest,
    hex::encode(Sha256::digest(issued.secret.as_bytes()))
  );

  // The listing carries the digest, never the secret.
  let keys = s.api_keys_for_user(user).await.unwrap();
  assert_eq!(keys.len(), 1);
  assert_eq!(keys[0].api_key_id, issued.record.api_key_id);
}

#[tokio::test]
async fn revoke_is_tenant_scoped_and_single_shot() {
  let s = store().await;
  let owner = Uuid::new_v4();
  let issued = s
    .issue_api_key(NewApiKey { name: "ci".to_string(), workspace_id: None }, owner)
    .await
    .unwrap();
  let id = issued.record.api_key_id;

  // Someone else cannot revoke it, and cannot learn it exists.
  let err = s.revoke_api_key(id, Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));

  s.revoke_api_key(id, owner).await.unwrap();
  let err = s.revoke_api_key(id, owner).await.unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));

  let keys = s.api_keys_for_user(owner).await.unwrap();
  assert!(keys[0].revoked_at.is_some());
}

// ─── Proposals ───────────────────────────────────────────────────────────────

fn new_proposal(ws: Uuid) -> NewProposal {
  NewProposal {
    workspace_id:   ws,
    target_family:  Family::Entities,
    target_id:      Uuid::new_v4(),
    operation:      Action::Update,
    payload:        json!({"title": "Proposed"}),
    correlation_id: Some(Uuid::new_v4()),
    proposed_by:    Uuid::new_v4(),
  }
}

#[tokio::test]
async fn proposal_mutations_never_append_events() {
  let s = store().await;
  let ws = Uuid::new_v4();
  let before = event_count(&s).await;

  let filed = s.file_proposal(new_proposal(ws)).await.unwrap();
  assert_eq!(filed.status, ProposalStatus::Pending);

  let reviewer = Uuid::new_v4();
  let resolved = s
    .resolve_proposal(filed.proposal_id, ProposalStatus::Validated, reviewer)
    .await
    .unwrap();
  assert_eq!(resolved.status, ProposalStatus::Validated);
  assert_eq!(resolved.reviewed_by, Some(reviewer));

  assert_eq!(event_count(&s).await, before);
}

#[tokio::test]
async fn proposal_resolution_is_single_shot() {
  let s = store().await;
  let filed = s.file_proposal(new_proposal(Uuid::new_v4())).await.unwrap();

  s.resolve_proposal(filed.proposal_id, ProposalStatus::Rejected, Uuid::new_v4())
    .await
    .unwrap();
  let err = s
    .resolve_proposal(filed.proposal_id, ProposalStatus::Validated, Uuid::new_v4())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let err = s
    .resolve_proposal(Uuid::new_v4(), ProposalStatus::Validated, Uuid::new_v4())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn proposals_filter_by_status() {
  let s = store().await;
  let ws = Uuid::new_v4();

  let a = s.file_proposal(new_proposal(ws)).await.unwrap();
  s.file_proposal(new_proposal(ws)).await.unwrap();
  s.resolve_proposal(a.proposal_id, ProposalStatus::Rejected, Uuid::new_v4())
    .await
    .unwrap();

  let pending = s.proposals(ws, Some(ProposalStatus::Pending)).await.unwrap();
  assert_eq!(pending.len(), 1);
  let all = s.proposals(ws, None).await.unwrap();
  assert_eq!(all.len(), 2);
}

// ─── Workspace rules ─────────────────────────────────────────────────────────

#[tokio::test]
async fn workspace_rules_roundtrip_with_default_fallback() {
  let s = store().await;
  let ws = Uuid::new_v4();

  // Unknown workspace: defaults, not an error.
  assert_eq!(s.workspace_rules(ws).await.unwrap(), WorkspaceRules::default());

  let rules = WorkspaceRules {
    guarded: vec![GuardedOp { family: Family::Entities, operation: Some(Action::Create) }],
  };
  s.put_workspace_rules(ws, &rules).await.unwrap();
  assert_eq!(s.workspace_rules(ws).await.unwrap(), rules);

  // Replacement, not accumulation.
  s.put_workspace_rules(ws, &WorkspaceRules::default()).await.unwrap();
  assert_eq!(s.workspace_rules(ws).await.unwrap(), WorkspaceRules::default());
}

// ─── Step memo ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn step_memo_records_completion() {
  let s = store().await;
  let event_id = Uuid::new_v4();

  assert!(!s.step_done(event_id, "apply").await.unwrap());
  s.record_step(event_id, "apply").await.unwrap();
  assert!(s.step_done(event_id, "apply").await.unwrap());

  // Labels are independent; recording twice is harmless.
  assert!(!s.step_done(event_id, "notify").await.unwrap());
  s.record_step(event_id, "apply").await.unwrap();
  assert!(s.step_done(event_id, "apply").await.unwrap());
}
