//! End-to-end pipeline tests: gateway → queue → validator/executors →
//! projections, against an in-memory SQLite store.

use std::time::Duration;

use serde_json::json;
use silo_core::{
  command::CommandPort as _,
  event::{Event, EventMetadata, EventSource, NewEvent},
  log::{Dispatch as _, DispatchJob, EventLog as _},
  projection::{NewMember, ProposalStatus, ReadStore as _, MemberRepo as _},
  role::WorkspaceRole,
};
use silo_dispatch::{
  CommandGateway, DeadLetters, DispatchConfig, Executors, GlobalValidator,
  QueueHandle, QueueWorker, queue,
};
use silo_store_sqlite::SqliteStore;
use uuid::Uuid;

struct Pod {
  store:   SqliteStore,
  gateway: CommandGateway<SqliteStore, QueueHandle>,
  handle:  QueueHandle,
  dead:    DeadLetters,
}

async fn pod() -> Pod {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let (handle, rx) = queue();
  let gateway = CommandGateway::new(store.clone(), handle.clone());
  let validator = GlobalValidator::new(store.clone(), gateway.clone());
  let executors = Executors::new(store.clone());
  let worker = QueueWorker::new(rx, executors, validator, DispatchConfig::default());
  let dead = worker.dead_letters();
  tokio::spawn(worker.run());
  Pod { store, gateway, handle, dead }
}

/// Poll until `check` passes or a generous deadline expires.
macro_rules! eventually {
  ($check:expr, $what:literal) => {{
    let mut ok = false;
    for _ in 0..400 {
      if $check {
        ok = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(ok, concat!("timed out waiting for: ", $what));
  }};
}

fn create_intent(
  subject_id: Uuid,
  user_id: Uuid,
  workspace_id: Option<Uuid>,
  title: &str,
  role: Option<WorkspaceRole>,
) -> silo_core::command::RequestInput {
  silo_core::command::RequestInput {
    name: "entities.create.requested".to_string(),
    subject_id,
    subject_type: None,
    data: json!({"title": title, "workspace_id": workspace_id}),
    user_id,
    workspace_id,
    project_id: None,
    user_role: role,
  }
}

fn delete_intent(
  subject_id: Uuid,
  user_id: Uuid,
  workspace_id: Option<Uuid>,
  role: Option<WorkspaceRole>,
) -> silo_core::command::RequestInput {
  silo_core::command::RequestInput {
    name: "entities.delete.requested".to_string(),
    subject_id,
    subject_type: None,
    data: json!({"workspace_id": workspace_id}),
    user_id,
    workspace_id,
    project_id: None,
    user_role: role,
  }
}

// ─── Fast path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn fast_path_create_materialises_the_entity() {
  let pod = pod().await;
  let user = Uuid::new_v4();
  let subject = Uuid::new_v4();

  let receipt = pod
    .gateway
    .emit_request_event(create_intent(subject, user, None, "Test", None))
    .await
    .unwrap();
  assert!(receipt.fast_path);
  assert_eq!(receipt.name, "entities.create.validated");

  eventually!(
    pod.store.entity(subject).await.unwrap().is_some(),
    "entity projection"
  );
  let entity = pod.store.entity(subject).await.unwrap().unwrap();
  assert_eq!(entity.title, "Test");
  assert_eq!(entity.user_id, user);

  // Log: the validated intent plus the executor's completed audit record.
  eventually!(
    pod.store.events_for_subject(subject).await.unwrap().len() == 2,
    "completed event"
  );
  let events = pod.store.events_for_subject(subject).await.unwrap();
  assert_eq!(events[0].name.to_string(), "entities.create.validated");
  assert!(events[0].metadata.fast_path);
  assert_eq!(events[0].correlation_id, Some(receipt.correlation_id));
  assert_eq!(events[1].name.to_string(), "entities.create.completed");
  assert_eq!(events[1].subject_id, subject);

  assert!(pod.dead.is_empty());
}

// ─── Standard path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn editor_delete_flows_through_the_validator() {
  let pod = pod().await;
  let ws = Uuid::new_v4();
  let admin = Uuid::new_v4();
  let editor = Uuid::new_v4();
  pod
    .store
    .add_member(ws, NewMember { user_id: editor, role: WorkspaceRole::Editor }, admin)
    .await
    .unwrap();

  let subject = Uuid::new_v4();
  pod
    .gateway
    .emit_request_event(create_intent(
      subject,
      editor,
      Some(ws),
      "Doomed",
      Some(WorkspaceRole::Editor),
    ))
    .await
    .unwrap();
  eventually!(pod.store.entity(subject).await.unwrap().is_some(), "entity created");

  let receipt = pod
    .gateway
    .emit_request_event(delete_intent(subject, editor, Some(ws), Some(WorkspaceRole::Editor)))
    .await
    .unwrap();
  assert!(!receipt.fast_path, "deletes default to review");
  assert_eq!(receipt.name, "entities.delete.requested");

  eventually!(pod.store.entity(subject).await.unwrap().is_none(), "entity deleted");

  // The requested event and its released twin share the correlation id.
  let correlated = pod
    .store
    .events_for_correlation(receipt.correlation_id)
    .await
    .unwrap();
  let names: Vec<String> = correlated.iter().map(|e| e.name.to_string()).collect();
  assert_eq!(names, ["entities.delete.requested", "entities.delete.validated"]);

  assert!(pod.dead.is_empty());
}

#[tokio::test]
async fn viewer_delete_is_held_as_a_proposal_until_approved() {
  let pod = pod().await;
  let ws = Uuid::new_v4();
  let admin = Uuid::new_v4();
  let viewer = Uuid::new_v4();
  pod
    .store
    .add_member(ws, NewMember { user_id: admin, role: WorkspaceRole::Admin }, admin)
    .await
    .unwrap();
  pod
    .store
    .add_member(ws, NewMember { user_id: viewer, role: WorkspaceRole::Viewer }, admin)
    .await
    .unwrap();

  let subject = Uuid::new_v4();
  pod
    .gateway
    .emit_request_event(create_intent(
      subject,
      viewer,
      Some(ws),
      "Contested",
      Some(WorkspaceRole::Viewer),
    ))
    .await
    .unwrap();
  eventually!(pod.store.entity(subject).await.unwrap().is_some(), "entity created");

  let receipt = pod
    .gateway
    .emit_request_event(delete_intent(subject, viewer, Some(ws), Some(WorkspaceRole::Viewer)))
    .await
    .unwrap();
  assert!(!receipt.fast_path);

  eventually!(
    pod.store.proposals(ws, Some(ProposalStatus::Pending)).await.unwrap().len() == 1,
    "pending proposal"
  );
  // Nothing was applied yet.
  assert!(pod.store.entity(subject).await.unwrap().is_some());

  let pending = pod.store.proposals(ws, Some(ProposalStatus::Pending)).await.unwrap();
  let resolved = pod
    .gateway
    .approve_proposal(pending[0].proposal_id, admin)
    .await
    .unwrap();
  assert_eq!(resolved.status, ProposalStatus::Validated);

  eventually!(pod.store.entity(subject).await.unwrap().is_none(), "entity deleted");

  // The released event joins the original correlation group.
  let correlated = pod
    .store
    .events_for_correlation(receipt.correlation_id)
    .await
    .unwrap();
  let names: Vec<String> = correlated.iter().map(|e| e.name.to_string()).collect();
  assert_eq!(names, ["entities.delete.requested", "entities.delete.validated"]);

  assert!(pod.dead.is_empty());
}

// ─── Idempotency ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn redelivered_create_event_applies_once() {
  let pod = pod().await;
  let user = Uuid::new_v4();
  let subject = Uuid::new_v4();

  pod
    .gateway
    .emit_request_event(create_intent(subject, user, None, "Once", None))
    .await
    .unwrap();
  eventually!(pod.store.entity(subject).await.unwrap().is_some(), "entity created");

  // Simulate at-least-once redelivery of the same validated event.
  let validated = pod.store.events_for_subject(subject).await.unwrap()[0].clone();
  for _ in 0..2 {
    pod.handle.send(DispatchJob::for_event(&validated)).await.unwrap();
  }
  tokio::time::sleep(Duration::from_millis(150)).await;

  let mine = pod.store.entities_for_user(user).await.unwrap();
  assert_eq!(mine.len(), 1, "no duplicate rows");
  assert!(pod.dead.is_empty(), "redelivery is not an error");
}

#[tokio::test]
async fn second_delete_of_a_gone_entity_is_success() {
  let pod = pod().await;
  let ws = Uuid::new_v4();
  let admin = Uuid::new_v4();
  pod
    .store
    .add_member(ws, NewMember { user_id: admin, role: WorkspaceRole::Admin }, admin)
    .await
    .unwrap();

  let subject = Uuid::new_v4();
  pod
    .gateway
    .emit_request_event(create_intent(
      subject,
      admin,
      Some(ws),
      "Twice-deleted",
      Some(WorkspaceRole::Admin),
    ))
    .await
    .unwrap();
  eventually!(pod.store.entity(subject).await.unwrap().is_some(), "entity created");

  // Two independent delete intents for the same subject (admin fast path
  // so both reach the executor directly). The second finds nothing to
  // delete and must treat that as "already done".
  for _ in 0..2 {
    pod
      .gateway
      .emit_request_event(delete_intent(subject, admin, Some(ws), Some(WorkspaceRole::Admin)))
      .await
      .unwrap();
  }

  eventually!(pod.store.entity(subject).await.unwrap().is_none(), "entity deleted");
  tokio::time::sleep(Duration::from_millis(150)).await;
  assert!(pod.dead.is_empty(), "already-deleted must not crash-loop");
}

// ─── Terminal failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn event_without_an_executor_branch_is_dead_lettered() {
  let pod = pod().await;

  let event = Event::create(NewEvent {
    name:           "proposals.create.validated".to_string(),
    subject_id:     Uuid::new_v4(),
    subject_type:   "proposal".to_string(),
    data:           json!({}),
    user_id:        Uuid::new_v4(),
    source:         EventSource::Automation,
    correlation_id: None,
    metadata:       EventMetadata::default(),
  })
  .unwrap();
  pod.handle.send(DispatchJob::for_event(&event)).await.unwrap();

  eventually!(!pod.dead.is_empty(), "dead letter");
  let letters = pod.dead.snapshot();
  assert_eq!(letters.len(), 1);
  assert_eq!(letters[0].event_id, event.event_id);
  assert!(letters[0].error.contains("no executor branch"), "{}", letters[0].error);
  // Terminal failures are not retried.
  assert_eq!(letters[0].attempts, 1);
}

#[tokio::test]
async fn malformed_job_name_is_dead_lettered() {
  let pod = pod().await;

  let event = Event::create(NewEvent {
    name:           "entities.update.validated".to_string(),
    subject_id:     Uuid::new_v4(),
    subject_type:   "entity".to_string(),
    data:           json!({"title": "x"}),
    user_id:        Uuid::new_v4(),
    source:         EventSource::Api,
    correlation_id: None,
    metadata:       EventMetadata::default(),
  })
  .unwrap();

  let mut job = DispatchJob::for_event(&event);
  job.name = "entities.transmogrify.validated".to_string();
  pod.handle.send(job).await.unwrap();

  eventually!(!pod.dead.is_empty(), "dead letter");
  let letters = pod.dead.snapshot();
  assert_eq!(letters[0].attempts, 0);
}
