//! Infrastructure ports: the event log, the dispatch queue, and the step
//! memo used for idempotent executor retries.
//!
//! All collaborators are injected explicitly — the gateway and the
//! repositories take these seams as constructor parameters, never as a
//! late-bound global publisher.

use uuid::Uuid;

use crate::{Result, event::Event};

// ─── Event log ───────────────────────────────────────────────────────────────

/// Append-only persistence for event envelopes.
///
/// Appending an `event_id` that is already present must be rejected with
/// [`crate::Error::DuplicateEvent`]; nothing is ever updated or deleted.
pub trait EventLog: Send + Sync {
  fn append(&self, event: Event) -> impl Future<Output = Result<()>> + Send + '_;

  /// All events concerning a subject, oldest first.
  fn events_for_subject(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Event>>> + Send + '_;

  /// All events in a causal group, oldest first.
  fn events_for_correlation(
    &self,
    correlation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Event>>> + Send + '_;
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// A unit of work handed to the asynchronous queue. `name` is the routing
/// key; it always matches the event's own name on the wire.
#[derive(Debug, Clone)]
pub struct DispatchJob {
  pub name:  String,
  pub event: Event,
}

impl DispatchJob {
  pub fn for_event(event: &Event) -> Self {
    Self { name: event.name.to_string(), event: event.clone() }
  }
}

/// The durable task queue the gateway hands events to. Delivery is
/// at-least-once; consumers must be idempotent.
pub trait Dispatch: Send + Sync {
  fn send(&self, job: DispatchJob) -> impl Future<Output = Result<()>> + Send + '_;
}

// ─── Step memo ───────────────────────────────────────────────────────────────

/// Durable record of completed executor steps, keyed by `(event_id, label)`.
/// A step recorded here is never re-executed when the same event is
/// redelivered.
pub trait StepMemo: Send + Sync {
  fn step_done<'a>(
    &'a self,
    event_id: Uuid,
    label: &'a str,
  ) -> impl Future<Output = Result<bool>> + Send + 'a;

  fn record_step<'a>(
    &'a self,
    event_id: Uuid,
    label: &'a str,
  ) -> impl Future<Output = Result<()>> + Send + 'a;
}
