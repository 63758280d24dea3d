//! The in-process task queue: at-least-once delivery, per-family bounded
//! concurrency, bounded retry with backoff, and a dead-letter list for
//! terminal failures.
//!
//! The queue makes no ordering promise across subjects. What it does
//! guarantee: a job handed to [`QueueHandle::send`] is either processed to
//! completion, or lands in the dead letters where it is observable — it is
//! never silently dropped.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
  time::Duration,
};

use tokio::sync::{Semaphore, mpsc};
use uuid::Uuid;

use silo_core::{
  Error, Result,
  event::{EventName, Family, Phase},
  log::{Dispatch, DispatchJob, EventLog, StepMemo},
  policy::RuleSource,
  projection::{EntityRepo, ProjectRepo, ProposalRepo, MemberRepo},
  role::MembershipStore,
};

use crate::{executor::Executors, validator::GlobalValidator};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatchConfig {
  /// Maximum in-flight events per subject family.
  pub family_limit:    usize,
  /// Maximum in-flight events for the global validator.
  pub validator_limit: usize,
  /// Total delivery attempts per job (first try included).
  pub max_attempts:    u32,
  /// Base backoff between attempts; grows linearly with the attempt count.
  pub retry_backoff:   Duration,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      family_limit:    10,
      validator_limit: 4,
      max_attempts:    3,
      retry_backoff:   Duration::from_millis(50),
    }
  }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// The sending half of the queue — the [`Dispatch`] implementation the
/// gateway is constructed with.
#[derive(Clone)]
pub struct QueueHandle {
  tx: mpsc::UnboundedSender<DispatchJob>,
}

impl Dispatch for QueueHandle {
  async fn send(&self, job: DispatchJob) -> Result<()> {
    self
      .tx
      .send(job)
      .map_err(|_| Error::Storage("dispatch queue is closed".to_string()))
  }
}

/// Create a queue channel. The receiver goes to [`QueueWorker::new`]; the
/// handle is cloned into the gateway and the validator.
pub fn queue() -> (QueueHandle, mpsc::UnboundedReceiver<DispatchJob>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (QueueHandle { tx }, rx)
}

// ─── Dead letters ────────────────────────────────────────────────────────────

/// A job that failed terminally: either a non-retryable error, or retry
/// exhaustion. Kept for operational inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
  pub event_id: Uuid,
  pub name:     String,
  pub attempts: u32,
  pub error:    String,
}

#[derive(Clone, Default)]
pub struct DeadLetters {
  inner: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetters {
  fn push(&self, letter: DeadLetter) {
    self.inner.lock().expect("dead letter lock").push(letter);
  }

  pub fn snapshot(&self) -> Vec<DeadLetter> {
    self.inner.lock().expect("dead letter lock").clone()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().expect("dead letter lock").is_empty()
  }
}

// ─── Routing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Route {
  Validator,
  Family(Family),
}

// ─── Worker ──────────────────────────────────────────────────────────────────

/// The consuming half of the queue. Decodes each job's name once at this
/// boundary, routes `requested` events to the validator and `validated`
/// events to the family executors, and drives the retry loop.
pub struct QueueWorker<S> {
  rx:        mpsc::UnboundedReceiver<DispatchJob>,
  executors: Executors<S>,
  validator: GlobalValidator<S>,
  config:    DispatchConfig,
  limits:    HashMap<Route, Arc<Semaphore>>,
  dead:      DeadLetters,
}

impl<S> QueueWorker<S>
where
  S: EventLog
    + RuleSource
    + MembershipStore
    + ProposalRepo
    + StepMemo
    + EntityRepo
    + ProjectRepo
    + MemberRepo
    + Clone
    + Send
    + Sync
    + 'static,
{
  pub fn new(
    rx: mpsc::UnboundedReceiver<DispatchJob>,
    executors: Executors<S>,
    validator: GlobalValidator<S>,
    config: DispatchConfig,
  ) -> Self {
    let mut limits = HashMap::new();
    limits.insert(Route::Validator, Arc::new(Semaphore::new(config.validator_limit)));
    for family in Family::ALL {
      limits.insert(Route::Family(family), Arc::new(Semaphore::new(config.family_limit)));
    }
    Self { rx, executors, validator, config, limits, dead: DeadLetters::default() }
  }

  /// Handle for inspecting terminal failures; clone before calling
  /// [`QueueWorker::run`].
  pub fn dead_letters(&self) -> DeadLetters {
    self.dead.clone()
  }

  /// Consume jobs until every [`QueueHandle`] is dropped.
  pub async fn run(mut self) {
    while let Some(job) = self.rx.recv().await {
      // Decode once, at the boundary. An undecodable or undispatched name
      // is a programming error upstream — dead-letter it loudly.
      let name = match EventName::parse(&job.name) {
        Ok(name) if name.phase != Phase::Completed => name,
        Ok(_) => {
          self.reject(&job, "completed events are notifications, not dispatch targets");
          continue;
        }
        Err(e) => {
          self.reject(&job, &e.to_string());
          continue;
        }
      };

      let route = match name.phase {
        Phase::Requested => Route::Validator,
        Phase::Validated => Route::Family(name.family),
        Phase::Completed => unreachable!("filtered above"),
      };
      let semaphore = self.limits[&route].clone();

      let executors = self.executors.clone();
      let validator = self.validator.clone();
      let config = self.config.clone();
      let dead = self.dead.clone();

      tokio::spawn(async move {
        let _permit = semaphore.acquire_owned().await.expect("queue semaphore");

        let mut attempt = 0u32;
        loop {
          attempt += 1;
          let result = match route {
            Route::Validator => validator.process(&name, &job.event).await,
            Route::Family(_) => executors.execute(&name, &job.event).await,
          };

          match result {
            Ok(()) => {
              tracing::debug!(event_id = %job.event.event_id, name = %name, "event processed");
              break;
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
              tracing::warn!(
                event_id = %job.event.event_id,
                name = %name,
                attempt,
                error = %e,
                "transient failure, retrying"
              );
              tokio::time::sleep(config.retry_backoff * attempt).await;
            }
            Err(e) => {
              tracing::error!(
                event_id = %job.event.event_id,
                name = %name,
                attempt,
                error = %e,
                "event processing failed terminally"
              );
              dead.push(DeadLetter {
                event_id: job.event.event_id,
                name:     name.to_string(),
                attempts: attempt,
                error:    e.to_string(),
              });
              break;
            }
          }
        }
      });
    }
  }

  fn reject(&self, job: &DispatchJob, reason: &str) {
    tracing::error!(name = %job.name, reason, "undispatchable job");
    self.dead.push(DeadLetter {
      event_id: job.event.event_id,
      name:     job.name.clone(),
      attempts: 0,
      error:    reason.to_string(),
    });
  }
}
