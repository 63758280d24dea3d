//! Error taxonomy shared by every Silo crate.
//!
//! The dispatch layer keys its retry decision off [`Error::is_retryable`]:
//! only `Storage` failures are transient. Everything else is terminal and
//! must be surfaced, never retried.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input to event construction or policy evaluation.
  #[error("validation error: {0}")]
  Validation(String),

  /// Scoped row absent — wrong id and wrong tenant are deliberately
  /// indistinguishable.
  #[error("not found: {0}")]
  NotFound(String),

  /// Authenticated but insufficient role or ownership.
  #[error("forbidden: {0}")]
  Forbidden(String),

  /// No valid actor identity at all.
  #[error("unauthorized")]
  Unauthorized,

  /// Attempted to re-append an event id already present in the log.
  #[error("event {0} is already appended")]
  DuplicateEvent(Uuid),

  /// A projection row with this id already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// Event name not present in the closed registry.
  #[error("unknown event type: {0:?}")]
  UnknownEventType(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Transient infrastructure failure (connectivity, I/O).
  #[error("storage error: {0}")]
  Storage(String),
}

impl Error {
  /// Whether the dispatch layer should retry the failed unit of work.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::Storage(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
