//! The write side of the Silo data pod: the command emission gateway, the
//! at-least-once task queue, the per-family executors, and the global
//! validator.
//!
//! Data flow: client intent → [`CommandGateway`] → append to the event log →
//! dispatch onto the queue → (standard path) [`GlobalValidator`] re-emits a
//! `validated` twin, or (fast path) the family executor consumes directly →
//! projection repository mutates and appends a `completed` audit event.

pub mod executor;
pub mod gateway;
pub mod queue;
pub mod validator;

pub use executor::Executors;
pub use gateway::{CommandGateway, ValidatedRelease};
pub use queue::{DeadLetter, DeadLetters, DispatchConfig, QueueHandle, QueueWorker, queue};
pub use validator::GlobalValidator;
