//! SQLite backend for the Silo data pod.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. One [`SqliteStore`] type
//! implements the event log, every projection repository, the membership
//! and rules lookups, and the executor step memo.

mod encode;
mod projections;
mod read;
mod schema;
mod store;

pub use store::SqliteStore;

#[cfg(test)]
mod tests;
