//! Storage abstractions for sync runs.
//!
//! [`SyncStore`] is the seam between the engine and the database. `PostgresSyncStore` runs
//! every step against Postgres through a shared pool, `MemorySyncStore` keeps tables in memory
//! for tests.

mod base;
pub mod memory;
pub mod postgres;

pub use base::SyncStore;
