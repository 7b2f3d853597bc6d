//! Incremental synchronization of a full table extract into a Postgres table.
//!
//! Every run reconciles the extract's columns with the existing target and log tables, creates
//! them on first use, loads the extract into a staging relation next to the target and merges
//! it in one transaction. Each inserted, updated or deleted row is recorded in the log table.
//!
//! The entry point is [`orchestrator::SyncOrchestrator`], driven by a [`settings::SyncConfig`]
//! and a [`store::SyncStore`].

pub mod error;
mod macros;
pub mod merge;
pub mod naming;
pub mod orchestrator;
pub mod provision;
pub mod reader;
pub mod reconcile;
pub mod settings;
pub mod sql;
pub mod staging;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
