//! Logging setup shared by the sync binaries and their tests.

pub mod tracing;
