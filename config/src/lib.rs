//! Configuration types shared by the sync engine and the `syncer` binary.
//!
//! Holds the Postgres connection settings, the per-profile synchronization
//! settings and the layered loader that reads them from disk and environment.

pub mod environment;
pub mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from_dir};
