//! Table sync binary.
//!
//! Loads the configuration, initializes tracing and runs every selected profile concurrently
//! against the configured database. The process exits with the highest status reported by
//! any profile, `0` when all of them succeeded.

use std::process::ExitCode;

use clap::Parser;
use tablesync::orchestrator::{STATUS_CONFIG_ERROR, STATUS_OTHER_ERROR};
use telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::cli::Args;
use crate::core::{load_syncer_config, start_syncer};

mod cli;
mod core;

fn main() -> ExitCode {
    let args = Args::parse();

    let syncer_config = match load_syncer_config() {
        Ok(syncer_config) => syncer_config,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_code(STATUS_CONFIG_ERROR);
        }
    };

    let _log_flusher = match init_tracing(env!("CARGO_BIN_NAME")) {
        Ok(log_flusher) => log_flusher,
        Err(err) => {
            eprintln!("failed to initialize tracing: {err}");
            return exit_code(STATUS_OTHER_ERROR);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start the async runtime");
            return exit_code(STATUS_OTHER_ERROR);
        }
    };

    let status = runtime.block_on(start_syncer(syncer_config, args));
    info!(status, "syncer finished");

    exit_code(status)
}

fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(u8::try_from(status).unwrap_or(1))
}
