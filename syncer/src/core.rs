use std::fs::File;
use std::io::BufReader;

use anyhow::Context;
use config::load_config;
use config::shared::{SyncProfileConfig, SyncerConfig};
use postgres::db::connect_to_database;
use sqlx::PgPool;
use tablesync::error::{ErrorKind, SyncError, SyncResult};
use tablesync::orchestrator::{
    STATUS_CONFIG_ERROR, STATUS_CONNECTION_ERROR, STATUS_EXTRACT_ERROR, STATUS_OTHER_ERROR,
    STATUS_SUCCESS, SyncOrchestrator,
};
use tablesync::reader::read_csv_extract;
use tablesync::settings::SyncConfig;
use tablesync::store::postgres::PostgresSyncStore;
use tablesync::types::Extract;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cli::Args;

/// Loads and validates the configuration of the binary.
pub fn load_syncer_config() -> anyhow::Result<SyncerConfig> {
    let syncer_config: SyncerConfig =
        load_config().context("failed to load the syncer configuration")?;
    syncer_config
        .validate()
        .context("the syncer configuration is invalid")?;

    Ok(syncer_config)
}

/// Runs the selected profiles and returns the highest status any of them reported.
pub async fn start_syncer(syncer_config: SyncerConfig, args: Args) -> i32 {
    let profiles: Vec<SyncProfileConfig> = syncer_config
        .selected_profiles(&args.profiles)
        .cloned()
        .collect();
    if profiles.is_empty() {
        error!(selected = ?args.profiles, "no configured profile was selected");
        return STATUS_CONFIG_ERROR;
    }
    for name in &args.profiles {
        if !profiles.iter().any(|profile| &profile.name == name) {
            warn!(profile = %name, "selected profile is not configured");
        }
    }

    if args.check {
        return check_profiles(profiles).await;
    }

    let pool = match connect_to_database(&syncer_config.database).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(
                host = %syncer_config.database.host,
                database = %syncer_config.database.name,
                error = %err,
                "failed to connect to the database"
            );
            return STATUS_CONNECTION_ERROR;
        }
    };

    info!(profiles = profiles.len(), "starting sync runs");
    let mut tasks = JoinSet::new();
    for profile in profiles {
        tasks.spawn(sync_profile(pool.clone(), profile));
    }

    let status = collect_statuses(&mut tasks).await;
    pool.close().await;

    status
}

async fn collect_statuses(tasks: &mut JoinSet<i32>) -> i32 {
    let mut status = STATUS_SUCCESS;
    while let Some(result) = tasks.join_next().await {
        let task_status = match result {
            Ok(task_status) => task_status,
            Err(err) => {
                error!(error = %err, "sync task did not complete");
                STATUS_OTHER_ERROR
            }
        };
        status = status.max(task_status);
    }

    status
}

async fn sync_profile(pool: PgPool, profile: SyncProfileConfig) -> i32 {
    let config = match SyncConfig::from_profile(&profile) {
        Ok(config) => config,
        Err(err) => {
            error!(profile = %profile.name, error = %err, "profile is invalid");
            return STATUS_CONFIG_ERROR;
        }
    };

    let extract = match read_extract(profile).await {
        Ok(extract) => extract,
        Err(err) => {
            error!(profile = %config.profile, error = %err, "failed to read the extract");
            return extract_status(&err);
        }
    };

    let orchestrator = SyncOrchestrator::new(PostgresSyncStore::new(pool), config);
    orchestrator.run(&extract).await.status_code()
}

async fn check_profiles(profiles: Vec<SyncProfileConfig>) -> i32 {
    let mut status = STATUS_SUCCESS;
    for profile in profiles {
        let name = profile.name.clone();
        if let Err(err) = SyncConfig::from_profile(&profile) {
            error!(profile = %name, error = %err, "profile is invalid");
            status = status.max(STATUS_CONFIG_ERROR);
            continue;
        }

        match read_extract(profile).await {
            Ok(extract) => info!(
                profile = %name,
                columns = ?extract.column_names(),
                rows = extract.len(),
                dropped_rows = extract.dropped_rows(),
                "extract is readable"
            ),
            Err(err) => {
                error!(profile = %name, error = %err, "failed to read the extract");
                status = status.max(extract_status(&err));
            }
        }
    }

    status
}

/// Reads the profile's extract file on the blocking pool.
async fn read_extract(profile: SyncProfileConfig) -> SyncResult<Extract> {
    let path = profile.source.path.clone();
    let extract = tokio::task::spawn_blocking(move || -> SyncResult<Extract> {
        let file = File::open(&profile.source.path)?;
        read_csv_extract(BufReader::new(file), &profile.naming, &profile.column_types)
    })
    .await
    .map_err(|err| {
        tablesync::sync_error!(
            ErrorKind::Unknown,
            "Extract reader task failed",
            err
        )
    })?;

    extract.map_err(|err| err.with_context(path.display()))
}

fn extract_status(err: &SyncError) -> i32 {
    if err.kind().is_config_error() {
        STATUS_CONFIG_ERROR
    } else if err.kind() == ErrorKind::Unknown {
        STATUS_OTHER_ERROR
    } else {
        STATUS_EXTRACT_ERROR
    }
}
