//! Parley application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML (`--write-config` saves it and exits)
//! 2. Initialize logging
//! 3. Open the SQLite database (migrations run on open)
//! 4. Start the axum API server with the echo generation source

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use parley_api::routes;
use parley_api::state::AppState;
use parley_core::config::ParleyConfig;
use parley_storage::Database;
use parley_stream::EchoSource;

use crate::cli::CliArgs;

/// Expand ~ to the home directory in a path string.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")), cli::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file)?;
    config.general.port = args.resolve_port(config.general.port);
    config.general.data_dir = args.resolve_data_dir(&config.general.data_dir);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);
    config.validate()?;

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), exists = config_file.exists(), "Configuration resolved");

    if args.write_config {
        config.save(&config_file)?;
        return Ok(());
    }

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(&config.storage.db_file);
    let db = Database::new(
        &db_path,
        Duration::from_millis(config.storage.busy_timeout_ms),
    )?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // Generation source. The echo source stands in for a language model client.
    let generation = Arc::new(EchoSource::new(Duration::from_millis(
        config.generation.fragment_delay_ms,
    )));

    let state = AppState::new(config.clone(), db, generation);

    // === API server ===
    if let Err(e) = routes::start_server(&config, state).await {
        tracing::error!(port = config.general.port, error = %e, "API server stopped");
        tracing::error!("Try: PARLEY_PORT={} parley", config.general.port.saturating_add(1));
        return Err(e.into());
    }

    Ok(())
}
