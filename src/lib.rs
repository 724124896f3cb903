pub mod catalog;
pub mod cli;
pub mod core;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod sync;

use crate::catalog::Catalog;
use crate::core::clock::SystemClock;
use crate::core::config::AppConfig;
use crate::core::repository::Repositories;
use crate::core::store::Store;
use crate::providers::rate_api::RateApiClient;
use crate::store::KeyValueStore;
use crate::sync::RateSync;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

pub enum AppCommand {
    /// Run the scheduled job once.
    Run,
    /// Manual connection test for one source.
    Test { name: String },
    /// Run the daily scheduler until interrupted.
    Serve,
    Sources,
    Rates { currency: Option<String> },
}

/// Opens the store, applies the catalog and wires the rate service.
pub async fn open_service(config: &AppConfig) -> Result<(Arc<KeyValueStore>, Arc<RateSync>)> {
    let data_path = config.default_data_path()?;
    let db_path = data_path.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("Failed to create data directory: {}", db_path.display()))?;
    let store = Arc::new(
        KeyValueStore::open(&db_path)
            .with_context(|| format!("Failed to open store at {}", db_path.display()))?,
    );

    let repos = Arc::new(Repositories::open(store.as_ref())?);
    Catalog::new(&repos)
        .apply(config)
        .await
        .context("Failed to apply configured catalog")?;

    let client = RateApiClient::new(&config.http)?;
    let service = RateSync::new(repos, client, Arc::new(SystemClock), config.strict);
    Ok((store, Arc::new(service)))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("ratesync starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!(sources = config.sources.len(), "Loaded config");

    let (store, service) = open_service(&config).await?;

    let result = match command {
        AppCommand::Run => cli::sync::run(&service).await,
        AppCommand::Test { name } => cli::sync::test(&service, &name).await,
        AppCommand::Serve => cli::sync::serve(service.clone(), &config.schedule).await,
        AppCommand::Sources => cli::rates::show_sources(service.repos()).await,
        AppCommand::Rates { currency } => {
            cli::rates::show_rates(service.repos(), currency.as_deref())
                .await
        }
    };

    finish(result, store.flush().context("Failed to flush store"))
}

/// The command's own error wins over a failed flush, which is logged instead.
fn finish(result: Result<()>, flushed: Result<()>) -> Result<()> {
    match (result, flushed) {
        (Ok(()), flushed) => flushed,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(flush_err)) => {
            error!(error = %flush_err, "Store flush failed after command error");
            Err(e)
        }
    }
}
