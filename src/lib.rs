pub mod cli;
pub mod core;
pub mod jobs;
pub mod providers;
pub mod store;

use crate::cli::record::RecordRequest;
use crate::core::config::AppConfig;
use crate::core::quote::QuoteSource;
use crate::core::repository::HistoryStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitsCommand {
    List,
    Detect,
    Adjust,
    Rollback { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Sync,
    Compact,
    Splits(SplitsCommand),
    Record(RecordRequest),
    Status,
    Daemon,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("xmf-history starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store: Arc<dyn HistoryStore> = Arc::new(store::open(&config)?);
    let base_url = config
        .providers
        .yahoo
        .as_ref()
        .map_or("https://query1.finance.yahoo.com", |p| &p.base_url);
    let source: Arc<dyn QuoteSource> =
        Arc::new(providers::YahooQuoteSource::new(base_url)?);

    match command {
        AppCommand::Sync => cli::sync::run(store.as_ref(), source.as_ref(), &config).await,
        AppCommand::Compact => cli::compact::run(store.as_ref()).await,
        AppCommand::Splits(SplitsCommand::List) => cli::splits::list(store.as_ref()).await,
        AppCommand::Splits(SplitsCommand::Detect) => {
            cli::splits::detect(store.as_ref(), source.as_ref(), &config).await
        }
        AppCommand::Splits(SplitsCommand::Adjust) => cli::splits::adjust(store.as_ref()).await,
        AppCommand::Splits(SplitsCommand::Rollback { id }) => {
            cli::splits::rollback(store.as_ref(), id).await
        }
        AppCommand::Record(request) => cli::record::run(store.as_ref(), &config, request).await,
        AppCommand::Status => cli::status::run(store.as_ref(), &config).await,
        AppCommand::Daemon => cli::daemon::run(store, source, config).await,
    }
}
