use crate::core::config::AppConfig;
use crate::core::quote::QuoteSource;
use crate::core::repository::HistoryStore;
use crate::jobs::scheduler::run_daemon;
use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

/// Runs all jobs on their schedules until Ctrl-C.
pub async fn run(
    store: Arc<dyn HistoryStore>,
    source: Arc<dyn QuoteSource>,
    config: AppConfig,
) -> Result<()> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    run_daemon(store, source, Arc::new(config), shutdown).await
}
