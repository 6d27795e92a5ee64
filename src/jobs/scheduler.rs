//! Periodic runner for all jobs.

use crate::core::config::AppConfig;
use crate::core::quote::QuoteSource;
use crate::core::repository::HistoryStore;
use crate::jobs::price_sync::SyncTarget;
use crate::jobs::{JobKind, SingleFlight, adjust_splits, compact_all, detect_splits, sync_all};
use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Runs sync, compaction and split handling on their configured schedules
/// until `shutdown` resolves, then waits for running jobs to finish.
pub async fn run_daemon(
    store: Arc<dyn HistoryStore>,
    source: Arc<dyn QuoteSource>,
    config: Arc<AppConfig>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let schedule = &config.schedule;
    let period = |secs: u64| {
        let mut ticker = interval(Duration::from_secs(secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    };
    let mut sync_tick = period(schedule.sync_interval_secs);
    let mut compaction_tick = period(schedule.compaction_interval_secs);
    let mut split_tick = period(schedule.split_interval_secs);

    info!(
        sync_secs = schedule.sync_interval_secs,
        compaction_secs = schedule.compaction_interval_secs,
        split_secs = schedule.split_interval_secs,
        "Daemon started"
    );

    let flight = SingleFlight::new();
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = sync_tick.tick() => {
                launch(&mut tasks, &flight, JobKind::Sync, run_sync(store.clone(), source.clone(), config.clone()));
            }
            _ = compaction_tick.tick() => {
                launch(&mut tasks, &flight, JobKind::Compaction, run_compaction(store.clone()));
            }
            _ = split_tick.tick() => {
                launch(&mut tasks, &flight, JobKind::SplitDetect, run_split_detect(store.clone(), source.clone(), config.clone()));
                launch(&mut tasks, &flight, JobKind::SplitAdjust, run_split_adjust(store.clone()));
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Job task panicked");
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Job task panicked");
        }
    }
    info!("Daemon stopped");
    Ok(())
}

/// Spawns `job` unless a run of the same kind is still in flight.
fn launch<F>(tasks: &mut JoinSet<()>, flight: &SingleFlight, kind: JobKind, job: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let Some(guard) = flight.try_begin(kind) else {
        debug!(job = %kind, "Previous run still in progress, skipping");
        return;
    };
    tasks.spawn(async move {
        if let Err(e) = job.await {
            warn!(job = %guard.kind(), error = %e, "Job failed");
        }
        drop(guard);
    });
}

async fn run_sync(
    store: Arc<dyn HistoryStore>,
    source: Arc<dyn QuoteSource>,
    config: Arc<AppConfig>,
) -> Result<()> {
    let targets = SyncTarget::from_config(&config);
    sync_all(
        store.as_ref(),
        source.as_ref(),
        &targets,
        &config.history,
        Utc::now(),
        |_, _| {},
    )
    .await;
    Ok(())
}

async fn run_compaction(store: Arc<dyn HistoryStore>) -> Result<()> {
    compact_all(store.as_ref(), Utc::now()).await.map(|_| ())
}

async fn run_split_detect(
    store: Arc<dyn HistoryStore>,
    source: Arc<dyn QuoteSource>,
    config: Arc<AppConfig>,
) -> Result<()> {
    detect_splits(
        store.as_ref(),
        source.as_ref(),
        config.history.split_ratio,
        Utc::now(),
    )
    .await
    .map(|_| ())
}

async fn run_split_adjust(store: Arc<dyn HistoryStore>) -> Result<()> {
    adjust_splits(store.as_ref()).await.map(|_| ())
}
