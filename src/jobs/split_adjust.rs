//! Applies pending split transitions to stored prices and transactions.
//!
//! Each split is handled on its own: its rewrites and its new status go out in
//! one change set, so a crash never leaves history half adjusted.

use crate::core::error::HistoryError;
use crate::core::repository::{ChangeSet, HistoryStore};
use crate::core::split::{Split, SplitCommand, SplitStatus, apply_command};
use anyhow::Result;
use tracing::{info, instrument, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdjustReport {
    pub processed: usize,
    pub rolled_back: usize,
    pub failed: usize,
    pub samples_rewritten: usize,
    pub transactions_rewritten: usize,
}

/// Moves every not-processed split to processed and every rollback-requested
/// split to rolled back, oldest split first.
pub async fn adjust_splits(store: &dyn HistoryStore) -> Result<AdjustReport> {
    let mut pending: Vec<Split> = store
        .list_splits()
        .await?
        .into_iter()
        .filter(|s| {
            matches!(
                s.status,
                SplitStatus::NotProcessed | SplitStatus::RollbackRequested
            )
        })
        .collect();
    pending.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));

    let mut report = AdjustReport::default();
    for split in pending {
        let id = split.id;
        let was = split.status;
        match adjust_split(store, split).await {
            Ok((samples, transactions)) => {
                report.samples_rewritten += samples;
                report.transactions_rewritten += transactions;
                match was {
                    SplitStatus::NotProcessed => report.processed += 1,
                    _ => report.rolled_back += 1,
                }
            }
            Err(e) => {
                warn!(split = id, error = %e, "Split adjustment failed");
                report.failed += 1;
            }
        }
    }

    info!(
        processed = report.processed,
        rolled_back = report.rolled_back,
        failed = report.failed,
        samples = report.samples_rewritten,
        transactions = report.transactions_rewritten,
        "Split adjustment finished"
    );
    Ok(report)
}

/// Runs the transition due for `split` and commits its rewrites together with
/// the new status. Returns the number of samples and transactions rewritten.
#[instrument(skip(store, split), fields(split = split.id, owner = %split.owner))]
async fn adjust_split(store: &dyn HistoryStore, mut split: Split) -> Result<(usize, usize)> {
    let commands = match split.status {
        SplitStatus::NotProcessed => split.mark_as_processed()?,
        _ => split.mark_as_rolled_back()?,
    };

    let samples = store.list_samples(&split.owner).await?;
    let transactions = store.list_transactions(&split.owner).await?;

    let mut changes = ChangeSet::new();
    let (mut sample_count, mut tx_count) = (0, 0);
    for command in commands {
        for sample in apply_command(&samples, &split, command) {
            changes.update_sample(&split.owner, sample);
            sample_count += 1;
        }
        for tx in apply_command(&transactions, &split, command) {
            changes.update_transaction(&split.owner, tx);
            tx_count += 1;
        }
        let verb = match command {
            SplitCommand::RewriteForward => "Adjusted",
            SplitCommand::RewriteRollback => "Restored",
        };
        info!(
            ratio = %split.ratio,
            samples = sample_count,
            transactions = tx_count,
            "{verb} history for split"
        );
    }

    changes.put_split(split);
    store.commit(changes).await?;
    Ok((sample_count, tx_count))
}

/// Requests a rollback of split `id`. A split that was never applied is
/// rolled back immediately; an applied one is restored by the next
/// [`adjust_splits`] run.
pub async fn request_rollback(store: &dyn HistoryStore, id: u64) -> Result<Split> {
    let mut split = store
        .get_split(id)
        .await?
        .ok_or(HistoryError::UnknownSplit(id))?;
    let commands = split.rollback()?;
    debug_assert!(commands.is_empty());

    let mut changes = ChangeSet::new();
    changes.put_split(split.clone());
    store.commit(changes).await?;
    info!(split = id, status = %split.status, "Rollback requested");
    Ok(split)
}
