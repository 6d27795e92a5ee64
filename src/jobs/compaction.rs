use crate::core::model::Owner;
use crate::core::repository::{ChangeSet, HistoryStore};
use crate::core::retention::compaction_candidates;
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub owners: usize,
    pub failed_owners: usize,
    pub deleted: usize,
}

/// Thins every tracked owner's history down to its retention policy.
pub async fn compact_all(store: &dyn HistoryStore, now: DateTime<Utc>) -> Result<CompactionReport> {
    let owners = store.tracked_owners().await?;
    let mut report = CompactionReport {
        owners: owners.len(),
        ..Default::default()
    };

    for (owner, _) in owners {
        match compact_owner(store, &owner, now).await {
            Ok(deleted) => report.deleted += deleted,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Compaction failed");
                report.failed_owners += 1;
            }
        }
    }

    info!(
        owners = report.owners,
        deleted = report.deleted,
        failed = report.failed_owners,
        "Compaction finished"
    );
    Ok(report)
}

/// Deletes the samples of `owner` the retention policy no longer needs, in
/// one commit. Returns how many were deleted.
#[instrument(skip(store), fields(owner = %owner))]
pub async fn compact_owner(
    store: &dyn HistoryStore,
    owner: &Owner,
    now: DateTime<Utc>,
) -> Result<usize> {
    let samples = store.list_samples(owner).await?;
    let doomed = compaction_candidates(&samples, owner.policy(), now);
    if doomed.is_empty() {
        debug!(samples = samples.len(), "Nothing to compact");
        return Ok(0);
    }

    let mut changes = ChangeSet::new();
    for sample in samples.into_iter().filter(|s| doomed.contains(&s.id)) {
        changes.delete_sample(owner, sample);
    }
    let deleted = changes.len();
    store.commit(changes).await?;
    debug!(deleted, "Compacted samples");
    Ok(deleted)
}
