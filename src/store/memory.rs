use crate::core::model::{Owner, Sample, Stored, TrackingInfo, Transaction};
use crate::core::repository::{
    ChangeSet, SampleRepository, SplitRepository, TrackingRepository, TransactionRepository,
    UnitOfWork,
};
use crate::core::split::Split;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct State {
    samples: BTreeMap<Owner, BTreeMap<DateTime<Utc>, Stored<Sample>>>,
    transactions: BTreeMap<Owner, BTreeMap<u64, Stored<Transaction>>>,
    splits: BTreeMap<u64, Split>,
    tracking: BTreeMap<Owner, TrackingInfo>,
    next_id: u64,
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn apply(&mut self, changes: ChangeSet) {
        for (owner, sample) in changes.upsert_samples {
            let existing = self
                .samples
                .get(&owner)
                .and_then(|series| series.get(&sample.time))
                .map(|s| s.id);
            let id = existing.unwrap_or_else(|| self.allocate_id());
            self.samples
                .entry(owner)
                .or_default()
                .insert(sample.time, Stored { id, record: sample });
        }

        for (owner, sample) in changes.update_samples {
            if let Some(slot) = self
                .samples
                .get_mut(&owner)
                .and_then(|series| series.get_mut(&sample.time))
                .filter(|slot| slot.id == sample.id)
            {
                *slot = sample;
            } else {
                debug!(%owner, id = sample.id, "Update for unknown sample ignored");
            }
        }

        for (owner, sample) in changes.delete_samples {
            if let Some(series) = self.samples.get_mut(&owner) {
                if series.get(&sample.time).is_some_and(|s| s.id == sample.id) {
                    series.remove(&sample.time);
                }
            }
        }

        for (owner, tx) in changes.add_transactions {
            let id = self.allocate_id();
            self.transactions
                .entry(owner)
                .or_default()
                .insert(id, Stored { id, record: tx });
        }

        for (owner, tx) in changes.update_transactions {
            if let Some(slot) = self
                .transactions
                .get_mut(&owner)
                .and_then(|txs| txs.get_mut(&tx.id))
            {
                *slot = tx;
            } else {
                debug!(%owner, id = tx.id, "Update for unknown transaction ignored");
            }
        }

        for new_split in changes.add_splits {
            let id = self.allocate_id();
            self.splits.insert(
                id,
                Split::new(
                    id,
                    new_split.owner,
                    new_split.time,
                    new_split.ratio,
                    new_split.detected_at,
                ),
            );
        }

        for split in changes.put_splits {
            self.splits.insert(split.id, split);
        }

        for (owner, change) in changes.tracking {
            match change.apply(self.tracking.remove(&owner)) {
                Some(info) => {
                    self.tracking.insert(owner, info);
                }
                None => debug!(%owner, "Tracking change ignored for untracked owner"),
            }
        }
    }
}

/// Store kept entirely in memory. Commits are applied under a single lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SampleRepository for MemoryStore {
    async fn list_samples(&self, owner: &Owner) -> Result<Vec<Stored<Sample>>> {
        let state = self.inner.lock().await;
        Ok(state
            .samples
            .get(owner)
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn list_transactions(&self, instrument: &Owner) -> Result<Vec<Stored<Transaction>>> {
        let state = self.inner.lock().await;
        let mut txs: Vec<_> = state
            .transactions
            .get(instrument)
            .map(|txs| txs.values().cloned().collect())
            .unwrap_or_default();
        txs.sort_by(|a: &Stored<Transaction>, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
        Ok(txs)
    }
}

#[async_trait]
impl SplitRepository for MemoryStore {
    async fn list_splits(&self) -> Result<Vec<Split>> {
        let state = self.inner.lock().await;
        Ok(state.splits.values().cloned().collect())
    }
}

#[async_trait]
impl TrackingRepository for MemoryStore {
    async fn tracking(&self, owner: &Owner) -> Result<Option<TrackingInfo>> {
        let state = self.inner.lock().await;
        Ok(state.tracking.get(owner).cloned())
    }

    async fn tracked_owners(&self) -> Result<Vec<(Owner, TrackingInfo)>> {
        let state = self.inner.lock().await;
        Ok(state
            .tracking
            .iter()
            .map(|(o, t)| (o.clone(), t.clone()))
            .collect())
    }
}

#[async_trait]
impl UnitOfWork for MemoryStore {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let count = changes.len();
        let mut state = self.inner.lock().await;
        state.apply(changes);
        debug!(changes = count, "Committed change set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::repository::NewSplit;
    use crate::core::split::{SplitRatio, SplitStatus};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity_by_time() {
        let store = MemoryStore::new();
        let owner = Owner::instrument("AAPL", "USD");

        let mut changes = ChangeSet::new();
        changes
            .upsert_sample(&owner, Sample::new(t(2), dec!(11), t(2)).unwrap())
            .upsert_sample(&owner, Sample::new(t(1), dec!(10), t(1)).unwrap());
        store.commit(changes).await.unwrap();

        let samples = store.list_samples(&owner).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].time, t(1));
        let id = samples[1].id;

        let mut changes = ChangeSet::new();
        changes.upsert_sample(&owner, Sample::new(t(2), dec!(12), t(3)).unwrap());
        store.commit(changes).await.unwrap();

        let samples = store.list_samples(&owner).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].id, id);
        assert_eq!(samples[1].value, dec!(12));
    }

    #[tokio::test]
    async fn test_delete_and_update_by_id() {
        let store = MemoryStore::new();
        let owner = Owner::exchange_rate("USD", "EUR");
        let mut changes = ChangeSet::new();
        for d in 0..3 {
            changes.upsert_sample(&owner, Sample::new(t(d), dec!(0.9), t(d)).unwrap());
        }
        store.commit(changes).await.unwrap();

        let samples = store.list_samples(&owner).await.unwrap();
        let mut changes = ChangeSet::new();
        changes.delete_sample(&owner, samples[1].clone());
        let mut updated = samples[2].clone();
        updated.record.value = dec!(0.95);
        changes.update_sample(&owner, updated);
        store.commit(changes).await.unwrap();

        let samples = store.list_samples(&owner).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value, dec!(0.95));
    }

    #[tokio::test]
    async fn test_stale_update_does_not_restore_deleted_sample() {
        let store = MemoryStore::new();
        let owner = Owner::instrument("AAPL", "USD");
        let mut changes = ChangeSet::new();
        changes.upsert_sample(&owner, Sample::new(t(1), dec!(10), t(1)).unwrap());
        store.commit(changes).await.unwrap();
        let snapshot = store.list_samples(&owner).await.unwrap().remove(0);

        let mut changes = ChangeSet::new();
        changes.delete_sample(&owner, snapshot.clone());
        store.commit(changes).await.unwrap();
        let mut changes = ChangeSet::new();
        changes.update_sample(&owner, snapshot);
        store.commit(changes).await.unwrap();

        assert!(store.list_samples(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_splits_and_tracking() {
        let store = MemoryStore::new();
        let owner = Owner::instrument("NVDA", "USD");
        let mut changes = ChangeSet::new();
        changes
            .add_split(NewSplit {
                owner: owner.clone(),
                time: t(5),
                ratio: SplitRatio::new(10, 1).unwrap(),
                detected_at: t(6),
            })
            .set_tracking_from(&owner, t(0))
            .update_last_sync(&owner, t(6));
        store.commit(changes).await.unwrap();

        let pending = store
            .splits_with_status(SplitStatus::NotProcessed)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert!(store.get_split(pending[0].id).await.unwrap().is_some());

        let tracking = store.tracking(&owner).await.unwrap().unwrap();
        assert_eq!(tracking.start_time, t(0));
        assert_eq!(tracking.last_update, Some(t(6)));
        assert_eq!(store.tracked_owners().await.unwrap().len(), 1);
    }
}
