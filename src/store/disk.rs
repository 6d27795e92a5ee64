use crate::core::model::{Owner, Sample, Stored, TrackingInfo, Transaction};
use crate::core::repository::{
    ChangeSet, SampleRepository, SplitRepository, TrackingRepository, TransactionRepository,
    UnitOfWork,
};
use crate::core::split::Split;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

const NEXT_ID_KEY: &[u8] = b"next_id";

#[derive(Serialize, Deserialize)]
struct TrackingRow {
    owner: Owner,
    info: TrackingInfo,
}

/// Prefix shared by every key belonging to `owner`. The trailing NUL keeps
/// `px/A/USD` from matching `px/AB/USD`.
fn owner_prefix(owner: &Owner) -> Vec<u8> {
    let mut key = owner.key().into_bytes();
    key.push(0);
    key
}

/// Big-endian with the sign bit flipped, so byte order matches time order.
fn time_bytes(time: DateTime<Utc>) -> [u8; 8] {
    ((time.timestamp_millis() as u64) ^ (1 << 63)).to_be_bytes()
}

fn sample_key(owner: &Owner, time: DateTime<Utc>) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(&time_bytes(time));
    key
}

fn transaction_key(owner: &Owner, id: u64) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).context("Failed to decode stored record")
}

/// Store persisted in a `fjall` keyspace, one partition per entity kind.
///
/// A [`ChangeSet`] is written as a single `fjall` batch, so a commit is
/// all-or-nothing. Commits are serialized by `write_lock`.
pub struct DiskStore {
    keyspace: Keyspace,
    samples: PartitionHandle,
    transactions: PartitionHandle,
    splits: PartitionHandle,
    tracking: PartitionHandle,
    meta: PartitionHandle,
    write_lock: Mutex<()>,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;

        let open = |name: &str| {
            keyspace
                .open_partition(name, PartitionCreateOptions::default())
                .with_context(|| format!("Failed to open partition {name}"))
        };
        let samples = open("samples")?;
        let transactions = open("transactions")?;
        let splits = open("splits")?;
        let tracking = open("tracking")?;
        let meta = open("meta")?;

        debug!("Opened store at {}", path.display());
        Ok(Self {
            keyspace,
            samples,
            transactions,
            splits,
            tracking,
            meta,
            write_lock: Mutex::new(()),
        })
    }

    fn next_id(&self) -> Result<u64> {
        Ok(match self.meta.get(NEXT_ID_KEY)? {
            Some(bytes) => {
                let bytes: &[u8] = &bytes;
                let raw: [u8; 8] = bytes.try_into().context("Corrupt id counter")?;
                u64::from_be_bytes(raw)
            }
            None => 1,
        })
    }

    /// Id of the sample under `key`, counting rows written earlier in the
    /// same batch.
    fn sample_id_at(&self, pending: &HashMap<Vec<u8>, u64>, key: &[u8]) -> Result<Option<u64>> {
        if let Some(id) = pending.get(key) {
            return Ok(Some(*id));
        }
        self.samples
            .get(key)?
            .map(|bytes| decode::<Stored<Sample>>(&bytes).map(|stored| stored.id))
            .transpose()
    }

    fn scan<T: DeserializeOwned>(
        partition: &PartitionHandle,
        prefix: Option<&[u8]>,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        match prefix {
            Some(prefix) => {
                for item in partition.prefix(prefix) {
                    let (_, value) = item?;
                    out.push(decode(&value)?);
                }
            }
            None => {
                for item in partition.iter() {
                    let (_, value) = item?;
                    out.push(decode(&value)?);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SampleRepository for DiskStore {
    async fn list_samples(&self, owner: &Owner) -> Result<Vec<Stored<Sample>>> {
        Self::scan(&self.samples, Some(&owner_prefix(owner)))
    }
}

#[async_trait]
impl TransactionRepository for DiskStore {
    async fn list_transactions(&self, instrument: &Owner) -> Result<Vec<Stored<Transaction>>> {
        let mut txs: Vec<Stored<Transaction>> =
            Self::scan(&self.transactions, Some(&owner_prefix(instrument)))?;
        txs.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
        Ok(txs)
    }
}

#[async_trait]
impl SplitRepository for DiskStore {
    async fn list_splits(&self) -> Result<Vec<Split>> {
        Self::scan(&self.splits, None)
    }

    async fn get_split(&self, id: u64) -> Result<Option<Split>> {
        self.splits
            .get(id.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

#[async_trait]
impl TrackingRepository for DiskStore {
    async fn tracking(&self, owner: &Owner) -> Result<Option<TrackingInfo>> {
        Ok(self
            .tracking
            .get(owner.key())?
            .map(|bytes| decode::<TrackingRow>(&bytes))
            .transpose()?
            .map(|row| row.info))
    }

    async fn tracked_owners(&self) -> Result<Vec<(Owner, TrackingInfo)>> {
        let rows: Vec<TrackingRow> = Self::scan(&self.tracking, None)?;
        Ok(rows.into_iter().map(|r| (r.owner, r.info)).collect())
    }
}

#[async_trait]
impl UnitOfWork for DiskStore {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let count = changes.len();
        let mut next_id = self.next_id()?;
        let mut allocate = || {
            let id = next_id;
            next_id += 1;
            id
        };

        let mut batch = self.keyspace.batch();
        // Ids handed out earlier in this batch, keyed by sample key
        let mut pending: HashMap<Vec<u8>, u64> = HashMap::new();

        for (owner, sample) in changes.upsert_samples {
            let key = sample_key(&owner, sample.time);
            let id = match self.sample_id_at(&pending, &key)? {
                Some(id) => id,
                None => allocate(),
            };
            pending.insert(key.clone(), id);
            batch.insert(
                &self.samples,
                key,
                serde_json::to_vec(&Stored { id, record: sample })?,
            );
        }

        // Updates and deletes only touch the row still holding the same id
        for (owner, sample) in changes.update_samples {
            let key = sample_key(&owner, sample.time);
            if self.sample_id_at(&pending, &key)? != Some(sample.id) {
                debug!(%owner, id = sample.id, "Update for unknown sample ignored");
                continue;
            }
            batch.insert(&self.samples, key, serde_json::to_vec(&sample)?);
        }

        for (owner, sample) in changes.delete_samples {
            let key = sample_key(&owner, sample.time);
            if self.sample_id_at(&pending, &key)? == Some(sample.id) {
                batch.remove(&self.samples, key);
            }
        }

        for (owner, tx) in changes.add_transactions {
            let id = allocate();
            batch.insert(
                &self.transactions,
                transaction_key(&owner, id),
                serde_json::to_vec(&Stored { id, record: tx })?,
            );
        }

        for (owner, tx) in changes.update_transactions {
            if !self.transactions.contains_key(transaction_key(&owner, tx.id))? {
                debug!(%owner, id = tx.id, "Update for unknown transaction ignored");
                continue;
            }
            batch.insert(
                &self.transactions,
                transaction_key(&owner, tx.id),
                serde_json::to_vec(&tx)?,
            );
        }

        for new_split in changes.add_splits {
            let id = allocate();
            let split = Split::new(
                id,
                new_split.owner,
                new_split.time,
                new_split.ratio,
                new_split.detected_at,
            );
            batch.insert(
                &self.splits,
                id.to_be_bytes().to_vec(),
                serde_json::to_vec(&split)?,
            );
        }

        for split in changes.put_splits {
            batch.insert(
                &self.splits,
                split.id.to_be_bytes().to_vec(),
                serde_json::to_vec(&split)?,
            );
        }

        // Several changes for one owner fold onto each other before writing
        let mut tracking: HashMap<Owner, Option<TrackingInfo>> = HashMap::new();
        for (owner, change) in changes.tracking {
            let current = match tracking.remove(&owner) {
                Some(current) => current,
                None => self.tracking(&owner).await?,
            };
            tracking.insert(owner, change.apply(current));
        }
        for (owner, info) in tracking {
            if let Some(info) = info {
                let key = owner.key().into_bytes();
                batch.insert(
                    &self.tracking,
                    key,
                    serde_json::to_vec(&TrackingRow { owner, info })?,
                );
            }
        }

        drop(allocate);
        batch.insert(&self.meta, NEXT_ID_KEY, next_id.to_be_bytes().to_vec());
        batch.commit().context("Failed to commit change set")?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to persist store")?;

        debug!(changes = count, "Committed change set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::TrackingStatus;
    use crate::core::repository::NewSplit;
    use crate::core::split::{SplitRatio, SplitStatus};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    #[test]
    fn test_time_keys_sort_chronologically() {
        let a = time_bytes(t(0));
        let b = time_bytes(t(0) + Duration::milliseconds(1));
        let c = time_bytes(t(400));
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_samples_round_trip_in_time_order() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let aapl = Owner::instrument("AAPL", "USD");
        let aap = Owner::instrument("AAP", "USD");

        let mut changes = ChangeSet::new();
        changes
            .upsert_sample(&aapl, Sample::new(t(3), dec!(3), t(3)).unwrap())
            .upsert_sample(&aapl, Sample::new(t(1), dec!(1), t(1)).unwrap())
            .upsert_sample(&aap, Sample::new(t(2), dec!(2), t(2)).unwrap());
        store.commit(changes).await.unwrap();

        let samples = store.list_samples(&aapl).await.unwrap();
        assert_eq!(
            samples.iter().map(|s| s.time).collect::<Vec<_>>(),
            vec![t(1), t(3)]
        );
        assert_eq!(store.list_samples(&aap).await.unwrap().len(), 1);

        // Upserting the same time keeps the id
        let id = samples[1].id;
        let mut changes = ChangeSet::new();
        changes.upsert_sample(&aapl, Sample::new(t(3), dec!(4), t(5)).unwrap());
        store.commit(changes).await.unwrap();
        let samples = store.list_samples(&aapl).await.unwrap();
        assert_eq!(samples[1].id, id);
        assert_eq!(samples[1].value, dec!(4));

        let mut changes = ChangeSet::new();
        changes.delete_sample(&aapl, samples[0].clone());
        store.commit(changes).await.unwrap();
        assert_eq!(store.list_samples(&aapl).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        let owner = Owner::instrument("MSFT", "USD");
        let first_id = {
            let store = DiskStore::open(dir.path()).unwrap();
            let mut changes = ChangeSet::new();
            changes.add_transaction(
                &owner,
                Transaction::new("Core", t(1), t(1), dec!(3), dec!(300)).unwrap(),
            );
            store.commit(changes).await.unwrap();
            store.list_transactions(&owner).await.unwrap()[0].id
        };

        let store = DiskStore::open(dir.path()).unwrap();
        let mut changes = ChangeSet::new();
        changes.add_transaction(
            &owner,
            Transaction::new("Core", t(0), t(2), dec!(1), dec!(290)).unwrap(),
        );
        store.commit(changes).await.unwrap();

        let txs = store.list_transactions(&owner).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].time, t(0));
        assert!(txs[0].id > first_id);
    }

    #[tokio::test]
    async fn test_stale_update_does_not_restore_deleted_sample() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let owner = Owner::instrument("AAPL", "USD");

        let mut changes = ChangeSet::new();
        changes.upsert_sample(&owner, Sample::new(t(1), dec!(10), t(1)).unwrap());
        store.commit(changes).await.unwrap();
        let snapshot = store.list_samples(&owner).await.unwrap().remove(0);

        let mut changes = ChangeSet::new();
        changes.delete_sample(&owner, snapshot.clone());
        store.commit(changes).await.unwrap();

        let mut halved = snapshot.clone();
        halved.record.value = dec!(5);
        let mut changes = ChangeSet::new();
        changes.update_sample(&owner, halved);
        store.commit(changes).await.unwrap();
        assert!(store.list_samples(&owner).await.unwrap().is_empty());

        // A new sample at the same time gets a new id; the old snapshot
        // neither updates nor deletes it
        let mut changes = ChangeSet::new();
        changes.upsert_sample(&owner, Sample::new(t(1), dec!(12), t(2)).unwrap());
        store.commit(changes).await.unwrap();
        let mut changes = ChangeSet::new();
        changes
            .update_sample(&owner, snapshot.clone())
            .delete_sample(&owner, snapshot.clone());
        store.commit(changes).await.unwrap();

        let samples = store.list_samples(&owner).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_ne!(samples[0].id, snapshot.id);
        assert_eq!(samples[0].value, dec!(12));
    }

    #[tokio::test]
    async fn test_update_for_unknown_transaction_is_ignored() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let owner = Owner::instrument("MSFT", "USD");

        let mut changes = ChangeSet::new();
        changes.update_transaction(
            &owner,
            Stored {
                id: 42,
                record: Transaction::new("Core", t(1), t(1), dec!(3), dec!(300)).unwrap(),
            },
        );
        store.commit(changes).await.unwrap();
        assert!(store.list_transactions(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_splits_and_tracking_persist() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let owner = Owner::instrument("NVDA", "USD");

        let mut changes = ChangeSet::new();
        changes
            .add_split(NewSplit {
                owner: owner.clone(),
                time: t(10),
                ratio: SplitRatio::new(4, 1).unwrap(),
                detected_at: t(11),
            })
            .set_tracking_from(&owner, t(0))
            .update_last_sync(&owner, t(11))
            .set_tracking_status(&owner, TrackingStatus::Failing);
        store.commit(changes).await.unwrap();

        let mut split = store.list_splits().await.unwrap().remove(0);
        assert_eq!(split.status, SplitStatus::NotProcessed);
        split.mark_as_processed().unwrap();
        let mut changes = ChangeSet::new();
        changes.put_split(split.clone());
        store.commit(changes).await.unwrap();

        let stored = store.get_split(split.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SplitStatus::Processed);

        let tracking = store.tracking(&owner).await.unwrap().unwrap();
        assert_eq!(tracking.start_time, t(0));
        assert_eq!(tracking.last_update, Some(t(11)));
        assert_eq!(tracking.status, TrackingStatus::Failing);
        assert_eq!(store.tracked_owners().await.unwrap()[0].0, owner);
    }
}
