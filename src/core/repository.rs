//! Persistence abstractions for samples, transactions, splits and tracking state

use crate::core::model::{Owner, Sample, Stored, TrackingInfo, TrackingStatus, Transaction};
use crate::core::split::{Split, SplitRatio, SplitStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait SampleRepository: Send + Sync {
    /// All samples for `owner`, ascending by time.
    async fn list_samples(&self, owner: &Owner) -> Result<Vec<Stored<Sample>>>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Transactions of every position holding `instrument`, across portfolios.
    async fn list_transactions(&self, instrument: &Owner) -> Result<Vec<Stored<Transaction>>>;
}

#[async_trait]
pub trait SplitRepository: Send + Sync {
    async fn list_splits(&self) -> Result<Vec<Split>>;

    async fn splits_with_status(&self, status: SplitStatus) -> Result<Vec<Split>> {
        Ok(self
            .list_splits()
            .await?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    async fn get_split(&self, id: u64) -> Result<Option<Split>> {
        Ok(self.list_splits().await?.into_iter().find(|s| s.id == id))
    }
}

#[async_trait]
pub trait TrackingRepository: Send + Sync {
    async fn tracking(&self, owner: &Owner) -> Result<Option<TrackingInfo>>;

    async fn tracked_owners(&self) -> Result<Vec<(Owner, TrackingInfo)>>;
}

/// Applies a [`ChangeSet`] atomically: either every change lands or none does.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

/// Everything a job needs from storage.
pub trait HistoryStore:
    SampleRepository + TransactionRepository + SplitRepository + TrackingRepository + UnitOfWork
{
}

impl<T> HistoryStore for T where
    T: SampleRepository + TransactionRepository + SplitRepository + TrackingRepository + UnitOfWork
{
}

/// A split that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSplit {
    pub owner: Owner,
    pub time: DateTime<Utc>,
    pub ratio: SplitRatio,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingChange {
    TrackFrom(DateTime<Utc>),
    LastSync(DateTime<Utc>),
    Status(TrackingStatus),
}

impl TrackingChange {
    /// Folds this change into the current tracking state. A status change on
    /// an owner that was never tracked is dropped.
    pub fn apply(self, current: Option<TrackingInfo>) -> Option<TrackingInfo> {
        match (self, current) {
            (TrackingChange::TrackFrom(t), None) => Some(TrackingInfo::starting_at(t)),
            (TrackingChange::TrackFrom(t), Some(mut info)) => {
                info.start_time = t;
                Some(info)
            }
            (TrackingChange::LastSync(t), current) => {
                let mut info = current.unwrap_or_else(|| TrackingInfo::starting_at(t));
                info.last_update = Some(t);
                Some(info)
            }
            (TrackingChange::Status(_), None) => None,
            (TrackingChange::Status(status), Some(mut info)) => {
                info.status = status;
                Some(info)
            }
        }
    }
}

/// Pending adds, updates and deletes committed as one unit.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    /// Insert or replace by (owner, time).
    pub upsert_samples: Vec<(Owner, Sample)>,
    pub update_samples: Vec<(Owner, Stored<Sample>)>,
    pub delete_samples: Vec<(Owner, Stored<Sample>)>,
    pub add_transactions: Vec<(Owner, Transaction)>,
    pub update_transactions: Vec<(Owner, Stored<Transaction>)>,
    pub add_splits: Vec<NewSplit>,
    pub put_splits: Vec<Split>,
    pub tracking: Vec<(Owner, TrackingChange)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_sample(&mut self, owner: &Owner, sample: Sample) -> &mut Self {
        self.upsert_samples.push((owner.clone(), sample));
        self
    }

    pub fn update_sample(&mut self, owner: &Owner, sample: Stored<Sample>) -> &mut Self {
        self.update_samples.push((owner.clone(), sample));
        self
    }

    pub fn delete_sample(&mut self, owner: &Owner, sample: Stored<Sample>) -> &mut Self {
        self.delete_samples.push((owner.clone(), sample));
        self
    }

    pub fn add_transaction(&mut self, instrument: &Owner, tx: Transaction) -> &mut Self {
        self.add_transactions.push((instrument.clone(), tx));
        self
    }

    pub fn update_transaction(&mut self, instrument: &Owner, tx: Stored<Transaction>) -> &mut Self {
        self.update_transactions.push((instrument.clone(), tx));
        self
    }

    pub fn add_split(&mut self, split: NewSplit) -> &mut Self {
        self.add_splits.push(split);
        self
    }

    pub fn put_split(&mut self, split: Split) -> &mut Self {
        self.put_splits.push(split);
        self
    }

    pub fn set_tracking_from(&mut self, owner: &Owner, time: DateTime<Utc>) -> &mut Self {
        self.tracking
            .push((owner.clone(), TrackingChange::TrackFrom(time)));
        self
    }

    pub fn update_last_sync(&mut self, owner: &Owner, time: DateTime<Utc>) -> &mut Self {
        self.tracking
            .push((owner.clone(), TrackingChange::LastSync(time)));
        self
    }

    pub fn set_tracking_status(&mut self, owner: &Owner, status: TrackingStatus) -> &mut Self {
        self.tracking
            .push((owner.clone(), TrackingChange::Status(status)));
        self
    }

    pub fn len(&self) -> usize {
        self.upsert_samples.len()
            + self.update_samples.len()
            + self.delete_samples.len()
            + self.add_transactions.len()
            + self.update_transactions.len()
            + self.add_splits.len()
            + self.put_splits.len()
            + self.tracking.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
