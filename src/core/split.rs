//! Stock split lifecycle and the price/amount rewrite it drives.
//!
//! The lifecycle is a plain enum. Transitions never touch storage; they hand
//! back the rewrite the caller must commit together with the new status:
//!
//! ```text
//! NotProcessed --mark_as_processed--> Processed            [RewriteForward]
//! NotProcessed --rollback-----------> RolledBack
//! Processed    --rollback-----------> RollbackRequested
//! RollbackRequested --mark_as_rolled_back--> RolledBack    [RewriteRollback]
//! ```
//!
//! Which records a split touches is derived only from their immutable `time`
//! and `creation_time`, so forward and rollback always select the same set.

use crate::core::error::HistoryError;
use crate::core::model::{Owner, Sample, Stored, Transaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Share multiplier of a split, `numerator / denominator`. A 4-for-1 split is
/// `4:1`; a 1-for-10 reverse split is `1:10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRatio {
    numerator: u32,
    denominator: u32,
}

impl SplitRatio {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, HistoryError> {
        if numerator == 0 || denominator == 0 {
            return Err(HistoryError::InvalidRatio {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    pub fn factor(&self) -> Decimal {
        Decimal::from(self.numerator) / Decimal::from(self.denominator)
    }

    /// `n:n` ratios leave prices unchanged.
    pub fn is_trivial(&self) -> bool {
        self.numerator == self.denominator
    }

    fn divide(&self, value: Decimal) -> Decimal {
        (value * Decimal::from(self.denominator) / Decimal::from(self.numerator)).normalize()
    }

    fn multiply(&self, value: Decimal) -> Decimal {
        (value * Decimal::from(self.numerator) / Decimal::from(self.denominator)).normalize()
    }
}

impl Display for SplitRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.numerator, self.denominator)
    }
}

/// How a provider's `(numerator, denominator)` pair maps onto [`SplitRatio`].
///
/// Providers disagree on which side of the ratio is the post-split share
/// count, so this is configured rather than assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatioOrientation {
    /// Provider numerator is the post-split share count.
    #[default]
    Direct,
    /// Provider numerator is the pre-split share count.
    Swapped,
}

impl RatioOrientation {
    pub fn to_ratio(
        &self,
        provider_numerator: u32,
        provider_denominator: u32,
    ) -> Result<SplitRatio, HistoryError> {
        match self {
            RatioOrientation::Direct => SplitRatio::new(provider_numerator, provider_denominator),
            RatioOrientation::Swapped => SplitRatio::new(provider_denominator, provider_numerator),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitStatus {
    NotProcessed,
    Processed,
    RollbackRequested,
    RolledBack,
}

impl Display for SplitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SplitStatus::NotProcessed => "not processed",
                SplitStatus::Processed => "processed",
                SplitStatus::RollbackRequested => "rollback requested",
                SplitStatus::RolledBack => "rolled back",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitAction {
    MarkAsProcessed,
    Rollback,
    MarkAsRolledBack,
}

impl Display for SplitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SplitAction::MarkAsProcessed => "mark as processed",
                SplitAction::Rollback => "roll back",
                SplitAction::MarkAsRolledBack => "mark as rolled back",
            }
        )
    }
}

/// Side effect a transition asks the caller to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitCommand {
    RewriteForward,
    RewriteRollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: SplitStatus,
    pub commands: Vec<SplitCommand>,
}

impl SplitStatus {
    /// The state reached by `action`, or `None` if the action is not defined
    /// from this state.
    pub fn apply(self, action: SplitAction) -> Option<Transition> {
        use SplitAction::*;
        use SplitStatus::*;

        let (status, commands) = match (self, action) {
            (NotProcessed, MarkAsProcessed) => (Processed, vec![SplitCommand::RewriteForward]),
            (NotProcessed, Rollback) => (RolledBack, Vec::new()),
            (Processed, Rollback) => (RollbackRequested, Vec::new()),
            (RollbackRequested, MarkAsRolledBack) => {
                (RolledBack, vec![SplitCommand::RewriteRollback])
            }
            _ => return None,
        };
        Some(Transition { status, commands })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub id: u64,
    pub owner: Owner,
    pub time: DateTime<Utc>,
    pub ratio: SplitRatio,
    pub status: SplitStatus,
    pub detected_at: DateTime<Utc>,
}

impl Split {
    pub fn new(
        id: u64,
        owner: Owner,
        time: DateTime<Utc>,
        ratio: SplitRatio,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            time,
            ratio,
            status: SplitStatus::NotProcessed,
            detected_at,
        }
    }

    pub fn mark_as_processed(&mut self) -> Result<Vec<SplitCommand>, HistoryError> {
        self.transition(SplitAction::MarkAsProcessed)
    }

    pub fn rollback(&mut self) -> Result<Vec<SplitCommand>, HistoryError> {
        self.transition(SplitAction::Rollback)
    }

    pub fn mark_as_rolled_back(&mut self) -> Result<Vec<SplitCommand>, HistoryError> {
        self.transition(SplitAction::MarkAsRolledBack)
    }

    fn transition(&mut self, action: SplitAction) -> Result<Vec<SplitCommand>, HistoryError> {
        let transition =
            self.status
                .apply(action)
                .ok_or(HistoryError::InvalidTransition {
                    id: self.id,
                    from: self.status,
                    action,
                })?;
        self.status = transition.status;
        Ok(transition.commands)
    }

    /// Whether a record with these times predates the split on both clocks.
    /// Records entered after the split already carry post-split values.
    pub fn affects(&self, time: DateTime<Utc>, creation_time: DateTime<Utc>) -> bool {
        self.time > creation_time && self.time > time
    }
}

/// A persisted record whose price-like fields a split rewrites.
pub trait SplitAdjustable: Clone {
    fn time(&self) -> DateTime<Utc>;
    fn creation_time(&self) -> DateTime<Utc>;
    fn adjust_forward(&mut self, ratio: &SplitRatio);
    fn adjust_rollback(&mut self, ratio: &SplitRatio);
}

impl SplitAdjustable for Sample {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    fn adjust_forward(&mut self, ratio: &SplitRatio) {
        self.value = ratio.divide(self.value);
    }

    fn adjust_rollback(&mut self, ratio: &SplitRatio) {
        self.value = ratio.multiply(self.value);
    }
}

impl SplitAdjustable for Transaction {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    fn adjust_forward(&mut self, ratio: &SplitRatio) {
        self.amount = ratio.multiply(self.amount);
        self.price = ratio.divide(self.price);
    }

    fn adjust_rollback(&mut self, ratio: &SplitRatio) {
        self.amount = ratio.divide(self.amount);
        self.price = ratio.multiply(self.price);
    }
}

/// Rewritten copies of the records `split` affects.
pub fn adjust_for_split<T: SplitAdjustable>(records: &[Stored<T>], split: &Split) -> Vec<Stored<T>> {
    rewrite(records, split, |record| record.adjust_forward(&split.ratio))
}

/// Exact inverse of [`adjust_for_split`] over the same selection.
pub fn adjust_for_split_rollback<T: SplitAdjustable>(
    records: &[Stored<T>],
    split: &Split,
) -> Vec<Stored<T>> {
    rewrite(records, split, |record| record.adjust_rollback(&split.ratio))
}

/// Runs `command` over `records`.
pub fn apply_command<T: SplitAdjustable>(
    records: &[Stored<T>],
    split: &Split,
    command: SplitCommand,
) -> Vec<Stored<T>> {
    match command {
        SplitCommand::RewriteForward => adjust_for_split(records, split),
        SplitCommand::RewriteRollback => adjust_for_split_rollback(records, split),
    }
}

fn rewrite<T: SplitAdjustable>(
    records: &[Stored<T>],
    split: &Split,
    mut change: impl FnMut(&mut T),
) -> Vec<Stored<T>> {
    records
        .iter()
        .filter(|r| split.affects(r.record.time(), r.record.creation_time()))
        .map(|r| {
            let mut record = r.record.clone();
            change(&mut record);
            Stored { id: r.id, record }
        })
        .collect()
}
