use crate::core::model::{Owner, TrackingInfo};
use crate::core::quote::QuoteSource;
use crate::core::repository::{ChangeSet, HistoryStore, NewSplit};
use crate::core::split::RatioOrientation;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetectReport {
    pub instruments: usize,
    pub failed: usize,
    pub detected: usize,
    /// Known, malformed or trivial splits that were not stored.
    pub ignored: usize,
}

/// Asks the provider for splits of every tracked instrument over its tracking
/// window and stores the new ones as not processed.
pub async fn detect_splits(
    store: &dyn HistoryStore,
    source: &dyn QuoteSource,
    orientation: RatioOrientation,
    now: DateTime<Utc>,
) -> Result<DetectReport> {
    let instruments: Vec<(Owner, TrackingInfo)> = store
        .tracked_owners()
        .await?
        .into_iter()
        .filter(|(owner, _)| matches!(owner, Owner::Instrument { .. }))
        .collect();
    let known = store.list_splits().await?;

    let mut report = DetectReport {
        instruments: instruments.len(),
        ..Default::default()
    };

    for (owner, tracking) in instruments {
        let seen: HashSet<DateTime<Utc>> = known
            .iter()
            .filter(|s| s.owner == owner)
            .map(|s| s.time)
            .collect();
        match detect_for_owner(store, source, &owner, &tracking, seen, orientation, now).await {
            Ok((detected, ignored)) => {
                report.detected += detected;
                report.ignored += ignored;
            }
            Err(e) => {
                warn!(owner = %owner, error = %e, "Split detection failed");
                report.failed += 1;
            }
        }
    }

    info!(
        instruments = report.instruments,
        detected = report.detected,
        ignored = report.ignored,
        failed = report.failed,
        "Split detection finished"
    );
    Ok(report)
}

#[instrument(skip(store, source, tracking, seen), fields(owner = %owner))]
async fn detect_for_owner(
    store: &dyn HistoryStore,
    source: &dyn QuoteSource,
    owner: &Owner,
    tracking: &TrackingInfo,
    mut seen: HashSet<DateTime<Utc>>,
    orientation: RatioOrientation,
    now: DateTime<Utc>,
) -> Result<(usize, usize)> {
    let Owner::Instrument { symbol, .. } = owner else {
        return Ok((0, 0));
    };

    let events = source.fetch_splits(symbol, tracking.start_time, now).await?;
    let mut changes = ChangeSet::new();
    let mut ignored = 0;

    for event in events {
        if !seen.insert(event.time) {
            debug!(time = %event.time, "Split already known");
            ignored += 1;
            continue;
        }
        let ratio = match orientation.to_ratio(event.numerator, event.denominator) {
            Ok(ratio) if !ratio.is_trivial() => ratio,
            Ok(ratio) => {
                debug!(%ratio, "Ignoring trivial split");
                ignored += 1;
                continue;
            }
            Err(e) => {
                debug!(error = %e, "Ignoring malformed split");
                ignored += 1;
                continue;
            }
        };
        info!(time = %event.time, %ratio, "Detected split");
        changes.add_split(NewSplit {
            owner: owner.clone(),
            time: event.time,
            ratio,
            detected_at: now,
        });
    }

    let detected = changes.len();
    if !changes.is_empty() {
        store.commit(changes).await?;
    }
    Ok((detected, ignored))
}
