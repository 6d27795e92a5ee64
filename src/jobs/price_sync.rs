//! Backfills and tops up price and exchange-rate history.
//!
//! Per owner: work out the tracking floor, find what is missing, fetch each
//! missing piece from the endpoint matching its age, carry values forward onto
//! the policy grid and write the result in bounded chunks.

use crate::core::config::{AppConfig, HistoryConfig};
use crate::core::fill::fill_range;
use crate::core::interval::{SampleInterval, TimeRange, align_down};
use crate::core::missing::missing_ranges;
use crate::core::model::{Owner, Sample, TrackingStatus, data_epoch};
use crate::core::quote::{Quote, QuoteSource};
use crate::core::repository::{ChangeSet, HistoryStore};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// An owner to keep in sync, with the configured backfill start if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub owner: Owner,
    pub track_from: Option<DateTime<Utc>>,
}

impl SyncTarget {
    /// Every instrument held in a portfolio and every exchange rate needed to
    /// convert them to the base currency. A rate inherits the earliest
    /// `track_from` of the holdings quoted in its currency.
    pub fn from_config(config: &AppConfig) -> Vec<SyncTarget> {
        let instruments = config.instruments();
        let mut targets: Vec<SyncTarget> = instruments
            .iter()
            .map(|(owner, track_from)| SyncTarget {
                owner: owner.clone(),
                track_from: *track_from,
            })
            .collect();

        for rate in config.exchange_rates() {
            let Owner::ExchangeRate { quote, .. } = &rate else {
                continue;
            };
            let track_from = instruments
                .iter()
                .filter(|(owner, _)| {
                    matches!(owner, Owner::Instrument { currency, .. } if currency == quote)
                })
                .filter_map(|(_, from)| *from)
                .min();
            targets.push(SyncTarget {
                owner: rate,
                track_from,
            });
        }
        targets
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OwnerSyncReport {
    pub ranges: usize,
    pub failed_ranges: usize,
    pub samples_written: usize,
    /// Tracking is disabled for the owner.
    pub skipped: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub owners: usize,
    pub failed_owners: usize,
    pub ranges: usize,
    pub failed_ranges: usize,
    pub samples_written: usize,
}

/// Syncs all `targets`, at most `settings.workers` owners at a time.
///
/// A failing owner is logged and counted; it never stops the others.
/// `on_done` is called as each owner finishes, with `None` on failure.
pub async fn sync_all<F>(
    store: &dyn HistoryStore,
    source: &dyn QuoteSource,
    targets: &[SyncTarget],
    settings: &HistoryConfig,
    now: DateTime<Utc>,
    mut on_done: F,
) -> SyncReport
where
    F: FnMut(&Owner, Option<&OwnerSyncReport>),
{
    let mut report = SyncReport {
        owners: targets.len(),
        ..Default::default()
    };

    let mut jobs = Vec::with_capacity(targets.len());
    for target in targets {
        jobs.push(async move {
            let result = sync_owner(store, source, target, settings, now).await;
            (target, result)
        });
    }
    let mut results = stream::iter(jobs).buffer_unordered(settings.workers.max(1));

    while let Some((target, result)) = results.next().await {
        match result {
            Ok(owner_report) => {
                report.ranges += owner_report.ranges;
                report.failed_ranges += owner_report.failed_ranges;
                report.samples_written += owner_report.samples_written;
                on_done(&target.owner, Some(&owner_report));
            }
            Err(e) => {
                warn!(owner = %target.owner, error = %e, "Sync failed");
                report.failed_owners += 1;
                on_done(&target.owner, None);
            }
        }
    }

    info!(
        owners = report.owners,
        failed_owners = report.failed_owners,
        ranges = report.ranges,
        failed_ranges = report.failed_ranges,
        samples = report.samples_written,
        "Sync finished"
    );
    report
}

#[instrument(skip(store, source, settings), fields(owner = %target.owner))]
pub async fn sync_owner(
    store: &dyn HistoryStore,
    source: &dyn QuoteSource,
    target: &SyncTarget,
    settings: &HistoryConfig,
    now: DateTime<Utc>,
) -> Result<OwnerSyncReport> {
    let owner = &target.owner;
    let tracking = store.tracking(owner).await?;
    if tracking
        .as_ref()
        .is_some_and(|t| t.status == TrackingStatus::Disabled)
    {
        debug!("Tracking disabled, skipping");
        return Ok(OwnerSyncReport {
            skipped: true,
            ..Default::default()
        });
    }

    let tracked_start = tracking.as_ref().map(|t| t.start_time);
    let start = tracking_start(store, target, tracked_start, settings, now).await?;
    let floor = align_down(
        start.max(settings.data_start).max(data_epoch()),
        SampleInterval::OneDay,
    );

    let samples = store.list_samples(owner).await?;
    let times: Vec<DateTime<Utc>> = samples.iter().map(|s| s.time).collect();
    let mut known: BTreeMap<DateTime<Utc>, Decimal> =
        samples.iter().map(|s| (s.time, s.value)).collect();

    let policy = owner.policy();
    let end = align_down(now, SampleInterval::FINEST);
    let gaps = missing_ranges(&times, policy, floor, end);
    debug!(floor = %floor, gaps = gaps.len(), "Detected missing ranges");

    let chunk_size = settings.flush_chunk_size.max(1);
    let mut report = OwnerSyncReport::default();
    let mut pending = ChangeSet::new();

    for piece in gaps.iter().flat_map(|gap| gap.split_by_policy(policy, end)) {
        report.ranges += 1;
        let observed = match fetch_range(source, owner, &piece).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!(range = %piece, error = %e, "Fetch failed, range left for the next run");
                report.failed_ranges += 1;
                continue;
            }
        };

        let seed = known.range(..piece.from).next_back().map(|(_, v)| *v);
        let filled = fill_range(&observed, seed, policy, end, &piece, now);
        debug!(
            range = %piece,
            observed = observed.len(),
            filled = filled.len(),
            "Filled range"
        );

        for sample in filled {
            known.insert(sample.time, sample.value);
            pending.upsert_sample(owner, sample);
            report.samples_written += 1;
            if pending.len() >= chunk_size {
                store.commit(std::mem::take(&mut pending)).await?;
            }
        }
    }

    if let Owner::Instrument { symbol, currency } = owner {
        match source.fetch_latest_price(symbol, currency).await {
            Ok(Some(quote)) if quote.time >= floor && quote.time <= now => {
                match Sample::new(quote.time, quote.value, now) {
                    Ok(sample) => {
                        pending.upsert_sample(owner, sample);
                        report.samples_written += 1;
                    }
                    Err(e) => debug!(error = %e, "Dropping invalid latest price"),
                }
            }
            Ok(_) => debug!("No usable latest price"),
            Err(e) => warn!(error = %e, "Failed to fetch latest price"),
        }
    }

    match &tracking {
        None => {
            pending.set_tracking_from(owner, floor);
        }
        Some(info) if floor < align_down(info.start_time, SampleInterval::OneDay) => {
            pending.set_tracking_from(owner, floor);
        }
        Some(_) => {}
    }
    if report.failed_ranges == 0 {
        pending.update_last_sync(owner, now);
        if tracking
            .as_ref()
            .is_some_and(|t| t.status == TrackingStatus::Failing)
        {
            pending.set_tracking_status(owner, TrackingStatus::Active);
        }
    } else {
        pending.set_tracking_status(owner, TrackingStatus::Failing);
    }
    store.commit(pending).await?;

    debug!(
        ranges = report.ranges,
        failed = report.failed_ranges,
        samples = report.samples_written,
        "Owner synced"
    );
    Ok(report)
}

/// Earliest of the tracked start, the configured start and the first
/// transaction; the initial lookback when none of them is known.
async fn tracking_start(
    store: &dyn HistoryStore,
    target: &SyncTarget,
    tracked: Option<DateTime<Utc>>,
    settings: &HistoryConfig,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let first_transaction = match &target.owner {
        Owner::Instrument { .. } => store
            .list_transactions(&target.owner)
            .await?
            .iter()
            .map(|tx| tx.time)
            .min(),
        Owner::ExchangeRate { .. } => None,
    };

    Ok([tracked, target.track_from, first_transaction]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or_else(|| now - Duration::days(settings.initial_lookback_days)))
}

async fn fetch_range(
    source: &dyn QuoteSource,
    owner: &Owner,
    range: &TimeRange,
) -> Result<Vec<Quote>> {
    match owner {
        Owner::Instrument { symbol, currency } if range.interval.is_intraday() => {
            source
                .fetch_intraday_prices(symbol, currency, range.from, range.to, range.interval)
                .await
        }
        Owner::Instrument { symbol, currency } => {
            source
                .fetch_daily_prices(symbol, currency, range.from, range.to)
                .await
        }
        Owner::ExchangeRate { base, quote } => {
            let rates = source
                .fetch_daily_exchange_rates(base, std::slice::from_ref(quote), range.from, range.to)
                .await?;
            Ok(rates
                .into_iter()
                .filter_map(|r| {
                    r.rates.get(quote).map(|value| Quote {
                        time: r.time,
                        value: *value,
                    })
                })
                .collect())
        }
    }
}
