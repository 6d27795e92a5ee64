use super::ui;
use crate::core::config::AppConfig;
use crate::core::model::{Owner, TrackingStatus};
use crate::core::repository::HistoryStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::Cell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerStatus {
    pub owner: Owner,
    pub samples: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub tracked_since: Option<DateTime<Utc>>,
    pub last_sync: Option<DateTime<Utc>>,
    pub status: Option<TrackingStatus>,
}

/// Status of every configured or tracked owner, in owner order.
pub async fn collect_status(
    store: &dyn HistoryStore,
    config: &AppConfig,
) -> Result<Vec<OwnerStatus>> {
    let tracked: BTreeMap<_, _> = store.tracked_owners().await?.into_iter().collect();
    let owners: BTreeSet<Owner> = config
        .owners()
        .into_iter()
        .chain(tracked.keys().cloned())
        .collect();

    let mut statuses = Vec::with_capacity(owners.len());
    for owner in owners {
        let samples = store.list_samples(&owner).await?;
        let tracking = tracked.get(&owner);
        statuses.push(OwnerStatus {
            samples: samples.len(),
            first: samples.first().map(|s| s.time),
            last: samples.last().map(|s| s.time),
            tracked_since: tracking.map(|t| t.start_time),
            last_sync: tracking.and_then(|t| t.last_update),
            status: tracking.map(|t| t.status),
            owner,
        });
    }
    Ok(statuses)
}

pub fn display_status(statuses: &[OwnerStatus]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Owner"),
        ui::header_cell("Samples"),
        ui::header_cell("First"),
        ui::header_cell("Last"),
        ui::header_cell("Tracked Since"),
        ui::header_cell("Last Sync"),
        ui::header_cell("Status"),
    ]);
    for status in statuses {
        table.add_row(vec![
            Cell::new(&status.owner),
            ui::count_cell(status.samples),
            ui::time_cell(status.first),
            ui::time_cell(status.last),
            ui::time_cell(status.tracked_since),
            ui::time_cell(status.last_sync),
            ui::tracking_status_cell(status.status),
        ]);
    }
    format!(
        "{}\n\n{}",
        ui::style_text("History", ui::StyleType::Title),
        table
    )
}

pub async fn run(store: &dyn HistoryStore, config: &AppConfig) -> Result<()> {
    let statuses = collect_status(store, config).await?;
    println!("{}", display_status(&statuses));
    Ok(())
}
