use super::ui;
use crate::core::repository::HistoryStore;
use crate::jobs::{CompactionReport, compact_all};
use anyhow::Result;
use chrono::Utc;

pub fn display_report(report: &CompactionReport) -> String {
    ui::report_table(
        "Compaction",
        &[
            ("Owners", report.owners),
            ("Owners failed", report.failed_owners),
            ("Samples deleted", report.deleted),
        ],
    )
}

pub async fn run(store: &dyn HistoryStore) -> Result<()> {
    let report = compact_all(store, Utc::now()).await?;
    println!("{}", display_report(&report));
    Ok(())
}
