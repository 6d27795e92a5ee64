use super::ui;
use crate::core::config::AppConfig;
use crate::core::quote::QuoteSource;
use crate::core::repository::HistoryStore;
use crate::jobs::{SyncReport, SyncTarget, sync_all};
use anyhow::Result;
use chrono::Utc;

pub fn display_report(report: &SyncReport) -> String {
    ui::report_table(
        "Sync",
        &[
            ("Owners", report.owners),
            ("Owners failed", report.failed_owners),
            ("Ranges fetched", report.ranges - report.failed_ranges),
            ("Ranges failed", report.failed_ranges),
            ("Samples written", report.samples_written),
        ],
    )
}

pub async fn run(
    store: &dyn HistoryStore,
    source: &dyn QuoteSource,
    config: &AppConfig,
) -> Result<()> {
    let targets = SyncTarget::from_config(config);
    if targets.is_empty() {
        println!(
            "{}",
            ui::style_text("No holdings configured, nothing to sync.", ui::StyleType::Subtle)
        );
        return Ok(());
    }

    let pb = ui::new_progress_bar(targets.len() as u64);
    pb.set_message("Syncing history...");

    let report = sync_all(
        store,
        source,
        &targets,
        &config.history,
        Utc::now(),
        |owner, result| {
            if result.is_none() {
                pb.println(format!(
                    "{} {owner}",
                    ui::style_text("Failed:", ui::StyleType::Error)
                ));
            }
            pb.inc(1);
        },
    )
    .await;
    pb.finish_and_clear();

    println!("{}", display_report(&report));
    Ok(())
}
