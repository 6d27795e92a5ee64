use super::ui;
use crate::core::config::AppConfig;
use crate::core::quote::QuoteSource;
use crate::core::repository::HistoryStore;
use crate::core::split::Split;
use crate::jobs::{adjust_splits, detect_splits, request_rollback};
use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, CellAlignment};

pub fn display_splits(splits: &[Split]) -> String {
    if splits.is_empty() {
        return ui::style_text("No splits recorded.", ui::StyleType::Subtle);
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Id"),
        ui::header_cell("Instrument"),
        ui::header_cell("Date"),
        ui::header_cell("Ratio"),
        ui::header_cell("Status"),
        ui::header_cell("Detected"),
    ]);
    for split in splits {
        table.add_row(vec![
            Cell::new(split.id).set_alignment(CellAlignment::Right),
            Cell::new(&split.owner),
            Cell::new(split.time.format("%Y-%m-%d")),
            Cell::new(split.ratio).set_alignment(CellAlignment::Right),
            ui::split_status_cell(split.status),
            Cell::new(ui::format_time(split.detected_at)),
        ]);
    }
    format!(
        "{}\n\n{}",
        ui::style_text("Splits", ui::StyleType::Title),
        table
    )
}

pub async fn list(store: &dyn HistoryStore) -> Result<()> {
    let mut splits = store.list_splits().await?;
    splits.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
    println!("{}", display_splits(&splits));
    Ok(())
}

pub async fn detect(
    store: &dyn HistoryStore,
    source: &dyn QuoteSource,
    config: &AppConfig,
) -> Result<()> {
    let report = detect_splits(store, source, config.history.split_ratio, Utc::now()).await?;
    println!(
        "{}",
        ui::report_table(
            "Split detection",
            &[
                ("Instruments", report.instruments),
                ("Instruments failed", report.failed),
                ("New splits", report.detected),
                ("Ignored", report.ignored),
            ],
        )
    );
    Ok(())
}

pub async fn adjust(store: &dyn HistoryStore) -> Result<()> {
    let report = adjust_splits(store).await?;
    println!(
        "{}",
        ui::report_table(
            "Split adjustment",
            &[
                ("Applied", report.processed),
                ("Rolled back", report.rolled_back),
                ("Failed", report.failed),
                ("Samples rewritten", report.samples_rewritten),
                ("Transactions rewritten", report.transactions_rewritten),
            ],
        )
    );
    Ok(())
}

pub async fn rollback(store: &dyn HistoryStore, id: u64) -> Result<()> {
    let split = request_rollback(store, id).await?;
    println!(
        "Split {} for {} is now {}",
        split.id,
        split.owner,
        ui::style_text(&split.status.to_string(), ui::StyleType::TotalLabel)
    );
    Ok(())
}
