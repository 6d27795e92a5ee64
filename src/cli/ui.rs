use crate::core::model::TrackingStatus;
use crate::core::split::SplitStatus;
use chrono::{DateTime, Utc};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Defines different styles for text elements.
pub enum StyleType {
    Title,
    TotalLabel,
    Error,
    Subtle,
}

/// Applies a consistent style to a string.
pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Title => style(text).bold().underlined(),
        StyleType::TotalLabel => style(text).bold(),
        StyleType::Error => style(text).red(),
        StyleType::Subtle => style(text).dim(),
    };
    styled.to_string()
}

/// Creates a new `comfy_table::Table` with standard styling.
pub fn new_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Creates a styled header cell for a table.
pub fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// Formats an `Option<T>` into a `Cell`. `None` is displayed as "N/A".
pub fn format_optional_cell<T>(value: Option<T>, format_fn: impl Fn(T) -> String) -> Cell {
    value.map_or(
        Cell::new("N/A")
            .fg(Color::DarkGrey)
            .set_alignment(CellAlignment::Right),
        |v| Cell::new(format_fn(v)).set_alignment(CellAlignment::Right),
    )
}

pub fn count_cell(count: usize) -> Cell {
    Cell::new(count).set_alignment(CellAlignment::Right)
}

pub fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M").to_string()
}

pub fn time_cell(time: Option<DateTime<Utc>>) -> Cell {
    format_optional_cell(time, format_time)
}

pub fn tracking_status_cell(status: Option<TrackingStatus>) -> Cell {
    match status {
        None => Cell::new("untracked").fg(Color::DarkGrey),
        Some(status @ TrackingStatus::Active) => Cell::new(status).fg(Color::Green),
        Some(status @ TrackingStatus::Failing) => Cell::new(status).fg(Color::Red),
        Some(status @ TrackingStatus::Disabled) => Cell::new(status).fg(Color::DarkGrey),
    }
}

pub fn split_status_cell(status: SplitStatus) -> Cell {
    let color = match status {
        SplitStatus::NotProcessed => Color::Yellow,
        SplitStatus::Processed => Color::Green,
        SplitStatus::RollbackRequested => Color::Magenta,
        SplitStatus::RolledBack => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

/// Two-column table of job counters.
pub fn report_table(title: &str, rows: &[(&str, usize)]) -> String {
    let mut table = new_styled_table();
    table.set_header(vec![header_cell("Metric"), header_cell("Count")]);
    for (label, count) in rows {
        table.add_row(vec![Cell::new(label), count_cell(*count)]);
    }
    format!("{}\n\n{}", style_text(title, StyleType::Title), table)
}

/// Creates a new `indicatif::ProgressBar` with standard styling.
pub fn new_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb
}
