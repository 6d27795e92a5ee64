use crate::core::config::AppConfig;
use crate::core::model::{Owner, Transaction};
use crate::core::repository::{ChangeSet, HistoryStore};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;

/// A buy or sell to store against a configured holding.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRequest {
    pub portfolio: String,
    pub symbol: String,
    pub time: DateTime<Utc>,
    /// Positive for a buy, negative for a sell.
    pub amount: Decimal,
    pub price: Decimal,
    pub fee: Option<Decimal>,
    pub note: Option<String>,
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (UTC midnight).
pub fn parse_time(input: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(input) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("Invalid time '{input}', expected YYYY-MM-DD or RFC 3339"))
}

/// Finds the instrument `symbol` in portfolio `portfolio`.
pub fn resolve_instrument(config: &AppConfig, portfolio: &str, symbol: &str) -> Result<Owner> {
    let Some(found) = config.portfolios.iter().find(|p| p.name == portfolio) else {
        bail!("Unknown portfolio: {}", portfolio);
    };
    found
        .holdings
        .iter()
        .find(|h| h.symbol.eq_ignore_ascii_case(symbol))
        .map(|h| Owner::instrument(&h.symbol, &h.currency))
        .with_context(|| format!("{symbol} is not a holding of portfolio {portfolio}"))
}

pub async fn record(
    store: &dyn HistoryStore,
    config: &AppConfig,
    request: RecordRequest,
    now: DateTime<Utc>,
) -> Result<Owner> {
    let instrument = resolve_instrument(config, &request.portfolio, &request.symbol)?;
    let mut tx = Transaction::new(
        &request.portfolio,
        request.time,
        now,
        request.amount,
        request.price,
    )?;
    if let Some(fee) = request.fee {
        tx = tx.with_fee(fee);
    }
    if let Some(note) = request.note {
        tx = tx.with_note(note);
    }

    let mut changes = ChangeSet::new();
    changes.add_transaction(&instrument, tx);
    store.commit(changes).await?;
    info!(instrument = %instrument, portfolio = %request.portfolio, "Recorded transaction");
    Ok(instrument)
}

pub async fn run(store: &dyn HistoryStore, config: &AppConfig, request: RecordRequest) -> Result<()> {
    let amount = request.amount;
    let price = request.price;
    let instrument = record(store, config, request, Utc::now()).await?;
    println!("Recorded {amount} of {instrument} at {price}");
    Ok(())
}
