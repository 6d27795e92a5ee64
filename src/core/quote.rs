//! Market data source abstraction

use crate::core::interval::SampleInterval;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A raw observation as returned by a provider. Not validated; see
/// [`crate::core::model::Sample`] for the persisted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub time: DateTime<Utc>,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuote {
    pub time: DateTime<Utc>,
    /// Quote currency -> units of quote currency per unit of base.
    pub rates: HashMap<String, Decimal>,
}

/// A split event in the provider's own ratio orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSplit {
    pub time: DateTime<Utc>,
    pub numerator: u32,
    pub denominator: u32,
}

/// Source of prices, exchange rates and split events.
///
/// Implementations return empty results (or `None`) when there is no data and
/// only fail on transport or decoding errors.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_daily_prices(
        &self,
        symbol: &str,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Quote>>;

    async fn fetch_intraday_prices(
        &self,
        symbol: &str,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: SampleInterval,
    ) -> Result<Vec<Quote>>;

    async fn fetch_latest_price(&self, symbol: &str, currency: &str) -> Result<Option<Quote>>;

    async fn fetch_daily_exchange_rates(
        &self,
        base: &str,
        quotes: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RateQuote>>;

    async fn fetch_splits(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderSplit>>;
}
