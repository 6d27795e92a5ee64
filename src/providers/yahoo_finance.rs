use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument, warn};

use crate::core::interval::{SampleInterval, align_down};
use crate::core::quote::{ProviderSplit, Quote, QuoteSource, RateQuote};
use crate::providers::util::with_retry;

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
    events: Option<ChartEvents>,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    currency: Option<String>,
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(alias = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<QuoteIndicator>,
}

#[derive(Deserialize, Debug)]
struct QuoteIndicator {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize, Debug)]
struct ChartEvents {
    splits: Option<HashMap<String, SplitEvent>>,
}

#[derive(Deserialize, Debug)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

fn to_time(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(8).normalize())
}

/// Scales a possibly fractional split ratio to its smallest whole-number
/// form, so 1.5:1 becomes 3:2.
fn integer_ratio(numerator: f64, denominator: f64) -> Option<(u32, u32)> {
    let (numerator, denominator) = (to_decimal(numerator)?, to_decimal(denominator)?);
    if numerator <= Decimal::ZERO || denominator <= Decimal::ZERO {
        return None;
    }
    let scale = numerator.scale().max(denominator.scale());
    let factor = Decimal::from(10u64.checked_pow(scale)?);
    let numerator = numerator.checked_mul(factor)?.to_u64()?;
    let denominator = denominator.checked_mul(factor)?.to_u64()?;

    let (mut a, mut b) = (numerator, denominator);
    while b != 0 {
        (a, b) = (b, a % b);
    }
    Some((
        u32::try_from(numerator / a).ok()?,
        u32::try_from(denominator / a).ok()?,
    ))
}

fn yahoo_interval(interval: SampleInterval) -> &'static str {
    match interval {
        SampleInterval::FiveMinutes => "5m",
        SampleInterval::OneHour => "60m",
        SampleInterval::OneDay => "1d",
    }
}

/// Pairs timestamps with closes, skipping bars without a close. Daily bars
/// are moved to UTC midnight of their trading day.
fn extract_quotes(item: &ChartItem, interval: SampleInterval) -> Vec<Quote> {
    let (Some(timestamps), Some(closes)) = (
        item.timestamp.as_ref(),
        item.indicators
            .as_ref()
            .and_then(|inds| inds.quote.first())
            .and_then(|q| q.close.as_ref()),
    ) else {
        return Vec::new();
    };

    timestamps
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let time = to_time(*ts)?;
            let value = to_decimal((*close)?)?;
            let time = if interval.is_intraday() {
                time
            } else {
                align_down(time, SampleInterval::OneDay)
            };
            Some(Quote { time, value })
        })
        .collect()
}

/// Quote source backed by the Yahoo Finance chart API.
pub struct YahooQuoteSource {
    base_url: String,
    client: reqwest::Client,
    retries: usize,
    retry_delay_ms: u64,
}

impl YahooQuoteSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("xmf-history/1.0")
            .build()?;
        Ok(YahooQuoteSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retries: 2,
            retry_delay_ms: 500,
        })
    }

    pub fn with_retry_policy(mut self, retries: usize, delay_ms: u64) -> Self {
        self.retries = retries;
        self.retry_delay_ms = delay_ms;
        self
    }

    async fn fetch_chart(&self, symbol: &str, query: &str) -> Result<Option<ChartItem>> {
        let url = format!("{}/v8/finance/chart/{}?{}", self.base_url, symbol, query);
        debug!("Requesting chart data from {}", url);

        let response = with_retry(
            || self.client.get(&url).send(),
            self.retries,
            self.retry_delay_ms,
        )
        .await
        .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, symbol, url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for symbol: {}",
                response.status(),
                symbol
            ));
        }

        let text = response.text().await?;
        let data: YahooChartResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;

        Ok(data.chart.result.and_then(|r| r.into_iter().next()))
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: SampleInterval,
    ) -> Result<Option<ChartItem>> {
        let query = format!(
            "period1={}&period2={}&interval={}&events=split",
            from.timestamp(),
            to.timestamp(),
            yahoo_interval(interval)
        );
        self.fetch_chart(symbol, &query).await
    }

    async fn fetch_prices(
        &self,
        symbol: &str,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: SampleInterval,
    ) -> Result<Vec<Quote>> {
        let Some(item) = self.fetch_range(symbol, from, to, interval).await? else {
            debug!("No chart data for {}", symbol);
            return Ok(Vec::new());
        };
        check_currency(symbol, currency, &item.meta);
        let quotes = extract_quotes(&item, interval);
        debug!(count = quotes.len(), "Received quotes");
        Ok(quotes)
    }
}

fn check_currency(symbol: &str, expected: &str, meta: &ChartMeta) {
    if let Some(actual) = meta.currency.as_deref() {
        if !actual.eq_ignore_ascii_case(expected) {
            warn!(
                symbol,
                expected, actual, "Provider currency differs from configured currency"
            );
        }
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    #[instrument(name = "YahooDailyPrices", skip(self), fields(symbol = %symbol))]
    async fn fetch_daily_prices(
        &self,
        symbol: &str,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Quote>> {
        self.fetch_prices(symbol, currency, from, to, SampleInterval::OneDay)
            .await
    }

    #[instrument(name = "YahooIntradayPrices", skip(self), fields(symbol = %symbol))]
    async fn fetch_intraday_prices(
        &self,
        symbol: &str,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: SampleInterval,
    ) -> Result<Vec<Quote>> {
        self.fetch_prices(symbol, currency, from, to, interval).await
    }

    #[instrument(name = "YahooLatestPrice", skip(self), fields(symbol = %symbol))]
    async fn fetch_latest_price(&self, symbol: &str, currency: &str) -> Result<Option<Quote>> {
        let Some(item) = self.fetch_chart(symbol, "interval=1d&range=1d").await? else {
            return Ok(None);
        };
        check_currency(symbol, currency, &item.meta);
        let quote = match (item.meta.regular_market_price, item.meta.regular_market_time) {
            (Some(price), Some(ts)) => to_time(ts)
                .zip(to_decimal(price))
                .map(|(time, value)| Quote { time, value }),
            _ => None,
        };
        Ok(quote)
    }

    #[instrument(name = "YahooExchangeRates", skip(self, quotes), fields(base = %base))]
    async fn fetch_daily_exchange_rates(
        &self,
        base: &str,
        quotes: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RateQuote>> {
        let mut by_day: BTreeMap<DateTime<Utc>, HashMap<String, Decimal>> = BTreeMap::new();
        for quote_currency in quotes {
            let symbol = format!("{base}{quote_currency}=X");
            let Some(item) = self
                .fetch_range(&symbol, from, to, SampleInterval::OneDay)
                .await?
            else {
                debug!("No rate data for currency pair: {}", symbol);
                continue;
            };
            for q in extract_quotes(&item, SampleInterval::OneDay) {
                by_day
                    .entry(q.time)
                    .or_default()
                    .insert(quote_currency.clone(), q.value);
            }
        }
        Ok(by_day
            .into_iter()
            .map(|(time, rates)| RateQuote { time, rates })
            .collect())
    }

    #[instrument(name = "YahooSplits", skip(self), fields(symbol = %symbol))]
    async fn fetch_splits(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderSplit>> {
        let Some(item) = self
            .fetch_range(symbol, from, to, SampleInterval::OneDay)
            .await?
        else {
            return Ok(Vec::new());
        };

        let mut splits: Vec<ProviderSplit> = item
            .events
            .and_then(|e| e.splits)
            .unwrap_or_default()
            .into_values()
            .filter_map(|event| {
                let Some((numerator, denominator)) =
                    integer_ratio(event.numerator, event.denominator)
                else {
                    debug!(?event, "Skipping malformed split event");
                    return None;
                };
                Some(ProviderSplit {
                    // Splits take effect from the start of their trading day
                    time: align_down(to_time(event.date)?, SampleInterval::OneDay),
                    numerator,
                    denominator,
                })
            })
            .collect();
        splits.sort_by_key(|s| s.time);
        Ok(splits)
    }
}
