//! Persisted record types and their construction invariants

use crate::core::error::HistoryError;
use crate::core::interval::IntervalPolicy;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// 1990-01-01T00:00:00Z, the earliest market time the store accepts.
pub const DATA_EPOCH_SECS: i64 = 631_152_000;

pub fn data_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(DATA_EPOCH_SECS)
}

fn check_epoch(time: DateTime<Utc>) -> Result<(), HistoryError> {
    let epoch = data_epoch();
    if time < epoch {
        return Err(HistoryError::BeforeEpoch { time, epoch });
    }
    Ok(())
}

/// The instrument or currency pair a series of samples belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Owner {
    Instrument { symbol: String, currency: String },
    ExchangeRate { base: String, quote: String },
}

impl Owner {
    pub fn instrument(symbol: &str, currency: &str) -> Self {
        Owner::Instrument {
            symbol: symbol.to_string(),
            currency: currency.to_uppercase(),
        }
    }

    pub fn exchange_rate(base: &str, quote: &str) -> Self {
        Owner::ExchangeRate {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        }
    }

    pub fn policy(&self) -> IntervalPolicy {
        match self {
            Owner::Instrument { .. } => IntervalPolicy::InstrumentPrices,
            Owner::ExchangeRate { .. } => IntervalPolicy::ExchangeRates,
        }
    }

    /// Stable storage key. Keys of one kind share a prefix so a store can
    /// scan them together.
    pub fn key(&self) -> String {
        match self {
            Owner::Instrument { symbol, currency } => format!("px/{symbol}/{currency}"),
            Owner::ExchangeRate { base, quote } => format!("fx/{base}/{quote}"),
        }
    }
}

impl Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Instrument { symbol, currency } => write!(f, "{symbol} ({currency})"),
            Owner::ExchangeRate { base, quote } => write!(f, "{base}/{quote}"),
        }
    }
}

/// A price or exchange-rate observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub value: Decimal,
    pub creation_time: DateTime<Utc>,
}

impl Sample {
    pub fn new(
        time: DateTime<Utc>,
        value: Decimal,
        creation_time: DateTime<Utc>,
    ) -> Result<Self, HistoryError> {
        if value <= Decimal::ZERO {
            return Err(HistoryError::InvalidValue { value });
        }
        check_epoch(time)?;
        Ok(Self {
            time,
            value,
            creation_time,
        })
    }
}

/// A buy (positive amount) or sell (negative amount) on a portfolio position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub portfolio: String,
    pub time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
    pub amount: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

impl Transaction {
    pub fn new(
        portfolio: &str,
        time: DateTime<Utc>,
        creation_time: DateTime<Utc>,
        amount: Decimal,
        price: Decimal,
    ) -> Result<Self, HistoryError> {
        if amount.is_zero() {
            return Err(HistoryError::ZeroAmount);
        }
        if price <= Decimal::ZERO {
            return Err(HistoryError::InvalidPrice { price });
        }
        check_epoch(time)?;
        Ok(Self {
            portfolio: portfolio.to_string(),
            time,
            creation_time,
            amount,
            price,
            fee: Decimal::ZERO,
            note: None,
        })
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn value(&self) -> Decimal {
        self.amount * self.price
    }
}

/// A record together with the id the store assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: u64,
    pub record: T,
}

impl<T> std::ops::Deref for Stored<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    Active,
    Failing,
    Disabled,
}

impl Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TrackingStatus::Active => "active",
                TrackingStatus::Failing => "failing",
                TrackingStatus::Disabled => "disabled",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub start_time: DateTime<Utc>,
    pub last_update: Option<DateTime<Utc>>,
    pub status: TrackingStatus,
}

impl TrackingInfo {
    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            last_update: None,
            status: TrackingStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sample_rejects_non_positive_value() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(
            Sample::new(t, dec!(0), t),
            Err(HistoryError::InvalidValue { value: dec!(0) })
        );
        assert!(Sample::new(t, dec!(-1.5), t).is_err());
        assert!(Sample::new(t, dec!(0.0001), t).is_ok());
    }

    #[test]
    fn test_sample_rejects_time_before_epoch() {
        let t = Utc.with_ymd_and_hms(1989, 12, 31, 23, 59, 59).unwrap();
        let err = Sample::new(t, dec!(10), Utc::now()).unwrap_err();
        assert!(matches!(err, HistoryError::BeforeEpoch { .. }));
        assert!(Sample::new(data_epoch(), dec!(10), Utc::now()).is_ok());
    }

    #[test]
    fn test_transaction_invariants() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(
            Transaction::new("Core", t, t, dec!(0), dec!(10)),
            Err(HistoryError::ZeroAmount)
        );
        assert!(Transaction::new("Core", t, t, dec!(5), dec!(0)).is_err());

        let sell = Transaction::new("Core", t, t, dec!(-5), dec!(12.5))
            .unwrap()
            .with_fee(dec!(1))
            .with_note("trim");
        assert_eq!(sell.value(), dec!(-62.5));
        assert_eq!(sell.note.as_deref(), Some("trim"));
    }

    #[test]
    fn test_owner_keys_and_policy() {
        let aapl = Owner::instrument("AAPL", "usd");
        assert_eq!(aapl.key(), "px/AAPL/USD");
        assert_eq!(aapl.to_string(), "AAPL (USD)");
        assert_eq!(aapl.policy(), IntervalPolicy::InstrumentPrices);

        let fx = Owner::exchange_rate("usd", "eur");
        assert_eq!(fx.key(), "fx/USD/EUR");
        assert_eq!(fx.policy(), IntervalPolicy::ExchangeRates);
    }
}
