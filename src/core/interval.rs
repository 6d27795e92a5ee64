//! Sampling granularity as a function of sample age

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum SampleInterval {
    FiveMinutes,
    OneHour,
    OneDay,
}

impl Display for SampleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SampleInterval::FiveMinutes => "5m",
                SampleInterval::OneHour => "1h",
                SampleInterval::OneDay => "1d",
            }
        )
    }
}

impl SampleInterval {
    /// The finest granularity any policy asks for.
    pub const FINEST: SampleInterval = SampleInterval::FiveMinutes;

    pub fn to_duration(&self) -> Duration {
        match self {
            SampleInterval::FiveMinutes => Duration::minutes(5),
            SampleInterval::OneHour => Duration::hours(1),
            SampleInterval::OneDay => Duration::days(1),
        }
    }

    pub fn is_intraday(&self) -> bool {
        *self != SampleInterval::OneDay
    }
}

impl FromStr for SampleInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "5m" => Ok(SampleInterval::FiveMinutes),
            "1h" => Ok(SampleInterval::OneHour),
            "1d" => Ok(SampleInterval::OneDay),
            _ => Err(anyhow::anyhow!("Invalid sample interval: {}", s)),
        }
    }
}

/// Which age table applies to an owner's samples.
///
/// The same policy decides what the sync job fetches and what the compactor
/// keeps, so fetch and retention granularity cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalPolicy {
    InstrumentPrices,
    ExchangeRates,
}

impl IntervalPolicy {
    /// Granularity required for a sample at `sample_time` when observed from
    /// `reference`. Samples in the future of `reference` count as age zero.
    pub fn interval_for(
        &self,
        reference: DateTime<Utc>,
        sample_time: DateTime<Utc>,
    ) -> SampleInterval {
        match self {
            IntervalPolicy::ExchangeRates => SampleInterval::OneDay,
            IntervalPolicy::InstrumentPrices => {
                let age = reference - sample_time;
                if age < Duration::days(1) {
                    SampleInterval::FiveMinutes
                } else if age < Duration::days(5) {
                    SampleInterval::OneHour
                } else {
                    SampleInterval::OneDay
                }
            }
        }
    }

    /// Shorthand for `interval_for(..).to_duration()`.
    pub fn step(&self, reference: DateTime<Utc>, sample_time: DateTime<Utc>) -> Duration {
        self.interval_for(reference, sample_time).to_duration()
    }

    /// Times strictly inside `(from, to)` where the required interval changes,
    /// in ascending order.
    pub fn thresholds(
        &self,
        reference: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        match self {
            IntervalPolicy::ExchangeRates => Vec::new(),
            IntervalPolicy::InstrumentPrices => [Duration::days(5), Duration::days(1)]
                .into_iter()
                .map(|age| reference - age)
                .filter(|t| *t > from && *t < to)
                .collect(),
        }
    }
}

/// Rounds `time` down to a multiple of `interval` since the unix epoch.
pub fn align_down(time: DateTime<Utc>, interval: SampleInterval) -> DateTime<Utc> {
    let step = interval.to_duration().num_seconds();
    let secs = time.timestamp().div_euclid(step) * step;
    Utc.timestamp_opt(secs, 0).single().unwrap_or(time)
}

/// Rounds `time` up to a multiple of `interval` since the unix epoch.
pub fn align_up(time: DateTime<Utc>, interval: SampleInterval) -> DateTime<Utc> {
    let down = align_down(time, interval);
    if down == time {
        time
    } else {
        down + interval.to_duration()
    }
}

/// A contiguous window `[from, to)` that needs data at `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: SampleInterval,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>, interval: SampleInterval) -> Self {
        Self { from, to, interval }
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.from && time < self.to
    }

    /// Cuts the range wherever the policy changes granularity so each piece
    /// can be fetched from the endpoint matching its own age. A piece is
    /// tagged with the finest interval inside it, which is the one in effect
    /// just before its end.
    pub fn split_by_policy(&self, policy: IntervalPolicy, reference: DateTime<Utc>) -> Vec<Self> {
        let finest = |start: DateTime<Utc>, end: DateTime<Utc>| {
            policy.interval_for(reference, (end - Duration::seconds(1)).max(start))
        };
        let mut pieces = Vec::new();
        let mut start = self.from;
        for cut in policy.thresholds(reference, self.from, self.to) {
            pieces.push(Self::new(start, cut, finest(start, cut)));
            start = cut;
        }
        pieces.push(Self::new(start, self.to, finest(start, self.to)));
        pieces
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}) @ {}",
            self.from.to_rfc3339(),
            self.to.to_rfc3339(),
            self.interval
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_instrument_policy_thresholds() {
        let policy = IntervalPolicy::InstrumentPrices;
        let now = t0();

        assert_eq!(policy.interval_for(now, now), SampleInterval::FiveMinutes);
        assert_eq!(
            policy.interval_for(now, now - Duration::hours(23) - Duration::minutes(59)),
            SampleInterval::FiveMinutes
        );
        assert_eq!(
            policy.interval_for(now, now - Duration::days(1)),
            SampleInterval::OneHour
        );
        assert_eq!(
            policy.interval_for(now, now - Duration::days(4) - Duration::hours(23)),
            SampleInterval::OneHour
        );
        assert_eq!(
            policy.interval_for(now, now - Duration::days(5)),
            SampleInterval::OneDay
        );
        assert_eq!(
            policy.interval_for(now, now - Duration::days(400)),
            SampleInterval::OneDay
        );
        // Future samples are treated as fresh
        assert_eq!(
            policy.interval_for(now, now + Duration::hours(2)),
            SampleInterval::FiveMinutes
        );
    }

    #[test]
    fn test_exchange_rate_policy_is_always_daily() {
        let policy = IntervalPolicy::ExchangeRates;
        let now = t0();
        for age in [0, 1, 3, 5, 100] {
            assert_eq!(
                policy.interval_for(now, now - Duration::days(age)),
                SampleInterval::OneDay
            );
        }
    }

    #[test]
    fn test_interval_display_and_parse() {
        for interval in [
            SampleInterval::FiveMinutes,
            SampleInterval::OneHour,
            SampleInterval::OneDay,
        ] {
            let parsed: SampleInterval = interval.to_string().parse().unwrap();
            assert_eq!(parsed, interval);
        }
        assert!("2w".parse::<SampleInterval>().is_err());
    }

    #[test]
    fn test_alignment() {
        let t = Utc.with_ymd_and_hms(2024, 3, 10, 12, 7, 30).unwrap();
        assert_eq!(
            align_down(t, SampleInterval::FiveMinutes),
            Utc.with_ymd_and_hms(2024, 3, 10, 12, 5, 0).unwrap()
        );
        assert_eq!(
            align_up(t, SampleInterval::OneHour),
            Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap()
        );
        assert_eq!(
            align_down(t, SampleInterval::OneDay),
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
        );
        let midnight = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(align_up(midnight, SampleInterval::OneDay), midnight);
    }

    #[test]
    fn test_split_by_policy_cuts_at_age_thresholds() {
        let now = t0();
        let range = TimeRange::new(now - Duration::days(10), now, SampleInterval::OneDay);

        let pieces = range.split_by_policy(IntervalPolicy::InstrumentPrices, now);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].from, now - Duration::days(10));
        assert_eq!(pieces[0].to, now - Duration::days(5));
        assert_eq!(pieces[0].interval, SampleInterval::OneDay);
        assert_eq!(pieces[1].to, now - Duration::days(1));
        assert_eq!(pieces[1].interval, SampleInterval::OneHour);
        assert_eq!(pieces[2].to, now);
        assert_eq!(pieces[2].interval, SampleInterval::FiveMinutes);

        let rates = range.split_by_policy(IntervalPolicy::ExchangeRates, now);
        assert_eq!(rates, vec![range]);
    }
}
