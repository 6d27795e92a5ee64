//! Works out which windows of an owner's history still need fetching.

use crate::core::interval::{IntervalPolicy, TimeRange};
use chrono::{DateTime, Utc};

/// Computes the ranges between `floor` and `end` that are not covered at the
/// density `policy` demands.
///
/// `existing` must be ascending. Times before `floor` or at/after `end` are
/// ignored. Each emitted range is tagged with the interval in effect at its
/// start, measured from `end`.
///
/// A gap that follows an existing sample starts one interval after that
/// sample, since the sample already fills its own slot. A gap at the very
/// start of the window starts at `floor`.
pub fn missing_ranges(
    existing: &[DateTime<Utc>],
    policy: IntervalPolicy,
    floor: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<TimeRange> {
    let mut ranges = Vec::new();
    if floor >= end {
        return ranges;
    }

    let mut cursor = floor;
    let mut cursor_is_sample = false;

    for &time in existing {
        if time < cursor || time >= end {
            continue;
        }
        let interval = policy.interval_for(end, cursor);
        let step = interval.to_duration();
        if cursor + step < time {
            let from = if cursor_is_sample { cursor + step } else { cursor };
            ranges.push(TimeRange::new(from, time, interval));
        }
        cursor = time;
        cursor_is_sample = true;
    }

    let interval = policy.interval_for(end, cursor);
    let step = interval.to_duration();
    if cursor + step < end {
        let from = if cursor_is_sample { cursor + step } else { cursor };
        ranges.push(TimeRange::new(from, end, interval));
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interval::SampleInterval;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n - 1)
    }

    #[test]
    fn test_empty_history_yields_whole_window() {
        let floor = day(1);
        let end = day(11);
        let ranges = missing_ranges(&[], IntervalPolicy::ExchangeRates, floor, end);
        assert_eq!(
            ranges,
            vec![TimeRange::new(floor, end, SampleInterval::OneDay)]
        );
    }

    #[test]
    fn test_floor_equal_to_end_yields_nothing() {
        let ranges = missing_ranges(&[], IntervalPolicy::InstrumentPrices, day(3), day(3));
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_fully_covered_history_yields_nothing() {
        let times: Vec<_> = (1..=10).map(day).collect();
        let ranges = missing_ranges(&times, IntervalPolicy::ExchangeRates, day(1), day(10));
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_single_missing_day_is_reported() {
        let times: Vec<_> = (1..=10).filter(|d| *d != 5).map(day).collect();
        let ranges = missing_ranges(&times, IntervalPolicy::ExchangeRates, day(1), day(10));
        assert_eq!(
            ranges,
            vec![TimeRange::new(day(5), day(6), SampleInterval::OneDay)]
        );
    }

    #[test]
    fn test_leading_and_trailing_gaps() {
        let times = vec![day(4), day(5)];
        let ranges = missing_ranges(&times, IntervalPolicy::ExchangeRates, day(1), day(9));
        assert_eq!(
            ranges,
            vec![
                TimeRange::new(day(1), day(4), SampleInterval::OneDay),
                TimeRange::new(day(6), day(9), SampleInterval::OneDay),
            ]
        );
    }

    #[test]
    fn test_times_outside_window_are_ignored() {
        let times = vec![day(1), day(2), day(20)];
        let ranges = missing_ranges(&times, IntervalPolicy::ExchangeRates, day(2), day(5));
        assert_eq!(
            ranges,
            vec![TimeRange::new(day(3), day(5), SampleInterval::OneDay)]
        );
    }

    #[test]
    fn test_recent_gap_uses_intraday_interval() {
        let end = day(10);
        let recent = end - Duration::hours(3);
        let times = vec![recent];
        let ranges = missing_ranges(
            &times,
            IntervalPolicy::InstrumentPrices,
            end - Duration::hours(4),
            end,
        );
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].interval, SampleInterval::FiveMinutes);
        assert_eq!(ranges[0].from, end - Duration::hours(4));
        assert_eq!(ranges[0].to, recent);
        assert_eq!(ranges[1].from, recent + Duration::minutes(5));
        assert_eq!(ranges[1].to, end);
    }

    #[test]
    fn test_gap_narrower_than_interval_is_not_reported() {
        let end = day(10);
        let times = vec![end - Duration::minutes(20), end - Duration::minutes(17)];
        let ranges = missing_ranges(
            &times,
            IntervalPolicy::InstrumentPrices,
            end - Duration::minutes(20),
            end,
        );
        // 17 minutes to `end` is wider than 5 minutes, so only the trailing gap shows
        assert_eq!(
            ranges,
            vec![TimeRange::new(
                end - Duration::minutes(12),
                end,
                SampleInterval::FiveMinutes
            )]
        );
    }
}
