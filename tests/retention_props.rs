use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use xmf_history::core::interval::IntervalPolicy;
use xmf_history::core::model::{Sample, Stored};
use xmf_history::core::retention::compaction_candidates;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 14, 12, 0, 0).unwrap()
}

fn stored(id: u64, time: DateTime<Utc>) -> Stored<Sample> {
    Stored {
        id,
        record: Sample::new(time, Decimal::ONE, time).unwrap(),
    }
}

fn samples_strategy() -> impl Strategy<Value = Vec<Stored<Sample>>> {
    proptest::collection::vec(0i64..30 * 24 * 60, 1..200).prop_map(|minutes| {
        minutes
            .into_iter()
            .enumerate()
            .map(|(id, m)| stored(id as u64, now() - Duration::minutes(m)))
            .collect()
    })
}

fn policy_strategy() -> impl Strategy<Value = IntervalPolicy> {
    prop_oneof![
        Just(IntervalPolicy::InstrumentPrices),
        Just(IntervalPolicy::ExchangeRates)
    ]
}

fn survivors(samples: &[Stored<Sample>], doomed: &BTreeSet<u64>) -> Vec<Stored<Sample>> {
    samples
        .iter()
        .filter(|s| !doomed.contains(&s.id))
        .cloned()
        .collect()
}

/// Highest id among the samples at the given extreme time.
fn newest_id_at(samples: &[Stored<Sample>], time: DateTime<Utc>) -> Option<u64> {
    samples.iter().filter(|s| s.time == time).map(|s| s.id).max()
}

proptest! {
    #[test]
    fn compaction_is_idempotent(samples in samples_strategy(), policy in policy_strategy()) {
        let doomed = compaction_candidates(&samples, policy, now());
        let kept = survivors(&samples, &doomed);

        prop_assert!(compaction_candidates(&kept, policy, now()).is_empty());

        let times: BTreeSet<_> = kept.iter().map(|s| s.time).collect();
        prop_assert_eq!(times.len(), kept.len());
    }

    #[test]
    fn compaction_keeps_both_ends(samples in samples_strategy(), policy in policy_strategy()) {
        let doomed = compaction_candidates(&samples, policy, now());

        let first = samples.iter().map(|s| s.time).min().unwrap();
        let last = samples.iter().map(|s| s.time).max().unwrap();
        let first_id = newest_id_at(&samples, first).unwrap();
        let last_id = newest_id_at(&samples, last).unwrap();

        prop_assert!(!doomed.contains(&first_id));
        prop_assert!(!doomed.contains(&last_id));
    }

    #[test]
    fn hourly_history_thins_to_daily_past_five_days(days in 6i64..20) {
        let samples: Vec<Stored<Sample>> = (0..=days * 24)
            .map(|h| stored(h as u64, now() - Duration::hours(h)))
            .collect();

        let doomed = compaction_candidates(&samples, IntervalPolicy::InstrumentPrices, now());
        let mut kept = survivors(&samples, &doomed);
        kept.sort_by_key(|s| s.time);

        prop_assert!(kept
            .iter()
            .filter(|s| now() - s.time <= Duration::days(5))
            .count() == 5 * 24 + 1);

        let old: Vec<_> = kept.iter().filter(|s| now() - s.time > Duration::days(5)).collect();
        prop_assert!(old.windows(2).all(|w| w[1].time - w[0].time >= Duration::days(1)));
    }
}
