//! Carry-forward densification of sparse provider data.

use crate::core::interval::{IntervalPolicy, SampleInterval, TimeRange, align_up};
use crate::core::model::Sample;
use crate::core::quote::Quote;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Produces one sample per policy boundary in `range`, each carrying the most
/// recent observed value at or before that boundary.
///
/// Observations outside the range or with a non-positive value are dropped.
/// `seed` stands in for the last known value before `range.from`; without it,
/// boundaries before the first observation are left empty. Boundaries sit on
/// the UTC grid of the interval in effect. When the policy switches to a finer
/// interval inside a step, the next boundary is the first point of the finer
/// grid after the switch.
pub fn fill_range(
    observed: &[Quote],
    seed: Option<Decimal>,
    policy: IntervalPolicy,
    reference: DateTime<Utc>,
    range: &TimeRange,
    creation_time: DateTime<Utc>,
) -> Vec<Sample> {
    let mut real: Vec<&Quote> = observed
        .iter()
        .filter(|q| {
            let keep = q.value > Decimal::ZERO && range.contains(q.time);
            if !keep {
                debug!(time = %q.time, value = %q.value, "Dropping quote outside window or non-positive");
            }
            keep
        })
        .collect();
    real.sort_by_key(|q| q.time);

    let mut filled = Vec::new();
    let mut current = seed.filter(|v| *v > Decimal::ZERO);
    let mut next_real = real.iter().peekable();
    let mut boundary = align_up(range.from, interval_after(policy, reference, range.from));

    while boundary < range.to {
        while let Some(q) = next_real.next_if(|q| q.time <= boundary) {
            current = Some(q.value);
        }

        if let Some(value) = current {
            match Sample::new(boundary, value, creation_time) {
                Ok(sample) => filled.push(sample),
                Err(e) => warn!(time = %boundary, error = %e, "Skipping invalid filled sample"),
            }
        }

        boundary = next_boundary(policy, reference, boundary);
    }

    filled
}

fn next_boundary(
    policy: IntervalPolicy,
    reference: DateTime<Utc>,
    boundary: DateTime<Utc>,
) -> DateTime<Utc> {
    let next = boundary + policy.step(reference, boundary);
    match policy.thresholds(reference, boundary, next).first() {
        Some(&cut) => align_up(cut, interval_after(policy, reference, cut)),
        None => align_up(next, policy.interval_for(reference, next)),
    }
}

// A threshold instant belongs to the coarser interval; the grid that starts
// there is the one just after it.
fn interval_after(
    policy: IntervalPolicy,
    reference: DateTime<Utc>,
    time: DateTime<Utc>,
) -> SampleInterval {
    policy.interval_for(reference, time + Duration::seconds(1))
}
