//! Age-based thinning of stored samples.

use crate::core::interval::IntervalPolicy;
use crate::core::model::{Sample, Stored};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Returns the ids of samples that are denser than `policy` requires for
/// their age as seen from `now`.
///
/// One pass, oldest to newest. Samples sharing a timestamp keep only the
/// highest id. Every retention bucket keeps its anchor; interior points are
/// deleted as soon as the next point arrives, and when a bucket closes the
/// last point seen becomes the anchor of the next one. The newest sample is
/// never deleted. Running this again over the survivors returns nothing.
pub fn compaction_candidates(
    samples: &[Stored<Sample>],
    policy: IntervalPolicy,
    now: DateTime<Utc>,
) -> BTreeSet<u64> {
    let mut ordered: Vec<&Stored<Sample>> = samples.iter().collect();
    ordered.sort_by(|a, b| a.time.cmp(&b.time).then(b.id.cmp(&a.id)));

    let mut doomed = BTreeSet::new();
    let mut anchor: Option<&Stored<Sample>> = None;
    let mut previous: Option<&Stored<Sample>> = None;

    for sample in ordered {
        if let Some(prev) = previous {
            if prev.time == sample.time {
                doomed.insert(sample.id);
                continue;
            }
        }

        let current_anchor = *anchor.get_or_insert(sample);
        let interval = policy.step(now, sample.time);
        if current_anchor.time + interval < sample.time {
            anchor = previous;
        }

        if let (Some(prev), Some(anchor)) = (previous, anchor) {
            if prev.id != anchor.id {
                doomed.insert(prev.id);
            }
        }

        previous = Some(sample);
    }

    doomed
}
