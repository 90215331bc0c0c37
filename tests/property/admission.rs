//! Properties of admission ordering and rate-limit backoff

use genflow::queue::{
    backoff_ms, effective_priority, order_candidates, AdmissionCandidate, MAX_BACKOFF_MS,
};
use genflow::types::{Priority, UnitId};
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

proptest! {
    #[test]
    fn prop_priority_always_clamped(value in any::<i64>()) {
        let priority = Priority::clamped(value);
        prop_assert!(priority.value() >= Priority::MIN && priority.value() <= Priority::MAX);
    }

    #[test]
    fn prop_aging_never_lowers_priority(
        base in 1i64..=5,
        waited_secs in 0u64..100_000,
        extra_secs in 0u64..100_000,
        boost in 0.0f64..10.0,
    ) {
        let base = Priority::clamped(base);
        let earlier = effective_priority(base, Duration::from_secs(waited_secs), boost);
        let later = effective_priority(base, Duration::from_secs(waited_secs + extra_secs), boost);
        prop_assert!(later >= earlier);
        prop_assert!(earlier >= base.value() as f64);
    }

    #[test]
    fn prop_backoff_bounded_and_monotonic(base in 0u64..120_000, n in 1u32..64) {
        let current = backoff_ms(base, n);
        let next = backoff_ms(base, n + 1);
        prop_assert!(current <= MAX_BACKOFF_MS);
        prop_assert!(next >= current);
    }

    #[test]
    fn prop_order_is_sorted_by_priority_then_age(
        entries in proptest::collection::vec((1i64..=5, 0u64..600), 1..40)
    ) {
        let origin = Instant::now();
        let mut candidates: Vec<AdmissionCandidate> = entries
            .iter()
            .map(|(priority, offset)| AdmissionCandidate {
                unit_id: UnitId::next(),
                effective_priority: *priority as f64,
                enqueued: origin + Duration::from_secs(*offset),
            })
            .collect();
        order_candidates(&mut candidates);

        for pair in candidates.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.effective_priority >= b.effective_priority);
            if a.effective_priority == b.effective_priority {
                prop_assert!(a.enqueued <= b.enqueued);
                if a.enqueued == b.enqueued {
                    prop_assert!(a.unit_id < b.unit_id);
                }
            }
        }
    }
}
