//! Effective priority and admission ordering.

use crate::types::{Priority, UnitId};
use std::cmp::Ordering;
use std::time::Duration;
use tokio::time::Instant;

/// Base priority plus an aging bonus for time spent waiting.
pub fn effective_priority(base: Priority, waited: Duration, boost_per_minute: f64) -> f64 {
    base.value() as f64 + waited.as_secs_f64() / 60.0 * boost_per_minute
}

/// A queued unit ready to be ranked
#[derive(Debug, Clone, Copy)]
pub struct AdmissionCandidate {
    pub unit_id: UnitId,
    pub effective_priority: f64,
    pub enqueued: Instant,
}

impl AdmissionCandidate {
    /// Higher effective priority first, then earlier enqueue, then lower id.
    fn admission_cmp(&self, other: &Self) -> Ordering {
        other
            .effective_priority
            .total_cmp(&self.effective_priority)
            .then_with(|| self.enqueued.cmp(&other.enqueued))
            .then_with(|| self.unit_id.cmp(&other.unit_id))
    }
}

/// Sort candidates into admission order.
pub fn order_candidates(candidates: &mut [AdmissionCandidate]) {
    candidates.sort_by(AdmissionCandidate::admission_cmp);
}
