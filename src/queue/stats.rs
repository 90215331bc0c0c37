//! Queue statistics
//!
//! Status counts come from the current unit collection. Totals and averages
//! are all-time and survive `clear_finished`; only `reset` zeroes them.

use super::events::SchedulerEvent;
use super::rate_limit::RateLimitState;
use super::unit::UnitStatus;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Units per status in the current collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn from_statuses(statuses: impl IntoIterator<Item = UnitStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                UnitStatus::Queued => counts.queued += 1,
                UnitStatus::Processing => counts.processing += 1,
                UnitStatus::Completed => counts.completed += 1,
                UnitStatus::Failed => counts.failed += 1,
                UnitStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn active(&self) -> usize {
        self.queued + self.processing
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Completed plus failed, all-time
    pub total_processed: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    /// Mean admission wait over completed units
    pub avg_wait_ms: f64,
    /// Mean processing time over completed units
    pub avg_processing_ms: f64,
    /// Completions in the trailing minute
    pub throughput_per_minute: usize,
    pub paused: bool,
    pub rate_limit: RateLimitState,
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    total_completed: u64,
    total_failed: u64,
    total_cancelled: u64,
    wait_total_ms: u64,
    processing_total_ms: u64,
    recent_completions: VecDeque<Instant>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &SchedulerEvent, now: Instant) {
        match event {
            SchedulerEvent::Completed {
                wait_ms,
                processing_ms,
                ..
            } => {
                self.total_completed += 1;
                self.wait_total_ms = self.wait_total_ms.saturating_add(*wait_ms);
                self.processing_total_ms = self.processing_total_ms.saturating_add(*processing_ms);
                self.recent_completions.push_back(now);
                self.prune(now);
            }
            SchedulerEvent::Failed { .. } => self.total_failed += 1,
            SchedulerEvent::Cancelled { .. } => self.total_cancelled += 1,
            _ => {}
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent_completions.front() {
            if now.saturating_duration_since(*front) >= THROUGHPUT_WINDOW {
                self.recent_completions.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(
        &self,
        counts: StatusCounts,
        rate_limit: RateLimitState,
        paused: bool,
        now: Instant,
    ) -> QueueStats {
        let average = |total: u64| {
            if self.total_completed == 0 {
                0.0
            } else {
                total as f64 / self.total_completed as f64
            }
        };
        QueueStats {
            counts,
            total_processed: self.total_completed + self.total_failed,
            total_completed: self.total_completed,
            total_failed: self.total_failed,
            total_cancelled: self.total_cancelled,
            avg_wait_ms: average(self.wait_total_ms),
            avg_processing_ms: average(self.processing_total_ms),
            throughput_per_minute: self
                .recent_completions
                .iter()
                .filter(|at| now.saturating_duration_since(**at) < THROUGHPUT_WINDOW)
                .count(),
            paused,
            rate_limit,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
