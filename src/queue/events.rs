//! Scheduler events
//!
//! Broadcast to every [`subscribe`](super::Scheduler::subscribe) receiver. A
//! slow receiver that falls behind sees `RecvError::Lagged` and skips ahead.

use crate::lifecycle::Phase;
use crate::types::{Priority, UnitId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Enqueued {
        unit_id: UnitId,
        priority: Priority,
    },
    Admitted {
        unit_id: UnitId,
        effective_priority: f64,
        wait_ms: u64,
    },
    PhaseChanged {
        unit_id: UnitId,
        phase: Phase,
    },
    Progress {
        unit_id: UnitId,
        progress: u8,
    },
    Fragment {
        unit_id: UnitId,
        text: String,
    },
    Retrying {
        unit_id: UnitId,
        retry_count: u32,
        delay_ms: u64,
        error: String,
    },
    RateLimited {
        unit_id: UnitId,
        backoff_ms: u64,
        consecutive_errors: u32,
    },
    Completed {
        unit_id: UnitId,
        wait_ms: u64,
        processing_ms: u64,
    },
    Failed {
        unit_id: UnitId,
        retry_count: u32,
        error: String,
    },
    Cancelled {
        unit_id: UnitId,
    },
    Paused,
    Resumed,
}

impl SchedulerEvent {
    pub fn unit_id(&self) -> Option<UnitId> {
        match self {
            SchedulerEvent::Enqueued { unit_id, .. }
            | SchedulerEvent::Admitted { unit_id, .. }
            | SchedulerEvent::PhaseChanged { unit_id, .. }
            | SchedulerEvent::Progress { unit_id, .. }
            | SchedulerEvent::Fragment { unit_id, .. }
            | SchedulerEvent::Retrying { unit_id, .. }
            | SchedulerEvent::RateLimited { unit_id, .. }
            | SchedulerEvent::Completed { unit_id, .. }
            | SchedulerEvent::Failed { unit_id, .. }
            | SchedulerEvent::Cancelled { unit_id } => Some(*unit_id),
            SchedulerEvent::Paused | SchedulerEvent::Resumed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::Completed { .. }
                | SchedulerEvent::Failed { .. }
                | SchedulerEvent::Cancelled { .. }
        )
    }
}
