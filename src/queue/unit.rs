//! Queued units, their snapshots and per-unit enqueue options.

use crate::error::ErrorClass;
use crate::types::{GenerationOutput, GenerationRequest, Priority, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitStatus::Completed | UnitStatus::Failed | UnitStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, UnitStatus::Queued | UnitStatus::Processing)
    }
}

/// Scheduling record wrapping a request. Mutated only by the scheduler.
#[derive(Debug)]
pub(crate) struct QueuedUnit {
    pub(crate) id: UnitId,
    pub(crate) request: Arc<GenerationRequest>,
    pub(crate) priority: Priority,
    pub(crate) status: UnitStatus,
    pub(crate) retry_count: u32,
    pub(crate) max_retries: u32,
    /// Original enqueue instant; drives aging and FIFO tie-breaks.
    pub(crate) enqueued: Instant,
    /// Start of the current wait; reset when a unit is requeued.
    pub(crate) queued_since: Instant,
    /// Earliest admission instant after a retry delay.
    pub(crate) eligible_at: Option<Instant>,
    pub(crate) started: Option<Instant>,
    pub(crate) last_wait: Duration,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) result: Option<GenerationOutput>,
    pub(crate) error: Option<String>,
    pub(crate) error_class: Option<ErrorClass>,
    pub(crate) cancel_requested: bool,
    pub(crate) progress: u8,
}

impl QueuedUnit {
    pub(crate) fn new(
        id: UnitId,
        request: Arc<GenerationRequest>,
        priority: Priority,
        max_retries: u32,
        now: Instant,
    ) -> Self {
        Self {
            id,
            request,
            priority,
            status: UnitStatus::Queued,
            retry_count: 0,
            max_retries,
            enqueued: now,
            queued_since: now,
            eligible_at: None,
            started: None,
            last_wait: Duration::ZERO,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            error_class: None,
            cancel_requested: false,
            progress: 0,
        }
    }

    pub(crate) fn is_eligible(&self, now: Instant) -> bool {
        self.status == UnitStatus::Queued && self.eligible_at.map_or(true, |at| at <= now)
    }

    pub(crate) fn snapshot(&self, live_progress: Option<u8>) -> UnitSnapshot {
        UnitSnapshot {
            id: self.id,
            request: (*self.request).clone(),
            priority: self.priority,
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            error_class: self.error_class,
            cancel_requested: self.cancel_requested,
            progress: live_progress.unwrap_or(self.progress),
        }
    }
}

/// Copy of a unit's data. Hooks never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub request: GenerationRequest,
    pub priority: Priority,
    pub status: UnitStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<GenerationOutput>,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub cancel_requested: bool,
    pub progress: u8,
}

/// Process-local completion hook
pub type UnitHook = Box<dyn FnOnce(&UnitSnapshot) + Send>;

#[derive(Default)]
pub(crate) struct UnitHooks {
    pub(crate) on_complete: Option<UnitHook>,
    pub(crate) on_error: Option<UnitHook>,
}

impl UnitHooks {
    pub(crate) fn is_empty(&self) -> bool {
        self.on_complete.is_none() && self.on_error.is_none()
    }
}

/// Per-unit enqueue options
#[derive(Default)]
pub struct EnqueueOptions {
    pub(crate) priority: Option<i64>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) hooks: UnitHooks,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base priority; clamped to 1..=5.
    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Called once when the unit completes.
    pub fn on_complete(mut self, hook: impl FnOnce(&UnitSnapshot) + Send + 'static) -> Self {
        self.hooks.on_complete = Some(Box::new(hook));
        self
    }

    /// Called once when the unit fails terminally.
    pub fn on_error(mut self, hook: impl FnOnce(&UnitSnapshot) + Send + 'static) -> Self {
        self.hooks.on_error = Some(Box::new(hook));
        self
    }
}
