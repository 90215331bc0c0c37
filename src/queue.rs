//! Generation Queue
//!
//! Priority scheduling of generation requests with bounded concurrency,
//! priority aging, retries and a shared rate-limit backoff. Each admitted unit
//! runs one [`LifecycleMachine`](crate::lifecycle::LifecycleMachine).

mod events;
mod priority;
mod rate_limit;
mod scheduler;
mod stats;
mod unit;

pub use events::SchedulerEvent;
pub use priority::{effective_priority, order_candidates, AdmissionCandidate};
pub use rate_limit::{backoff_ms, RateLimitGovernor, RateLimitState, MAX_BACKOFF_MS};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use stats::{QueueStats, StatsAggregator, StatusCounts};
pub use unit::{EnqueueOptions, UnitHook, UnitSnapshot, UnitStatus};
