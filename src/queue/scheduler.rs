//! Priority scheduler
//!
//! One loop task owns admission. It wakes on enqueue, completion, resume, retry
//! deadlines and the end of a rate-limit window, ranks eligible queued units by
//! effective priority and starts at most `max_concurrent` lifecycles at once.
//! Lifecycles run on their own tasks and report back over a channel, so all
//! bookkeeping happens on the loop under a single lock.

use super::events::SchedulerEvent;
use super::priority::{effective_priority, order_candidates, AdmissionCandidate};
use super::rate_limit::RateLimitGovernor;
use super::stats::{QueueStats, StatsAggregator, StatusCounts};
use super::unit::{EnqueueOptions, QueuedUnit, UnitHook, UnitHooks, UnitSnapshot, UnitStatus};
use crate::config::{QueueConfig, QueueConfigPatch};
use crate::error::{ErrorClass, GenerationError};
use crate::history::HistorySink;
use crate::lifecycle::{
    LifecycleMachine, LifecycleOptions, LifecycleOutcome, LifecycleReport, LifecycleUpdate,
    LiveHandle, LiveSnapshot, UpdateObserver,
};
use crate::provider::ProviderRegistry;
use crate::types::{GenerationRequest, Priority, UnitId};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Handle to a running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

pub struct SchedulerBuilder {
    providers: ProviderRegistry,
    config: QueueConfig,
    history: Option<Arc<dyn HistorySink>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    /// Validate the configuration and spawn the scheduler loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<Scheduler, GenerationError> {
        self.config.validate()?;

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (active, _) = watch::channel(0usize);

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::new(self.config)),
            wake: Notify::new(),
            events,
            active,
            providers: self.providers,
            history: self.history,
            shutdown: CancellationToken::new(),
            completions: completion_tx,
        });

        tokio::spawn(run_loop(shared.clone(), completion_rx));
        info!("Scheduler started");
        Ok(Scheduler { shared })
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Notify,
    events: broadcast::Sender<SchedulerEvent>,
    /// Queued plus processing units
    active: watch::Sender<usize>,
    providers: ProviderRegistry,
    history: Option<Arc<dyn HistorySink>>,
    shutdown: CancellationToken,
    completions: mpsc::UnboundedSender<Completion>,
}

struct SchedulerState {
    /// Insertion order
    units: Vec<QueuedUnit>,
    hooks: HashMap<UnitId, UnitHooks>,
    waiters: HashMap<UnitId, Vec<oneshot::Sender<UnitSnapshot>>>,
    running: HashMap<UnitId, RunningUnit>,
    config: QueueConfig,
    governor: RateLimitGovernor,
    stats: StatsAggregator,
    paused: bool,
}

struct RunningUnit {
    cancel: CancellationToken,
    live: LiveHandle,
}

struct Completion {
    unit_id: UnitId,
    report: LifecycleReport,
}

/// A unit that reached a terminal status, with everything owed to the caller.
struct Finished {
    snapshot: UnitSnapshot,
    hook: Option<UnitHook>,
    waiters: Vec<oneshot::Sender<UnitSnapshot>>,
}

impl SchedulerState {
    fn new(config: QueueConfig) -> Self {
        Self {
            units: Vec::new(),
            hooks: HashMap::new(),
            waiters: HashMap::new(),
            running: HashMap::new(),
            config,
            governor: RateLimitGovernor::new(),
            stats: StatsAggregator::new(),
            paused: false,
        }
    }

    fn index_of(&self, unit_id: UnitId) -> Option<usize> {
        self.units.iter().position(|unit| unit.id == unit_id)
    }

    fn counts(&self) -> StatusCounts {
        StatusCounts::from_statuses(self.units.iter().map(|unit| unit.status))
    }

    fn emit(&mut self, events: &broadcast::Sender<SchedulerEvent>, event: SchedulerEvent) {
        self.stats.observe(&event, Instant::now());
        // No receivers is fine.
        let _ = events.send(event);
    }

    fn snapshot_at(&self, index: usize) -> UnitSnapshot {
        let unit = &self.units[index];
        let live = self
            .running
            .get(&unit.id)
            .map(|running| running.live.snapshot().progress);
        unit.snapshot(live)
    }

    /// Detach the hook and waiters owed for a terminal unit.
    fn take_finished(&mut self, index: usize) -> Finished {
        let snapshot = self.units[index].snapshot(None);
        let hooks = self.hooks.remove(&snapshot.id).unwrap_or_default();
        let hook = match snapshot.status {
            UnitStatus::Completed => hooks.on_complete,
            UnitStatus::Failed => hooks.on_error,
            _ => None,
        };
        let waiters = self.waiters.remove(&snapshot.id).unwrap_or_default();
        Finished {
            snapshot,
            hook,
            waiters,
        }
    }
}

impl Scheduler {
    pub fn builder(providers: ProviderRegistry) -> SchedulerBuilder {
        SchedulerBuilder {
            providers,
            config: QueueConfig::default(),
            history: None,
        }
    }

    /// Start with the given configuration and no history sink.
    pub fn start(providers: ProviderRegistry, config: QueueConfig) -> Result<Self, GenerationError> {
        Self::builder(providers).config(config).start()
    }

    /// Add a request to the queue.
    pub fn enqueue(
        &self,
        request: GenerationRequest,
        options: EnqueueOptions,
    ) -> Result<UnitId, GenerationError> {
        self.shared.enqueue(request, options, None)
    }

    /// Enqueue and wait until the unit reaches any terminal status.
    pub async fn enqueue_and_wait(
        &self,
        request: GenerationRequest,
        options: EnqueueOptions,
    ) -> Result<UnitSnapshot, GenerationError> {
        let (tx, rx) = oneshot::channel();
        let unit_id = self.shared.enqueue(request, options, Some(tx))?;
        rx.await.map_err(|_| {
            GenerationError::SchedulerStopped(format!("{} dropped before it finished", unit_id))
        })
    }

    /// Wait until no unit is queued or processing.
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<(), GenerationError> {
        let mut active = self.shared.active.subscribe();
        let idle = async move {
            loop {
                if *active.borrow_and_update() == 0 {
                    return Ok(());
                }
                if active.changed().await.is_err() {
                    return Err(GenerationError::SchedulerStopped(
                        "activity channel closed".to_string(),
                    ));
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, idle).await.map_err(|_| {
                GenerationError::WaitTimeout {
                    millis: limit.as_millis() as u64,
                }
            })?,
            None => idle.await,
        }
    }

    /// Cancel a queued or processing unit.
    ///
    /// A queued unit is cancelled at once. A processing unit is flagged and its
    /// lifecycle stops at its next cancellation point. Returns `false` for
    /// terminal or unknown units.
    pub fn cancel(&self, unit_id: UnitId) -> bool {
        let (cancelled, finished) = {
            let mut state = self.shared.state.lock();
            self.shared.cancel_locked(&mut state, unit_id)
        };
        self.shared.after_change(finished);
        cancelled
    }

    /// Cancel every queued and processing unit. Returns how many were affected.
    pub fn cancel_all(&self) -> usize {
        let mut finished = Vec::new();
        let mut cancelled = 0;
        {
            let mut state = self.shared.state.lock();
            let ids: Vec<UnitId> = state
                .units
                .iter()
                .filter(|unit| unit.status.is_active())
                .map(|unit| unit.id)
                .collect();
            for unit_id in ids {
                let (hit, done) = self.shared.cancel_locked(&mut state, unit_id);
                if hit {
                    cancelled += 1;
                }
                finished.extend(done);
            }
        }
        self.shared.after_change(finished);
        info!(cancelled, "Cancelled all active units");
        cancelled
    }

    /// Stop admitting. Processing units continue.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            state.paused = true;
            state.emit(&self.shared.events, SchedulerEvent::Paused);
            info!("Scheduler paused");
        }
    }

    pub fn resume(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
            state.emit(&self.shared.events, SchedulerEvent::Resumed);
        }
        info!("Scheduler resumed");
        self.shared.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Change the base priority of a queued unit. Returns `false` otherwise.
    pub fn set_priority(&self, unit_id: UnitId, priority: i64) -> bool {
        let mut state = self.shared.state.lock();
        let Some(index) = state.index_of(unit_id) else {
            return false;
        };
        let unit = &mut state.units[index];
        if unit.status != UnitStatus::Queued {
            return false;
        }
        unit.priority = Priority::clamped(priority);
        debug!(unit_id = %unit_id, priority = unit.priority.value(), "Priority updated");
        drop(state);
        self.shared.wake.notify_one();
        true
    }

    /// Merge a partial configuration; applies to subsequent admissions.
    pub fn set_config(&self, patch: QueueConfigPatch) -> Result<QueueConfig, GenerationError> {
        let config = {
            let mut state = self.shared.state.lock();
            let merged = state.config.merged(&patch)?;
            state.config = merged.clone();
            merged
        };
        info!(
            max_concurrent = config.max_concurrent,
            max_retries = config.max_retries,
            retry_delay_ms = config.retry_delay_ms,
            "Scheduler configuration updated"
        );
        self.shared.wake.notify_one();
        Ok(config)
    }

    pub fn config(&self) -> QueueConfig {
        self.shared.state.lock().config.clone()
    }

    /// Drop completed, failed and cancelled units. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut state = self.shared.state.lock();
        let before = state.units.len();
        state.units.retain(|unit| !unit.status.is_terminal());
        let removed = before - state.units.len();
        debug!(removed, "Cleared finished units");
        removed
    }

    /// Cancel everything, discard every unit and zero the statistics.
    pub fn reset(&self) {
        {
            let mut state = self.shared.state.lock();
            for running in state.running.values() {
                running.cancel.cancel();
            }
            state.units.clear();
            state.hooks.clear();
            state.waiters.clear();
            state.governor.record_success();
            state.stats.reset();
            state.paused = false;
            self.shared.publish_active(&state);
        }
        info!("Scheduler reset");
    }

    /// Enqueue a copy of a failed or cancelled unit's request.
    pub fn resubmit(&self, unit_id: UnitId) -> Result<UnitId, GenerationError> {
        let (request, priority, max_retries) = {
            let state = self.shared.state.lock();
            let index = state
                .index_of(unit_id)
                .ok_or(GenerationError::UnitNotFound(unit_id))?;
            let unit = &state.units[index];
            if !matches!(unit.status, UnitStatus::Failed | UnitStatus::Cancelled) {
                return Err(GenerationError::InvalidTransition(format!(
                    "{} is {:?}; only failed or cancelled units can be resubmitted",
                    unit_id, unit.status
                )));
            }
            (
                (*unit.request).clone(),
                unit.priority,
                unit.max_retries,
            )
        };
        let options = EnqueueOptions::new()
            .priority(priority.value() as i64)
            .max_retries(max_retries);
        let new_id = self.shared.enqueue(request, options, None)?;
        info!(unit_id = %unit_id, new_unit_id = %new_id, "Unit resubmitted");
        Ok(new_id)
    }

    pub fn unit(&self, unit_id: UnitId) -> Option<UnitSnapshot> {
        let state = self.shared.state.lock();
        state.index_of(unit_id).map(|index| state.snapshot_at(index))
    }

    /// Every unit, in insertion order.
    pub fn units(&self) -> Vec<UnitSnapshot> {
        let state = self.shared.state.lock();
        (0..state.units.len())
            .map(|index| state.snapshot_at(index))
            .collect()
    }

    /// Phase, progress and partial content of a processing unit.
    pub fn live(&self, unit_id: UnitId) -> Option<LiveSnapshot> {
        let state = self.shared.state.lock();
        state
            .running
            .get(&unit_id)
            .map(|running| running.live.snapshot())
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        let now = Instant::now();
        state.stats.snapshot(
            state.counts(),
            state.governor.state(now),
            state.paused,
            now,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Stop the loop and cancel running lifecycles. Queued units stay queued.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!("Scheduler shutting down");
            self.shared.shutdown.cancel();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

impl Shared {
    fn enqueue(
        &self,
        request: GenerationRequest,
        options: EnqueueOptions,
        waiter: Option<oneshot::Sender<UnitSnapshot>>,
    ) -> Result<UnitId, GenerationError> {
        let unit_id = {
            let mut state = self.state.lock();
            let active = state.counts().active();
            if active >= state.config.max_queue_size {
                warn!(active, "Queue full, rejecting request");
                return Err(GenerationError::QueueFull(state.config.max_queue_size));
            }

            let unit_id = UnitId::next();
            let priority = options
                .priority
                .map(Priority::clamped)
                .unwrap_or_default();
            let max_retries = options.max_retries.unwrap_or(state.config.max_retries);
            let unit = QueuedUnit::new(
                unit_id,
                Arc::new(request),
                priority,
                max_retries,
                Instant::now(),
            );
            debug!(
                unit_id = %unit_id,
                request_id = %unit.request.id,
                priority = priority.value(),
                content_type = %unit.request.content_type(),
                "Unit enqueued"
            );
            state.units.push(unit);
            if !options.hooks.is_empty() {
                state.hooks.insert(unit_id, options.hooks);
            }
            if let Some(waiter) = waiter {
                state.waiters.entry(unit_id).or_default().push(waiter);
            }
            state.emit(&self.events, SchedulerEvent::Enqueued { unit_id, priority });
            self.publish_active(&state);
            unit_id
        };
        self.wake.notify_one();
        Ok(unit_id)
    }

    fn cancel_locked(
        &self,
        state: &mut SchedulerState,
        unit_id: UnitId,
    ) -> (bool, Option<Finished>) {
        let Some(index) = state.index_of(unit_id) else {
            return (false, None);
        };
        match state.units[index].status {
            UnitStatus::Queued => {
                let unit = &mut state.units[index];
                unit.status = UnitStatus::Cancelled;
                unit.completed_at = Some(Utc::now());
                info!(unit_id = %unit_id, "Queued unit cancelled");
                state.emit(&self.events, SchedulerEvent::Cancelled { unit_id });
                (true, Some(state.take_finished(index)))
            }
            UnitStatus::Processing => {
                let unit = &mut state.units[index];
                if !unit.cancel_requested {
                    unit.cancel_requested = true;
                    if let Some(running) = state.running.get(&unit_id) {
                        running.cancel.cancel();
                    }
                    info!(unit_id = %unit_id, "Cancellation requested for processing unit");
                }
                (true, None)
            }
            _ => (false, None),
        }
    }

    fn publish_active(&self, state: &SchedulerState) {
        self.active.send_replace(state.counts().active());
    }

    /// Deliver hooks and waiters outside the lock, then wake the loop.
    fn after_change(&self, finished: impl IntoIterator<Item = Finished>) {
        {
            let state = self.state.lock();
            self.publish_active(&state);
        }
        for done in finished {
            self.deliver(done);
        }
        self.wake.notify_one();
    }

    fn deliver(&self, finished: Finished) {
        let Finished {
            snapshot,
            hook,
            waiters,
        } = finished;

        if let Some(hook) = hook {
            hook(&snapshot);
        }
        for waiter in waiters {
            let _ = waiter.send(snapshot.clone());
        }
        if let Some(history) = &self.history {
            let history = history.clone();
            tokio::spawn(async move {
                let unit_id = snapshot.id;
                if let Err(e) = history.record(snapshot).await {
                    error!(unit_id = %unit_id, error = %e, "Failed to record unit history");
                }
            });
        }
    }

    /// Admit eligible units. Returns when the loop should look again even if
    /// nothing else wakes it.
    fn tick(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut finished = Vec::new();
        let next_wake = {
            let mut state = self.state.lock();
            if state.paused {
                return None;
            }
            if let Some(remaining) = state.governor.remaining(now) {
                debug!(remaining_ms = remaining.as_millis() as u64, "Rate-limit window active");
                return Some(now + remaining);
            }

            let next_eligible = state
                .units
                .iter()
                .filter(|unit| unit.status == UnitStatus::Queued)
                .filter_map(|unit| unit.eligible_at)
                .filter(|at| *at > now)
                .min();

            let processing = state
                .units
                .iter()
                .filter(|unit| unit.status == UnitStatus::Processing)
                .count();
            let slots = state.config.max_concurrent.saturating_sub(processing);
            if slots > 0 {
                let boost = state.config.priority_boost_per_minute;
                let mut candidates: Vec<AdmissionCandidate> = state
                    .units
                    .iter()
                    .filter(|unit| unit.is_eligible(now))
                    .map(|unit| AdmissionCandidate {
                        unit_id: unit.id,
                        effective_priority: effective_priority(
                            unit.priority,
                            now.saturating_duration_since(unit.enqueued),
                            boost,
                        ),
                        enqueued: unit.enqueued,
                    })
                    .collect();
                order_candidates(&mut candidates);

                for candidate in candidates.into_iter().take(slots) {
                    finished.extend(self.admit(&mut state, candidate, now));
                }
            }
            next_eligible
        };
        if !finished.is_empty() {
            self.after_change(finished);
        }
        next_wake
    }

    /// Start a lifecycle for `candidate`. Returns the unit if it failed before
    /// starting.
    fn admit(
        &self,
        state: &mut SchedulerState,
        candidate: AdmissionCandidate,
        now: Instant,
    ) -> Option<Finished> {
        let unit_id = candidate.unit_id;
        let index = state.index_of(unit_id)?;
        let config = state.config.clone();

        let unit = &mut state.units[index];
        let wait = now.saturating_duration_since(unit.queued_since);
        unit.status = UnitStatus::Processing;
        unit.started = Some(now);
        unit.started_at = Some(Utc::now());
        unit.last_wait = wait;
        unit.eligible_at = None;
        unit.cancel_requested = false;
        unit.progress = 0;
        let request = unit.request.clone();
        let budget = unit.max_retries.saturating_sub(unit.retry_count);
        let retry_count = unit.retry_count;

        state.emit(
            &self.events,
            SchedulerEvent::Admitted {
                unit_id,
                effective_priority: candidate.effective_priority,
                wait_ms: wait.as_millis() as u64,
            },
        );

        let provider = match self.providers.resolve(&request.provider) {
            Ok(provider) => provider,
            Err(e) => {
                let err = GenerationError::validation(e.to_string());
                warn!(unit_id = %unit_id, error = %err, "No provider for unit");
                let unit = &mut state.units[index];
                unit.status = UnitStatus::Failed;
                unit.completed_at = Some(Utc::now());
                unit.error = Some(err.to_string());
                unit.error_class = Some(err.class());
                state.emit(
                    &self.events,
                    SchedulerEvent::Failed {
                        unit_id,
                        retry_count,
                        error: err.to_string(),
                    },
                );
                return Some(state.take_finished(index));
            }
        };

        info!(
            unit_id = %unit_id,
            request_id = %request.id,
            provider = provider.name(),
            effective_priority = candidate.effective_priority,
            wait_ms = wait.as_millis() as u64,
            retry_count,
            "Unit admitted"
        );

        let cancel = self.shutdown.child_token();
        let live = LiveHandle::default();
        state.running.insert(
            unit_id,
            RunningUnit {
                cancel: cancel.clone(),
                live: live.clone(),
            },
        );

        let options = LifecycleOptions::from_config(&config, budget);
        let events = self.events.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let observer: UpdateObserver = Arc::new(move |update: &LifecycleUpdate| {
                let event = match update {
                    LifecycleUpdate::PhaseChanged { to, .. } => SchedulerEvent::PhaseChanged {
                        unit_id,
                        phase: *to,
                    },
                    LifecycleUpdate::Progress(progress) => SchedulerEvent::Progress {
                        unit_id,
                        progress: *progress,
                    },
                    LifecycleUpdate::Fragment(text) => SchedulerEvent::Fragment {
                        unit_id,
                        text: text.clone(),
                    },
                };
                let _ = events.send(event);
            });

            let mut machine = LifecycleMachine::new(request, provider, options)
                .with_cancellation(cancel)
                .with_live(live)
                .with_observer(observer);
            let report = machine.run().await;
            if completions.send(Completion { unit_id, report }).is_err() {
                debug!(unit_id = %unit_id, "Scheduler gone before unit finished");
            }
        });
        None
    }

    /// Apply a lifecycle report to its unit.
    fn finish(&self, completion: Completion) {
        let Completion { unit_id, report } = completion;
        let now = Instant::now();
        let mut finished = Vec::new();
        {
            let mut state = self.state.lock();
            let running = state.running.remove(&unit_id);
            let Some(index) = state.index_of(unit_id) else {
                debug!(unit_id = %unit_id, "Report for discarded unit ignored");
                return;
            };
            let config = state.config.clone();

            let unit = &mut state.units[index];
            unit.retry_count = unit
                .retry_count
                .saturating_add(report.retries)
                .min(unit.max_retries);
            unit.progress = running
                .map(|running| running.live.snapshot().progress)
                .unwrap_or(0)
                .max(report.progress);
            let processing = unit
                .started
                .map(|started| now.saturating_duration_since(started))
                .unwrap_or_default();
            let wait = unit.last_wait;
            let cancel_requested = unit.cancel_requested;

            match report.outcome {
                LifecycleOutcome::Completed(output) if !cancel_requested => {
                    unit.status = UnitStatus::Completed;
                    unit.completed_at = Some(Utc::now());
                    unit.result = Some(output);
                    unit.error = None;
                    unit.error_class = None;
                    unit.progress = 100;
                    let retries = unit.retry_count;
                    state.governor.record_success();
                    info!(
                        unit_id = %unit_id,
                        processing_ms = processing.as_millis() as u64,
                        retries,
                        "Unit completed"
                    );
                    state.emit(
                        &self.events,
                        SchedulerEvent::Completed {
                            unit_id,
                            wait_ms: wait.as_millis() as u64,
                            processing_ms: processing.as_millis() as u64,
                        },
                    );
                    finished.push(state.take_finished(index));
                }
                LifecycleOutcome::Completed(_) | LifecycleOutcome::Cancelled => {
                    unit.status = UnitStatus::Cancelled;
                    unit.completed_at = Some(Utc::now());
                    info!(unit_id = %unit_id, "Processing unit cancelled");
                    state.emit(&self.events, SchedulerEvent::Cancelled { unit_id });
                    finished.push(state.take_finished(index));
                }
                LifecycleOutcome::Failed(err) => {
                    finished.extend(self.fail_or_retry(&mut state, index, err, &config, now));
                }
            }
            self.publish_active(&state);
        }
        for done in finished {
            self.deliver(done);
        }
    }

    fn fail_or_retry(
        &self,
        state: &mut SchedulerState,
        index: usize,
        err: GenerationError,
        config: &QueueConfig,
        now: Instant,
    ) -> Option<Finished> {
        let unit_id = state.units[index].id;
        let class = err.class();
        let message = err.to_string();

        let mut delay = Duration::from_millis(config.retry_delay_ms);
        if class == ErrorClass::RateLimit {
            delay = state.governor.record_rate_limit(config.retry_delay_ms, now);
            let consecutive_errors = state.governor.consecutive_errors();
            warn!(
                unit_id = %unit_id,
                backoff_ms = delay.as_millis() as u64,
                consecutive_errors,
                "Rate limit detected, pausing admissions"
            );
            state.emit(
                &self.events,
                SchedulerEvent::RateLimited {
                    unit_id,
                    backoff_ms: delay.as_millis() as u64,
                    consecutive_errors,
                },
            );
        }

        let unit = &mut state.units[index];
        unit.error = Some(message.clone());
        unit.error_class = Some(class);

        if unit.cancel_requested {
            unit.status = UnitStatus::Cancelled;
            unit.completed_at = Some(Utc::now());
            state.emit(&self.events, SchedulerEvent::Cancelled { unit_id });
            return Some(state.take_finished(index));
        }

        if class.is_retryable() && unit.retry_count < unit.max_retries {
            unit.retry_count += 1;
            unit.status = UnitStatus::Queued;
            unit.started = None;
            unit.started_at = None;
            unit.queued_since = now;
            unit.eligible_at = Some(now + delay);
            unit.progress = 0;
            let retry_count = unit.retry_count;
            let max_retries = unit.max_retries;
            warn!(
                unit_id = %unit_id,
                retry_count,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Unit failed, requeued for retry"
            );
            state.emit(
                &self.events,
                SchedulerEvent::Retrying {
                    unit_id,
                    retry_count,
                    delay_ms: delay.as_millis() as u64,
                    error: message,
                },
            );
            return None;
        }

        unit.status = UnitStatus::Failed;
        unit.completed_at = Some(Utc::now());
        let retry_count = unit.retry_count;
        error!(
            unit_id = %unit_id,
            retry_count,
            error_class = ?class,
            error = %message,
            "Unit failed"
        );
        state.emit(
            &self.events,
            SchedulerEvent::Failed {
                unit_id,
                retry_count,
                error: message,
            },
        );
        Some(state.take_finished(index))
    }
}

async fn run_loop(shared: Arc<Shared>, mut completions: mpsc::UnboundedReceiver<Completion>) {
    debug!("Scheduler loop running");
    let mut wake_at = shared.tick();
    loop {
        let deadline = async {
            match wake_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            Some(completion) = completions.recv() => {
                shared.finish(completion);
                while let Ok(completion) = completions.try_recv() {
                    shared.finish(completion);
                }
            }
            _ = shared.wake.notified() => {}
            _ = deadline => {}
        }
        wake_at = shared.tick();
    }
    info!("Scheduler loop stopped");
}
