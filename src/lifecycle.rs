//! Generation Lifecycle
//!
//! Drives one generation request through validation, preparation and a
//! content-specific execution branch to a terminal phase. Phase changes go
//! through the [`transition`] table; the branch executors in the sub-modules
//! only produce events.
//!
//! Cancellation is cooperative: the machine checks its token before every step
//! and after every provider call returns, and never interrupts a call in flight.

use crate::config::QueueConfig;
use crate::error::GenerationError;
use crate::provider::{PreparedPrompt, ProviderPort};
use crate::types::{GenerationOutput, GenerationRequest};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod image;
mod text;
pub mod transition;
mod video;

pub use transition::{transition, Branch, Event, Phase, Step};

/// Tuning for a single lifecycle run
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Delay between video polls
    pub poll_interval: Duration,
    /// Poll ceiling before a video job times out
    pub max_polls: u32,
    /// Delay before a local retry re-enters the branch
    pub retry_delay: Duration,
    /// Retries this run may spend
    pub retry_budget: u32,
}

impl LifecycleOptions {
    pub fn from_config(config: &QueueConfig, retry_budget: u32) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_budget,
        }
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default(), QueueConfig::default().max_retries)
    }
}

/// Transient execution state for one run
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    pub phase: Phase,
    pub progress: u8,
    pub content: String,
    pub fragments: Vec<String>,
    pub provider_job_id: Option<String>,
    /// Local retries spent by this run
    pub retry_count: u32,
    pub poll_interval: Duration,
    pub polls: u32,
    pub last_error: Option<GenerationError>,
}

impl LifecycleContext {
    fn new(poll_interval: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            progress: 0,
            content: String::new(),
            fragments: Vec::new(),
            provider_job_id: None,
            retry_count: 0,
            poll_interval,
            polls: 0,
            last_error: None,
        }
    }

    fn reset_execution(&mut self) {
        self.progress = 0;
        self.content.clear();
        self.fragments.clear();
        self.provider_job_id = None;
        self.polls = 0;
        self.last_error = None;
    }
}

/// Live view of an in-flight lifecycle, safe to read from other tasks
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub phase: Phase,
    pub progress: u8,
    pub content: String,
    pub fragments: usize,
}

impl Default for LiveSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            progress: 0,
            content: String::new(),
            fragments: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LiveHandle(Arc<RwLock<LiveSnapshot>>);

impl LiveHandle {
    pub fn snapshot(&self) -> LiveSnapshot {
        self.0.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut LiveSnapshot)) {
        f(&mut self.0.write());
    }
}

/// Observable lifecycle change
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleUpdate {
    PhaseChanged { from: Phase, to: Phase },
    Progress(u8),
    Fragment(String),
}

pub type UpdateObserver = Arc<dyn Fn(&LifecycleUpdate) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum LifecycleOutcome {
    Completed(GenerationOutput),
    Failed(GenerationError),
    Cancelled,
}

/// What a finished run hands back to its driver
#[derive(Debug, Clone)]
pub struct LifecycleReport {
    pub outcome: LifecycleOutcome,
    /// Local retries spent; the scheduler charges them to the unit.
    pub retries: u32,
    pub progress: u8,
    pub provider_job_id: Option<String>,
}

pub struct LifecycleMachine {
    request: Arc<GenerationRequest>,
    provider: Arc<dyn ProviderPort>,
    options: LifecycleOptions,
    cancel: CancellationToken,
    context: LifecycleContext,
    prompt: Option<PreparedPrompt>,
    output: Option<GenerationOutput>,
    live: LiveHandle,
    observer: Option<UpdateObserver>,
}

impl LifecycleMachine {
    pub fn new(
        request: Arc<GenerationRequest>,
        provider: Arc<dyn ProviderPort>,
        options: LifecycleOptions,
    ) -> Self {
        let context = LifecycleContext::new(options.poll_interval);
        Self {
            request,
            provider,
            options,
            cancel: CancellationToken::new(),
            context,
            prompt: None,
            output: None,
            live: LiveHandle::default(),
            observer: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_live(mut self, live: LiveHandle) -> Self {
        self.live = live;
        self
    }

    pub fn with_observer(mut self, observer: UpdateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn phase(&self) -> Phase {
        self.context.phase
    }

    pub fn context(&self) -> &LifecycleContext {
        &self.context
    }

    pub fn live(&self) -> LiveHandle {
        self.live.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Restart a failed lifecycle from validation.
    ///
    /// Returns `false` and stays terminal when the phase is not `failed` or the
    /// retry budget is spent.
    pub fn retry(&mut self) -> bool {
        if self.context.phase != Phase::Failed
            || self.context.retry_count >= self.options.retry_budget
        {
            return false;
        }
        self.context.retry_count += 1;
        self.context.reset_execution();
        self.prompt = None;
        self.output = None;
        self.apply(Event::Retry)
    }

    /// Run until a terminal phase is reached.
    pub async fn run(&mut self) -> LifecycleReport {
        if self.context.phase == Phase::Idle {
            self.apply(Event::Start);
        }

        while !self.context.phase.is_terminal() {
            let event = if self.cancel.is_cancelled() {
                Event::Cancel
            } else {
                self.step().await
            };
            self.apply(event);
        }

        self.report()
    }

    async fn step(&mut self) -> Event {
        match self.context.phase {
            Phase::Validating => self.validate().await,
            Phase::Preparing => self.prepare().await,
            Phase::Executing(Step::StreamingText) => self.execute_streaming_text().await,
            Phase::Executing(Step::SyncText) => self.execute_sync_text().await,
            Phase::Executing(Step::SyncImage) => self.execute_sync_image().await,
            Phase::Executing(Step::VideoSubmitting) => self.execute_video_submit().await,
            Phase::Executing(Step::VideoPolling) => self.execute_video_poll().await,
            Phase::Retrying(branch) => self.retry_branch(branch).await,
            Phase::Idle => Event::Start,
            // Terminal phases never reach `step`.
            Phase::Completed | Phase::Failed | Phase::Cancelled => Event::Cancel,
        }
    }

    async fn validate(&mut self) -> Event {
        let capabilities = self.provider.capabilities();
        let content_type = self.request.content_type();
        if !capabilities.supports(content_type) {
            self.context.last_error = Some(GenerationError::Unsupported(format!(
                "{} generation on provider '{}'",
                content_type,
                self.provider.name()
            )));
            return Event::Invalid;
        }

        let result = self.provider.validate(&self.request).await;
        if self.cancel.is_cancelled() {
            return Event::Cancel;
        }
        match result {
            Ok(validation) if validation.is_valid => Event::Valid,
            Ok(validation) => {
                let errors = if validation.errors.is_empty() {
                    vec!["request rejected by provider".to_string()]
                } else {
                    validation.errors
                };
                self.context.last_error = Some(GenerationError::Validation(errors));
                Event::Invalid
            }
            Err(err) => {
                let err = match err {
                    GenerationError::Validation(_) => err,
                    other => GenerationError::validation(other.to_string()),
                };
                self.context.last_error = Some(err);
                Event::Invalid
            }
        }
    }

    async fn prepare(&mut self) -> Event {
        let result = self.provider.prepare_prompt(&self.request).await;
        if self.cancel.is_cancelled() {
            return Event::Cancel;
        }
        match result {
            Ok(prompt) => {
                self.prompt = Some(prompt);
                Event::Prepared(Branch::select(&self.request, &self.provider.capabilities()))
            }
            Err(err) => {
                let err = match err {
                    GenerationError::Preparation(_) => err,
                    other => GenerationError::Preparation(other.to_string()),
                };
                self.context.last_error = Some(err);
                Event::PrepareFailed
            }
        }
    }

    async fn retry_branch(&mut self, branch: Branch) -> Event {
        if self.context.retry_count >= self.options.retry_budget {
            return Event::RetryExhausted;
        }
        if !self.pause(self.options.retry_delay).await {
            return Event::Cancel;
        }
        self.context.retry_count += 1;
        debug!(
            request_id = %self.request.id,
            branch = ?branch,
            retry_count = self.context.retry_count,
            "Retrying execution branch"
        );
        Event::RetryGranted
    }

    /// Record an execution failure and pick the event for it.
    ///
    /// Only transient failures are retried locally; rate limits escalate so the
    /// scheduler can hold them behind the global backoff window.
    fn execution_failed(&mut self, err: GenerationError) -> Event {
        warn!(
            request_id = %self.request.id,
            phase = %self.context.phase,
            error = %err,
            "Execution step failed"
        );
        let class = err.class();
        self.context.last_error = Some(err);
        if class == crate::error::ErrorClass::Transient {
            Event::ExecutionFailed
        } else {
            Event::Fatal
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn prepared_prompt(&self) -> Result<PreparedPrompt, GenerationError> {
        self.prompt
            .clone()
            .ok_or_else(|| GenerationError::InvalidTransition("executing without a prompt".to_string()))
    }

    fn complete_with(&mut self, output: GenerationOutput) -> Event {
        self.output = Some(output);
        self.set_progress(100);
        Event::Succeeded
    }

    fn set_progress(&mut self, progress: u8) {
        let progress = progress.min(100);
        if progress <= self.context.progress {
            return;
        }
        self.context.progress = progress;
        self.live.update(|live| live.progress = progress);
        self.notify(LifecycleUpdate::Progress(progress));
    }

    fn push_fragment(&mut self, text: String) {
        self.context.content.push_str(&text);
        self.context.fragments.push(text.clone());
        let content = self.context.content.clone();
        let count = self.context.fragments.len();
        self.live.update(|live| {
            live.content = content;
            live.fragments = count;
        });
        self.notify(LifecycleUpdate::Fragment(text));
    }

    fn apply(&mut self, event: Event) -> bool {
        let from = self.context.phase;
        let Some(to) = transition(from, event) else {
            let err = GenerationError::InvalidTransition(format!("{:?} in phase {}", event, from));
            warn!(request_id = %self.request.id, error = %err, "Rejected lifecycle event");
            if !from.is_terminal() {
                self.context.last_error = Some(err);
                self.enter(from, Phase::Failed);
            }
            return false;
        };
        self.enter(from, to);
        true
    }

    fn enter(&mut self, from: Phase, to: Phase) {
        self.context.phase = to;
        self.live.update(|live| live.phase = to);
        debug!(
            request_id = %self.request.id,
            from = %from,
            to = %to,
            "Lifecycle transition"
        );
        if to.is_terminal() {
            info!(
                request_id = %self.request.id,
                phase = %to,
                retry_count = self.context.retry_count,
                "Lifecycle finished"
            );
        }
        self.notify(LifecycleUpdate::PhaseChanged { from, to });
    }

    fn notify(&self, update: LifecycleUpdate) {
        if let Some(observer) = &self.observer {
            observer(&update);
        }
    }

    fn report(&self) -> LifecycleReport {
        let outcome = match self.context.phase {
            Phase::Completed => match &self.output {
                Some(output) => LifecycleOutcome::Completed(output.clone()),
                None => LifecycleOutcome::Failed(GenerationError::InvalidTransition(
                    "completed without output".to_string(),
                )),
            },
            Phase::Cancelled => LifecycleOutcome::Cancelled,
            _ => LifecycleOutcome::Failed(self.context.last_error.clone().unwrap_or_else(|| {
                GenerationError::Provider("lifecycle failed without an error".to_string())
            })),
        };
        LifecycleReport {
            outcome,
            retries: self.context.retry_count,
            progress: self.context.progress,
            provider_job_id: self.context.provider_job_id.clone(),
        }
    }
}
