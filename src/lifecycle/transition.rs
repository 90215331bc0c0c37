//! Lifecycle phases, events and the `(phase, event) -> phase` table.

use crate::types::{ContentType, GenerationRequest};
use crate::provider::Capabilities;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution sub-flow, selected once per lifecycle after preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    StreamingText,
    SyncText,
    SyncImage,
    AsyncVideo,
}

impl Branch {
    /// First executing step of the branch.
    pub fn entry(self) -> Step {
        match self {
            Branch::StreamingText => Step::StreamingText,
            Branch::SyncText => Step::SyncText,
            Branch::SyncImage => Step::SyncImage,
            Branch::AsyncVideo => Step::VideoSubmitting,
        }
    }

    /// Pick the branch for a request, evaluated in a fixed order.
    ///
    /// Streaming falls back to the sync text branch when the provider cannot stream.
    pub fn select(request: &GenerationRequest, capabilities: &Capabilities) -> Branch {
        match request.content_type() {
            ContentType::Text if request.is_streaming() && capabilities.streaming => {
                Branch::StreamingText
            }
            ContentType::Text => Branch::SyncText,
            ContentType::Image => Branch::SyncImage,
            ContentType::Video => Branch::AsyncVideo,
        }
    }
}

/// Concrete step inside `executing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    StreamingText,
    SyncText,
    SyncImage,
    VideoSubmitting,
    VideoPolling,
}

impl Step {
    pub fn branch(self) -> Branch {
        match self {
            Step::StreamingText => Branch::StreamingText,
            Step::SyncText => Branch::SyncText,
            Step::SyncImage => Branch::SyncImage,
            Step::VideoSubmitting | Step::VideoPolling => Branch::AsyncVideo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "phase", content = "step", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Validating,
    Preparing,
    Executing(Step),
    Retrying(Branch),
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Validating => f.write_str("validating"),
            Phase::Preparing => f.write_str("preparing"),
            Phase::Executing(step) => write!(f, "executing:{:?}", step),
            Phase::Retrying(branch) => write!(f, "retrying:{:?}", branch),
            Phase::Completed => f.write_str("completed"),
            Phase::Failed => f.write_str("failed"),
            Phase::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Valid,
    Invalid,
    Prepared(Branch),
    PrepareFailed,
    /// Video job accepted by the provider.
    Submitted,
    /// Video job still running.
    Pending,
    Succeeded,
    /// Execution failure eligible for a local retry.
    ExecutionFailed,
    /// Execution failure that must not be retried locally.
    Fatal,
    RetryGranted,
    RetryExhausted,
    Cancel,
    /// Explicit user retry of a failed lifecycle.
    Retry,
}

/// Transition table. `None` means the event is not accepted in that phase.
pub fn transition(phase: Phase, event: Event) -> Option<Phase> {
    match (phase, event) {
        (Phase::Idle, Event::Start) => Some(Phase::Validating),
        (Phase::Validating, Event::Valid) => Some(Phase::Preparing),
        (Phase::Validating, Event::Invalid) => Some(Phase::Failed),
        (Phase::Preparing, Event::Prepared(branch)) => Some(Phase::Executing(branch.entry())),
        (Phase::Preparing, Event::PrepareFailed) => Some(Phase::Failed),
        (Phase::Executing(Step::VideoSubmitting), Event::Submitted) => {
            Some(Phase::Executing(Step::VideoPolling))
        }
        (Phase::Executing(Step::VideoPolling), Event::Pending) => {
            Some(Phase::Executing(Step::VideoPolling))
        }
        (Phase::Executing(_), Event::Succeeded) => Some(Phase::Completed),
        (Phase::Executing(step), Event::ExecutionFailed) => match step {
            // A broken stream or a provider-reported job failure has nothing to re-enter.
            Step::StreamingText | Step::VideoPolling => Some(Phase::Failed),
            other => Some(Phase::Retrying(other.branch())),
        },
        (Phase::Executing(_), Event::Fatal) => Some(Phase::Failed),
        (Phase::Retrying(branch), Event::RetryGranted) => Some(Phase::Executing(branch.entry())),
        (Phase::Retrying(_), Event::RetryExhausted) => Some(Phase::Failed),
        (Phase::Failed, Event::Retry) => Some(Phase::Validating),
        (phase, Event::Cancel) if !phase.is_terminal() => Some(Phase::Cancelled),
        _ => None,
    }
}
