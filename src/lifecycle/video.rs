//! Video branch: submit an asynchronous job, then poll it to completion.

use super::{Event, LifecycleMachine};
use crate::error::GenerationError;
use crate::provider::VideoJobStatus;
use crate::types::GenerationOutput;
use tracing::{debug, warn};

/// Progress added per `processing` poll, capped below completion.
const POLL_PROGRESS_STEP: u8 = 10;
const POLL_PROGRESS_CEILING: u8 = 95;

impl LifecycleMachine {
    pub(super) async fn execute_video_submit(&mut self) -> Event {
        let prompt = match self.prepared_prompt() {
            Ok(prompt) => prompt,
            Err(err) => return self.execution_failed(err),
        };
        let result = self.provider.submit_video_job(&self.request, &prompt).await;
        match result {
            Ok(handle) => {
                debug!(
                    request_id = %self.request.id,
                    job_id = %handle.job_id,
                    "Video job submitted"
                );
                self.context.provider_job_id = Some(handle.job_id);
                self.context.polls = 0;
                if self.cancel.is_cancelled() {
                    self.cancel_provider_job().await;
                    return Event::Cancel;
                }
                Event::Submitted
            }
            Err(_) if self.cancel.is_cancelled() => Event::Cancel,
            Err(err) => self.execution_failed(err),
        }
    }

    /// One poll cycle: wait the interval, poll once, map the status to an event.
    pub(super) async fn execute_video_poll(&mut self) -> Event {
        let Some(job_id) = self.context.provider_job_id.clone() else {
            return self.execution_failed(GenerationError::InvalidTransition(
                "polling without a video job".to_string(),
            ));
        };

        if self.context.polls >= self.options.max_polls {
            self.context.last_error = Some(GenerationError::Timeout {
                job_id,
                polls: self.context.polls,
            });
            self.cancel_provider_job().await;
            return Event::Fatal;
        }

        if !self.pause(self.context.poll_interval).await {
            self.cancel_provider_job().await;
            return Event::Cancel;
        }
        self.context.polls += 1;

        let result = self.provider.poll_video_job(&self.request, &job_id).await;
        if self.cancel.is_cancelled() {
            self.cancel_provider_job().await;
            return Event::Cancel;
        }

        match result {
            Ok(poll) => match poll.status {
                VideoJobStatus::Pending => Event::Pending,
                VideoJobStatus::Processing => {
                    let next = self
                        .context
                        .progress
                        .saturating_add(POLL_PROGRESS_STEP)
                        .min(POLL_PROGRESS_CEILING);
                    self.set_progress(next);
                    Event::Pending
                }
                VideoJobStatus::Complete => self.complete_with(GenerationOutput::Video {
                    job_id,
                    urls: poll.urls,
                }),
                VideoJobStatus::Failed => {
                    let message = poll
                        .error
                        .unwrap_or_else(|| format!("video job {} failed", job_id));
                    self.execution_failed(GenerationError::Provider(message))
                }
            },
            Err(err) => {
                // A failed poll request says nothing about the job itself; the
                // poll ceiling still bounds how long this can go on.
                warn!(
                    request_id = %self.request.id,
                    job_id = %job_id,
                    poll = self.context.polls,
                    error = %err,
                    "Video poll request failed"
                );
                Event::Pending
            }
        }
    }

    async fn cancel_provider_job(&self) {
        let Some(job_id) = self.context.provider_job_id.as_deref() else {
            return;
        };
        if let Err(err) = self.provider.cancel_video_job(job_id).await {
            warn!(
                request_id = %self.request.id,
                job_id = %job_id,
                error = %err,
                "Failed to cancel provider video job"
            );
        }
    }
}
