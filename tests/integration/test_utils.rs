//! Shared test utilities for integration tests
//!
//! [`MockProvider`] is a scripted provider: text results, video polls, delays
//! and failures are queued up front, and every call is recorded so tests can
//! assert on order and concurrency.

use async_trait::async_trait;
use futures::StreamExt;
use genflow::error::GenerationError;
use genflow::provider::{
    Capabilities, FragmentStream, ImageOutput, PreparedPrompt, ProgressCallback, ProviderPort,
    ProviderRegistry, TextFragment, ValidationResult, VideoJobHandle, VideoPoll,
};
use genflow::types::{GenerationRequest, PromptSource};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct MockProvider {
    name: String,
    capabilities: Capabilities,
    text_script: Mutex<VecDeque<Result<String, GenerationError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Duration,
    fragments: Vec<String>,
    fragment_delay: Duration,
    pulled_fragments: Arc<AtomicUsize>,
    video_script: Mutex<VecDeque<Result<VideoPoll, GenerationError>>>,
    cancelled_jobs: Mutex<Vec<String>>,
    prepare_failures: AtomicU32,
    rejecting: bool,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capabilities: Capabilities::all(),
            text_script: Mutex::new(VecDeque::new()),
            delays: Mutex::new(HashMap::new()),
            default_delay: Duration::ZERO,
            fragments: Vec::new(),
            fragment_delay: Duration::ZERO,
            pulled_fragments: Arc::new(AtomicUsize::new(0)),
            video_script: Mutex::new(VecDeque::new()),
            cancelled_jobs: Mutex::new(Vec::new()),
            prepare_failures: AtomicU32::new(0),
            rejecting: false,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Results handed out by successive text/image calls; defaults to success.
    pub fn with_text_results(self, results: Vec<Result<String, GenerationError>>) -> Self {
        *self.text_script.lock() = results.into();
        self
    }

    pub fn with_delay(self, request_id: &str, delay: Duration) -> Self {
        self.delays.lock().insert(request_id.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_stream(mut self, fragments: &[&str], delay: Duration) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self.fragment_delay = delay;
        self
    }

    pub fn with_video_polls(self, polls: Vec<Result<VideoPoll, GenerationError>>) -> Self {
        *self.video_script.lock() = polls.into();
        self
    }

    pub fn with_prepare_failures(self, failures: u32) -> Self {
        self.prepare_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.rejecting = true;
        self
    }

    /// Request ids of every generation call, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn pulled_fragments(&self) -> usize {
        self.pulled_fragments.load(Ordering::SeqCst)
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled_jobs.lock().clone()
    }

    async fn generation_call(&self, request: &GenerationRequest) -> Option<Result<String, GenerationError>> {
        self.calls.lock().push(request.id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .lock()
            .get(&request.id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.text_script.lock().pop_front()
    }
}

#[async_trait]
impl ProviderPort for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn validate(&self, _request: &GenerationRequest) -> Result<ValidationResult, GenerationError> {
        if self.rejecting {
            return Ok(ValidationResult::invalid(vec!["model is not available".to_string()]));
        }
        Ok(ValidationResult::ok())
    }

    async fn prepare_prompt(&self, request: &GenerationRequest) -> Result<PreparedPrompt, GenerationError> {
        let remaining = self.prepare_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.prepare_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GenerationError::Preparation("template store unavailable".to_string()));
        }
        let user_prompt = match &request.prompt {
            PromptSource::Inline { prompt } => prompt.clone(),
            PromptSource::Template { template_id } => template_id.clone(),
            PromptSource::TemplateLabel { template_id, label } => {
                format!("{}#{}", template_id, label)
            }
        };
        Ok(PreparedPrompt {
            system_prompt: None,
            rendered_prompt: user_prompt.clone(),
            user_prompt,
        })
    }

    async fn generate_text(
        &self,
        request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<String, GenerationError> {
        self.generation_call(request)
            .await
            .unwrap_or_else(|| Ok(format!("text for {}", request.id)))
    }

    async fn stream_text(
        &self,
        request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<FragmentStream, GenerationError> {
        self.calls.lock().push(request.id.clone());
        let pulled = self.pulled_fragments.clone();
        let delay = self.fragment_delay;
        let total = self.fragments.len().max(1);
        let stream = futures::stream::iter(self.fragments.clone().into_iter().enumerate()).then(
            move |(index, text)| {
                let pulled = pulled.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    pulled.fetch_add(1, Ordering::SeqCst);
                    Ok(TextFragment::new(text).with_progress(((index + 1) * 100 / total) as u8))
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn generate_image(
        &self,
        request: &GenerationRequest,
        _prompt: &PreparedPrompt,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ImageOutput, GenerationError> {
        if let Some(callback) = &on_progress {
            callback(50);
        }
        self.generation_call(request).await.unwrap_or_else(|| Ok(String::new()))?;
        Ok(ImageOutput {
            urls: vec![format!("mock://{}/0.png", request.id)],
            asset_ids: vec![format!("asset-{}", request.id)],
        })
    }

    async fn submit_video_job(
        &self,
        request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<VideoJobHandle, GenerationError> {
        self.calls.lock().push(request.id.clone());
        Ok(VideoJobHandle {
            job_id: format!("job-{}", request.id),
        })
    }

    async fn poll_video_job(
        &self,
        _request: &GenerationRequest,
        _job_id: &str,
    ) -> Result<VideoPoll, GenerationError> {
        self.video_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(VideoPoll::pending()))
    }

    async fn cancel_video_job(&self, job_id: &str) -> Result<bool, GenerationError> {
        self.cancelled_jobs.lock().push(job_id.to_string());
        Ok(true)
    }
}

pub fn registry_with(provider: &Arc<MockProvider>) -> ProviderRegistry {
    ProviderRegistry::new().with_provider(provider.clone())
}

pub fn text_request(id: &str) -> GenerationRequest {
    GenerationRequest::text(
        id,
        "mock-model",
        PromptSource::Inline {
            prompt: format!("write {}", id),
        },
    )
}
