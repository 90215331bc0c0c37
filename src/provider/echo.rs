//! Offline echo provider.
//!
//! Renders inline prompts with `{{variable}}` substitution and echoes them back
//! as generated content. Used by the CLI dry-run and for local smoke checks.

use crate::error::GenerationError;
use crate::provider::{
    Capabilities, FragmentStream, ImageOutput, PreparedPrompt, ProgressCallback, ProviderPort,
    TextFragment, ValidationResult, VideoJobHandle, VideoPoll,
};
use crate::types::{GenerationParams, GenerationRequest, PromptSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct EchoProvider {
    name: String,
    /// Number of `processing` polls before a video job completes.
    video_ticks: u32,
    video_jobs: Mutex<HashMap<String, u32>>,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self::named("echo")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            video_ticks: 3,
            video_jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_video_ticks(mut self, ticks: u32) -> Self {
        self.video_ticks = ticks;
        self
    }

    fn render(request: &GenerationRequest) -> String {
        let template = match &request.prompt {
            PromptSource::Inline { prompt } => prompt.clone(),
            PromptSource::Template { template_id } => format!("[template {}]", template_id),
            PromptSource::TemplateLabel { template_id, label } => {
                format!("[template {}#{}]", template_id, label)
            }
        };
        request
            .variables
            .iter()
            .fold(template, |acc, (name, value)| {
                let replacement = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                acc.replace(&format!("{{{{{}}}}}", name), &replacement)
            })
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPort for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn validate(&self, request: &GenerationRequest) -> Result<ValidationResult, GenerationError> {
        let mut errors = Vec::new();
        if request.model.trim().is_empty() {
            errors.push("model is required".to_string());
        }
        if let PromptSource::Inline { prompt } = &request.prompt {
            if prompt.trim().is_empty() {
                errors.push("prompt is empty".to_string());
            }
        }
        if let GenerationParams::Image(params) = &request.params {
            if params.variants == 0 {
                errors.push("variants must be at least 1".to_string());
            }
        }
        if errors.is_empty() {
            Ok(ValidationResult::ok())
        } else {
            Ok(ValidationResult::invalid(errors))
        }
    }

    async fn prepare_prompt(&self, request: &GenerationRequest) -> Result<PreparedPrompt, GenerationError> {
        let user_prompt = Self::render(request);
        let system_prompt = request
            .brand_id
            .as_ref()
            .map(|brand| format!("Write in the voice of brand {}.", brand));
        let rendered_prompt = match &system_prompt {
            Some(system) => format!("{}\n\n{}", system, user_prompt),
            None => user_prompt.clone(),
        };
        Ok(PreparedPrompt {
            system_prompt,
            user_prompt,
            rendered_prompt,
        })
    }

    async fn generate_text(
        &self,
        _request: &GenerationRequest,
        prompt: &PreparedPrompt,
    ) -> Result<String, GenerationError> {
        Ok(prompt.user_prompt.clone())
    }

    async fn stream_text(
        &self,
        _request: &GenerationRequest,
        prompt: &PreparedPrompt,
    ) -> Result<FragmentStream, GenerationError> {
        let words: Vec<String> = prompt
            .user_prompt
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let total = words.len().max(1);
        let fragments = words.into_iter().enumerate().map(move |(i, word)| {
            let progress = ((i + 1) * 100 / total).min(99) as u8;
            Ok(TextFragment::new(word).with_progress(progress))
        });
        Ok(Box::pin(futures::stream::iter(fragments)))
    }

    async fn generate_image(
        &self,
        request: &GenerationRequest,
        _prompt: &PreparedPrompt,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ImageOutput, GenerationError> {
        let variants = match &request.params {
            GenerationParams::Image(params) => params.variants.max(1),
            _ => 1,
        };
        let mut urls = Vec::new();
        let mut asset_ids = Vec::new();
        for n in 0..variants {
            urls.push(format!("echo://{}/image/{}/{}", self.name, request.id, n));
            asset_ids.push(format!("{}-{}", request.id, n));
            if let Some(callback) = &on_progress {
                callback(((n + 1) * 100 / variants) as u8);
            }
        }
        Ok(ImageOutput { urls, asset_ids })
    }

    async fn submit_video_job(
        &self,
        request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<VideoJobHandle, GenerationError> {
        let job_id = format!("{}-video-{}", self.name, request.id);
        self.video_jobs.lock().insert(job_id.clone(), 0);
        Ok(VideoJobHandle { job_id })
    }

    async fn poll_video_job(
        &self,
        _request: &GenerationRequest,
        job_id: &str,
    ) -> Result<VideoPoll, GenerationError> {
        let mut jobs = self.video_jobs.lock();
        let ticks = jobs
            .get_mut(job_id)
            .ok_or_else(|| GenerationError::Provider(format!("unknown video job {}", job_id)))?;
        if *ticks < self.video_ticks {
            *ticks += 1;
            return Ok(VideoPoll::processing());
        }
        jobs.remove(job_id);
        Ok(VideoPoll::complete(vec![format!(
            "echo://{}/video/{}",
            self.name, job_id
        )]))
    }

    async fn cancel_video_job(&self, job_id: &str) -> Result<bool, GenerationError> {
        Ok(self.video_jobs.lock().remove(job_id).is_some())
    }
}
