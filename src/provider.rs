//! Provider Port
//!
//! Capability-gated interface a generation lifecycle invokes to do real work:
//! validation, prompt preparation, text generation (whole or streamed), image
//! generation and asynchronous video jobs. Concrete API clients live outside
//! this crate; the scheduler only consumes the trait.

use crate::error::GenerationError;
use crate::types::{ContentType, GenerationRequest};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

pub mod echo;
pub mod registry;

pub use echo::EchoProvider;
pub use registry::ProviderRegistry;

/// What a provider can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub text: bool,
    pub streaming: bool,
    pub image: bool,
    pub video: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            text: true,
            streaming: true,
            image: true,
            video: true,
        }
    }

    pub fn text_only() -> Self {
        Self {
            text: true,
            streaming: false,
            image: false,
            video: false,
        }
    }

    pub fn supports(&self, content_type: ContentType) -> bool {
        match content_type {
            ContentType::Text => self.text,
            ContentType::Image => self.image,
            ContentType::Video => self.video,
        }
    }
}

/// Validation result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

/// Rendered prompt handed to the execution branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedPrompt {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub rendered_prompt: String,
}

/// One piece of a streamed text response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    /// Provider-reported completion estimate (0-100), if any.
    pub progress: Option<u8>,
}

impl TextFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Streaming text type
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<TextFragment, GenerationError>> + Send>>;

/// Progress callback for image generation (percent, 0-100)
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOutput {
    pub urls: Vec<String>,
    pub asset_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoJobHandle {
    pub job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoJobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPoll {
    pub status: VideoJobStatus,
    #[serde(default)]
    pub urls: Vec<String>,
    pub error: Option<String>,
}

impl VideoPoll {
    pub fn pending() -> Self {
        Self::with_status(VideoJobStatus::Pending)
    }

    pub fn processing() -> Self {
        Self::with_status(VideoJobStatus::Processing)
    }

    pub fn complete(urls: Vec<String>) -> Self {
        Self {
            status: VideoJobStatus::Complete,
            urls,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: VideoJobStatus::Failed,
            urls: Vec::new(),
            error: Some(error.into()),
        }
    }

    fn with_status(status: VideoJobStatus) -> Self {
        Self {
            status,
            urls: Vec::new(),
            error: None,
        }
    }
}

/// Provider port trait
///
/// Operations a provider does not support default to
/// [`GenerationError::Unsupported`]; implementors override only what their
/// [`Capabilities`] advertise.
#[async_trait]
pub trait ProviderPort: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn validate(&self, request: &GenerationRequest) -> Result<ValidationResult, GenerationError>;

    async fn prepare_prompt(&self, request: &GenerationRequest) -> Result<PreparedPrompt, GenerationError>;

    async fn generate_text(
        &self,
        _request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Unsupported("text generation".to_string()))
    }

    async fn stream_text(
        &self,
        _request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<FragmentStream, GenerationError> {
        Err(GenerationError::Unsupported("text streaming".to_string()))
    }

    async fn generate_image(
        &self,
        _request: &GenerationRequest,
        _prompt: &PreparedPrompt,
        _on_progress: Option<ProgressCallback>,
    ) -> Result<ImageOutput, GenerationError> {
        Err(GenerationError::Unsupported("image generation".to_string()))
    }

    async fn submit_video_job(
        &self,
        _request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<VideoJobHandle, GenerationError> {
        Err(GenerationError::Unsupported("video generation".to_string()))
    }

    async fn poll_video_job(
        &self,
        _request: &GenerationRequest,
        _job_id: &str,
    ) -> Result<VideoPoll, GenerationError> {
        Err(GenerationError::Unsupported("video generation".to_string()))
    }

    async fn cancel_video_job(&self, _job_id: &str) -> Result<bool, GenerationError> {
        Ok(false)
    }
}
