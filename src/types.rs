//! Core request and identifier types shared by the lifecycle and the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unit ID for tracking a queued request through completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(u64);

impl UnitId {
    /// Generate the next unit ID (for internal use and testing)
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        UnitId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Base priority of a unit, always within `MIN..=MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;
    pub const DEFAULT: Priority = Priority(3);

    /// Clamp any integer into the valid priority range.
    pub fn clamped(value: i64) -> Self {
        Priority(value.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Kind of content a request produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
        };
        f.write_str(name)
    }
}

/// Which provider serves a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSelection {
    Explicit(String),
    #[default]
    Default,
}

/// Where the prompt comes from. Exactly one source per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptSource {
    Inline { prompt: String },
    Template { template_id: String },
    TemplateLabel { template_id: String, label: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TextParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
    pub guidance: Option<f32>,
    #[serde(default = "default_variants")]
    pub variants: u32,
}

fn default_variants() -> u32 {
    1
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            seed: None,
            guidance: None,
            variants: default_variants(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VideoParams {
    pub duration_secs: Option<u32>,
    pub aspect_ratio: Option<String>,
}

/// Type-specific parameters; the variant fixes the request's content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationParams {
    Text(TextParams),
    Image(ImageParams),
    Video(VideoParams),
}

/// Immutable generation request. Never mutated after enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: String,
    #[serde(default)]
    pub provider: ProviderSelection,
    pub model: String,
    pub prompt: PromptSource,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    pub params: GenerationParams,
}

impl GenerationRequest {
    fn new(id: impl Into<String>, model: impl Into<String>, prompt: PromptSource, params: GenerationParams) -> Self {
        Self {
            id: id.into(),
            provider: ProviderSelection::Default,
            model: model.into(),
            prompt,
            brand_id: None,
            variables: BTreeMap::new(),
            params,
        }
    }

    pub fn text(id: impl Into<String>, model: impl Into<String>, prompt: PromptSource) -> Self {
        Self::new(id, model, prompt, GenerationParams::Text(TextParams::default()))
    }

    pub fn image(id: impl Into<String>, model: impl Into<String>, prompt: PromptSource) -> Self {
        Self::new(id, model, prompt, GenerationParams::Image(ImageParams::default()))
    }

    pub fn video(id: impl Into<String>, model: impl Into<String>, prompt: PromptSource) -> Self {
        Self::new(id, model, prompt, GenerationParams::Video(VideoParams::default()))
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = ProviderSelection::Explicit(provider.into());
        self
    }

    pub fn with_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Toggle streaming. Only meaningful for text requests.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        if let GenerationParams::Text(ref mut params) = self.params {
            params.stream = stream;
        }
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn content_type(&self) -> ContentType {
        match self.params {
            GenerationParams::Text(_) => ContentType::Text,
            GenerationParams::Image(_) => ContentType::Image,
            GenerationParams::Video(_) => ContentType::Video,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(&self.params, GenerationParams::Text(p) if p.stream)
    }
}

/// Result of a completed generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationOutput {
    Text {
        content: String,
    },
    Image {
        urls: Vec<String>,
        asset_ids: Vec<String>,
    },
    Video {
        job_id: String,
        urls: Vec<String>,
    },
}

impl GenerationOutput {
    pub fn text_content(&self) -> Option<&str> {
        match self {
            GenerationOutput::Text { content } => Some(content),
            _ => None,
        }
    }
}
