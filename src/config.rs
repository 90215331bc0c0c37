//! Configuration System
//!
//! Queue tuning, logging and provider defaults. Layered loading (defaults, user
//! config file, explicit file, environment) lives in [`ConfigLoader`];
//! runtime changes go through [`QueueConfigPatch`].

use crate::error::GenerationError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

mod loader;
mod sources;

pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenflowConfig {
    /// Scheduler tuning
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider used when a request does not name one
    #[serde(default)]
    pub default_provider: Option<String>,
}

impl GenflowConfig {
    pub fn validate(&self) -> Result<(), GenerationError> {
        self.queue.validate()
    }
}

/// Global scheduler tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum units in `processing` at once
    pub max_concurrent: usize,
    /// Base delay for retries and rate-limit backoff (milliseconds)
    pub retry_delay_ms: u64,
    /// Default retry budget per unit
    pub max_retries: u32,
    /// Aging bonus added to a queued unit's priority per minute waited
    pub priority_boost_per_minute: f64,
    /// Delay between video job polls (milliseconds)
    pub poll_interval_ms: u64,
    /// Polls before a video job times out
    pub max_polls: u32,
    /// Maximum non-terminal units (prevents memory exhaustion)
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            retry_delay_ms: 5000,
            max_retries: 3,
            priority_boost_per_minute: 0.5,
            poll_interval_ms: 2000,
            max_polls: 120,
            max_queue_size: 10000,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), GenerationError> {
        let mut errors = Vec::new();
        if self.max_concurrent == 0 {
            errors.push("max_concurrent must be at least 1");
        }
        if self.max_polls == 0 {
            errors.push("max_polls must be at least 1");
        }
        if self.max_queue_size == 0 {
            errors.push("max_queue_size must be at least 1");
        }
        if !self.priority_boost_per_minute.is_finite() || self.priority_boost_per_minute < 0.0 {
            errors.push("priority_boost_per_minute must be a non-negative number");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GenerationError::Config(errors.join("; ")))
        }
    }

    /// Merge a partial update, returning the validated result.
    pub fn merged(&self, patch: &QueueConfigPatch) -> Result<QueueConfig, GenerationError> {
        let mut next = self.clone();
        if let Some(v) = patch.max_concurrent {
            next.max_concurrent = v;
        }
        if let Some(v) = patch.retry_delay_ms {
            next.retry_delay_ms = v;
        }
        if let Some(v) = patch.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = patch.priority_boost_per_minute {
            next.priority_boost_per_minute = v;
        }
        if let Some(v) = patch.poll_interval_ms {
            next.poll_interval_ms = v;
        }
        if let Some(v) = patch.max_polls {
            next.max_polls = v;
        }
        if let Some(v) = patch.max_queue_size {
            next.max_queue_size = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial queue configuration update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueConfigPatch {
    pub max_concurrent: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub priority_boost_per_minute: Option<f64>,
    pub poll_interval_ms: Option<u64>,
    pub max_polls: Option<u32>,
    pub max_queue_size: Option<usize>,
}

impl QueueConfigPatch {
    pub fn max_concurrent(mut self, value: usize) -> Self {
        self.max_concurrent = Some(value);
        self
    }

    pub fn retry_delay_ms(mut self, value: u64) -> Self {
        self.retry_delay_ms = Some(value);
        self
    }

    pub fn max_retries(mut self, value: u32) -> Self {
        self.max_retries = Some(value);
        self
    }

    pub fn priority_boost_per_minute(mut self, value: f64) -> Self {
        self.priority_boost_per_minute = Some(value);
        self
    }

    pub fn poll_interval_ms(mut self, value: u64) -> Self {
        self.poll_interval_ms = Some(value);
        self
    }

    pub fn max_polls(mut self, value: u32) -> Self {
        self.max_polls = Some(value);
        self
    }
}
