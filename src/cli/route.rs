//! CLI route: run context and command dispatch.

use crate::cli::parse::Commands;
use crate::cli::presentation::{format_config, format_run_json, format_run_text};
use crate::config::{ConfigLoader, GenflowConfig, QueueConfigPatch};
use crate::error::GenerationError;
use crate::history::{HistorySink, JsonlHistory};
use crate::provider::{EchoProvider, ProviderRegistry};
use crate::queue::{EnqueueOptions, QueueStats, Scheduler, UnitSnapshot};
use crate::types::GenerationRequest;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One entry of a `run` request file
#[derive(Debug, Deserialize)]
pub struct RequestSpec {
    #[serde(flatten)]
    pub request: GenerationRequest,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl RequestSpec {
    fn into_parts(self) -> (GenerationRequest, EnqueueOptions) {
        let mut options = EnqueueOptions::new();
        if let Some(priority) = self.priority {
            options = options.priority(priority);
        }
        if let Some(max_retries) = self.max_retries {
            options = options.max_retries(max_retries);
        }
        (self.request, options)
    }
}

/// Runtime context for CLI execution: the effective configuration.
pub struct RunContext {
    config: GenflowConfig,
    config_path: Option<PathBuf>,
}

impl RunContext {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, GenerationError> {
        let config = ConfigLoader::load(config_path.as_deref())?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn from_config(config: GenflowConfig) -> Self {
        Self {
            config,
            config_path: None,
        }
    }

    pub fn config(&self) -> &GenflowConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, GenerationError> {
        match command {
            Commands::Run {
                requests,
                format,
                max_concurrent,
                timeout_secs,
                history,
            } => {
                let (units, stats) = self.run_requests(
                    requests,
                    *max_concurrent,
                    Duration::from_secs(*timeout_secs),
                    history.as_deref(),
                )?;
                match format.as_str() {
                    "json" => format_run_json(&units, &stats),
                    _ => Ok(format_run_text(&units, &stats)),
                }
            }
            Commands::Config { format } => {
                if let Some(path) = &self.config_path {
                    info!(path = %path.display(), "Rendering configuration");
                }
                format_config(&self.config, format)
            }
        }
    }

    /// Providers available to the CLI: the echo provider, optionally under the
    /// configured default name as well.
    pub fn provider_registry(&self) -> Result<ProviderRegistry, GenerationError> {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider::new()));
        if let Some(name) = &self.config.default_provider {
            if registry.get(name).is_none() {
                registry.register(Arc::new(EchoProvider::named(name.clone())));
            }
            registry.set_default(name)?;
        }
        Ok(registry)
    }

    fn run_requests(
        &self,
        path: &Path,
        max_concurrent: Option<usize>,
        timeout: Duration,
        history: Option<&Path>,
    ) -> Result<(Vec<UnitSnapshot>, QueueStats), GenerationError> {
        let specs = load_requests(path)?;
        let mut queue_config = self.config.queue.clone();
        if let Some(max_concurrent) = max_concurrent {
            queue_config =
                queue_config.merged(&QueueConfigPatch::default().max_concurrent(max_concurrent))?;
        }
        let registry = self.provider_registry()?;
        let history = history.map(JsonlHistory::new);

        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| GenerationError::Io(format!("Failed to create runtime: {}", e)))?;
        rt.block_on(async move {
            let scheduler = Scheduler::start(registry, queue_config)?;
            info!(count = specs.len(), "Enqueueing requests");
            for spec in specs {
                let (request, options) = spec.into_parts();
                scheduler.enqueue(request, options)?;
            }

            let drained = scheduler.wait_for_idle(Some(timeout)).await;
            let units = scheduler.units();
            let stats = scheduler.stats();
            scheduler.shutdown();
            drained?;

            if let Some(history) = history {
                for unit in &units {
                    history.record(unit.clone()).await?;
                }
                info!(path = %history.path().display(), records = units.len(), "History written");
            }
            Ok((units, stats))
        })
    }
}

pub fn load_requests(path: &Path) -> Result<Vec<RequestSpec>, GenerationError> {
    let body = std::fs::read_to_string(path).map_err(|e| {
        GenerationError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&body).map_err(|e| {
        GenerationError::Config(format!("Invalid request file {}: {}", path.display(), e))
    })
}
