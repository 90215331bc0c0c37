//! Concurrency and retry-budget properties of the scheduler under scripted
//! provider outcomes

use async_trait::async_trait;
use genflow::config::QueueConfig;
use genflow::error::GenerationError;
use genflow::provider::{
    Capabilities, PreparedPrompt, ProviderPort, ProviderRegistry, ValidationResult,
};
use genflow::queue::{EnqueueOptions, Scheduler, SchedulerEvent, UnitSnapshot, UnitStatus};
use genflow::types::{GenerationRequest, PromptSource, UnitId};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Success,
    Transient,
    RateLimited,
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        2 => Just(Outcome::Success),
        2 => Just(Outcome::Transient),
        1 => Just(Outcome::RateLimited),
    ]
}

/// Hands out one scripted outcome per call, keyed by request id. An exhausted
/// script succeeds.
struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedProvider {
    fn new(scripts: &[Vec<Outcome>]) -> Self {
        let scripts = scripts
            .iter()
            .enumerate()
            .map(|(i, script)| (request_id(i), script.iter().copied().collect()))
            .collect();
        Self {
            scripts: Mutex::new(scripts),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self, request_id: &str) -> u32 {
        self.calls.lock().get(request_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProviderPort for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::text_only()
    }

    async fn validate(&self, _request: &GenerationRequest) -> Result<ValidationResult, GenerationError> {
        Ok(ValidationResult::ok())
    }

    async fn prepare_prompt(&self, request: &GenerationRequest) -> Result<PreparedPrompt, GenerationError> {
        Ok(PreparedPrompt {
            system_prompt: None,
            user_prompt: request.id.clone(),
            rendered_prompt: request.id.clone(),
        })
    }

    async fn generate_text(
        &self,
        request: &GenerationRequest,
        _prompt: &PreparedPrompt,
    ) -> Result<String, GenerationError> {
        *self.calls.lock().entry(request.id.clone()).or_default() += 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let next = self
            .scripts
            .lock()
            .get_mut(&request.id)
            .and_then(|script| script.pop_front())
            .unwrap_or(Outcome::Success);
        match next {
            Outcome::Success => Ok(format!("text for {}", request.id)),
            Outcome::Transient => Err(GenerationError::Provider("upstream 503".to_string())),
            Outcome::RateLimited => Err(GenerationError::RateLimit("too many requests".to_string())),
        }
    }
}

fn request_id(index: usize) -> String {
    format!("unit-{}", index)
}

/// Failures before the first success; the whole script when it never succeeds.
fn leading_failures(script: &[Outcome]) -> u32 {
    script
        .iter()
        .take_while(|outcome| **outcome != Outcome::Success)
        .count() as u32
}

struct Observed {
    max_processing: usize,
    retry_violations: Vec<String>,
    finals: Vec<UnitSnapshot>,
    calls: Vec<u32>,
}

async fn drive(
    scripts: &[Vec<Outcome>],
    max_concurrent: usize,
    max_retries: u32,
) -> Observed {
    let provider = Arc::new(ScriptedProvider::new(scripts));
    let registry = ProviderRegistry::new().with_provider(provider.clone());
    let config = QueueConfig {
        max_concurrent,
        max_retries,
        retry_delay_ms: 100,
        ..QueueConfig::default()
    };
    let scheduler = Scheduler::start(registry, config).unwrap();
    let mut events = scheduler.subscribe();

    let ids: Vec<UnitId> = (0..scripts.len())
        .map(|i| {
            let request = GenerationRequest::text(
                request_id(i),
                "scripted-model",
                PromptSource::Inline {
                    prompt: request_id(i),
                },
            );
            scheduler.enqueue(request, EnqueueOptions::new()).unwrap()
        })
        .collect();

    let mut observed = Observed {
        max_processing: 0,
        retry_violations: Vec::new(),
        finals: Vec::new(),
        calls: Vec::new(),
    };
    let mut terminal = 0;
    while terminal < ids.len() {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        if let SchedulerEvent::Admitted { .. } = event {
            observed.max_processing = observed
                .max_processing
                .max(scheduler.stats().counts.processing);
        }
        for unit in scheduler.units() {
            if unit.retry_count > unit.max_retries {
                observed
                    .retry_violations
                    .push(format!("{} at {}/{}", unit.id, unit.retry_count, unit.max_retries));
            }
        }
        if let SchedulerEvent::Retrying { retry_count, .. } = event {
            if retry_count > max_retries {
                observed
                    .retry_violations
                    .push(format!("requeued at {}/{}", retry_count, max_retries));
            }
        }
        if event.is_terminal() {
            terminal += 1;
        }
    }
    for (i, id) in ids.iter().enumerate() {
        if let Some(unit) = scheduler.unit(*id) {
            observed.finals.push(unit);
        }
        observed.calls.push(provider.calls(&request_id(i)));
    }
    scheduler.shutdown();
    observed
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_scheduler_respects_concurrency_and_retry_budget(
        max_concurrent in 1usize..4,
        max_retries in 0u32..4,
        scripts in prop::collection::vec(prop::collection::vec(outcome(), 0..6), 1..7),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let observed = runtime.block_on(drive(&scripts, max_concurrent, max_retries));

        prop_assert!(observed.max_processing <= max_concurrent);
        prop_assert!(observed.retry_violations.is_empty(), "{:?}", observed.retry_violations);

        prop_assert_eq!(observed.finals.len(), scripts.len());
        for (i, unit) in observed.finals.iter().enumerate() {
            let failures = leading_failures(&scripts[i]);
            prop_assert!(unit.retry_count <= unit.max_retries);
            if failures > max_retries {
                // Failing again at the budget ends the unit; it is never requeued.
                prop_assert_eq!(unit.status, UnitStatus::Failed);
                prop_assert_eq!(unit.retry_count, max_retries);
                prop_assert_eq!(observed.calls[i], max_retries + 1);
            } else {
                prop_assert_eq!(unit.status, UnitStatus::Completed);
                prop_assert_eq!(unit.retry_count, failures);
                prop_assert_eq!(observed.calls[i], failures + 1);
            }
        }
    }
}
