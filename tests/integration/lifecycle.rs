//! Integration tests for the generation lifecycle state machine

use crate::integration::test_utils::{text_request, MockProvider};
use genflow::error::GenerationError;
use genflow::lifecycle::{
    LifecycleMachine, LifecycleOptions, LifecycleOutcome, LifecycleUpdate, Phase, Step,
    UpdateObserver,
};
use genflow::provider::VideoPoll;
use genflow::types::{GenerationOutput, GenerationRequest, PromptSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn options(retry_budget: u32) -> LifecycleOptions {
    LifecycleOptions {
        poll_interval: Duration::from_millis(2000),
        max_polls: 120,
        retry_delay: Duration::from_millis(5000),
        retry_budget,
    }
}

fn machine(provider: &Arc<MockProvider>, request: GenerationRequest, opts: LifecycleOptions) -> LifecycleMachine {
    LifecycleMachine::new(Arc::new(request), provider.clone(), opts)
}

fn recording_observer() -> (UpdateObserver, Arc<Mutex<Vec<LifecycleUpdate>>>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let observer: UpdateObserver = Arc::new(move |update: &LifecycleUpdate| {
        sink.lock().push(update.clone());
    });
    (observer, updates)
}

fn video_request() -> GenerationRequest {
    GenerationRequest::video(
        "clip",
        "mock-video",
        PromptSource::Inline {
            prompt: "a sunrise over the bay".to_string(),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_sync_text_success() {
    let provider = Arc::new(MockProvider::new("mock"));
    let mut machine = machine(&provider, text_request("note"), options(3));

    let report = machine.run().await;

    assert_eq!(machine.phase(), Phase::Completed);
    assert_eq!(report.retries, 0);
    assert_eq!(report.progress, 100);
    match report.outcome {
        LifecycleOutcome::Completed(GenerationOutput::Text { content }) => {
            assert_eq!(content, "text for note");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_phase_sequence_for_sync_text() {
    let provider = Arc::new(MockProvider::new("mock"));
    let (observer, updates) = recording_observer();
    let mut machine = machine(&provider, text_request("note"), options(3)).with_observer(observer);

    machine.run().await;

    let phases: Vec<Phase> = updates
        .lock()
        .iter()
        .filter_map(|u| match u {
            LifecycleUpdate::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(phases.first(), Some(&Phase::Validating));
    assert_eq!(phases.get(1), Some(&Phase::Preparing));
    assert_eq!(phases.last(), Some(&Phase::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_video_polls_until_complete() {
    let provider = Arc::new(MockProvider::new("mock").with_video_polls(vec![
        Ok(VideoPoll::processing()),
        Ok(VideoPoll::processing()),
        Ok(VideoPoll::processing()),
        Ok(VideoPoll::complete(vec!["https://cdn.example/clip.mp4".to_string()])),
    ]));
    let (observer, updates) = recording_observer();
    let mut machine = machine(&provider, video_request(), options(3)).with_observer(observer);

    let report = machine.run().await;

    let progress: Vec<u8> = updates
        .lock()
        .iter()
        .filter_map(|u| match u {
            LifecycleUpdate::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![10, 20, 30, 100]);
    assert_eq!(progress.iter().filter(|p| **p < 100).count(), 3);
    assert_eq!(machine.context().polls, 4);
    assert_eq!(report.provider_job_id.as_deref(), Some("job-clip"));
    match report.outcome {
        LifecycleOutcome::Completed(GenerationOutput::Video { job_id, urls }) => {
            assert_eq!(job_id, "job-clip");
            assert_eq!(urls, vec!["https://cdn.example/clip.mp4".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_video_poll_errors_count_toward_ceiling() {
    let provider = Arc::new(MockProvider::new("mock").with_video_polls(vec![
        Err(GenerationError::Io("connection refused".to_string())),
        Ok(VideoPoll::complete(vec!["https://cdn.example/clip.mp4".to_string()])),
    ]));
    let mut machine = machine(&provider, video_request(), options(3));

    let report = machine.run().await;

    assert!(matches!(report.outcome, LifecycleOutcome::Completed(_)));
    assert_eq!(machine.context().polls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_video_times_out_and_cancels_job() {
    let provider = Arc::new(MockProvider::new("mock"));
    let mut opts = options(3);
    opts.max_polls = 3;
    let mut machine = machine(&provider, video_request(), opts);

    let report = machine.run().await;

    assert_eq!(machine.phase(), Phase::Failed);
    assert_eq!(report.retries, 0);
    match report.outcome {
        LifecycleOutcome::Failed(GenerationError::Timeout { job_id, polls }) => {
            assert_eq!(job_id, "job-clip");
            assert_eq!(polls, 3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(provider.cancelled_jobs(), vec!["job-clip".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_video_failure_is_terminal() {
    let provider = Arc::new(
        MockProvider::new("mock").with_video_polls(vec![Ok(VideoPoll::failed("content policy"))]),
    );
    let mut machine = machine(&provider, video_request(), options(3));

    let report = machine.run().await;

    assert_eq!(machine.phase(), Phase::Failed);
    assert_eq!(report.retries, 0);
    match report.outcome {
        LifecycleOutcome::Failed(err) => assert!(err.to_string().contains("content policy")),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_skips_provider_calls() {
    let provider = Arc::new(MockProvider::new("mock").rejecting());
    let mut machine = machine(&provider, text_request("note"), options(3));

    let report = machine.run().await;

    assert_eq!(machine.phase(), Phase::Failed);
    match report.outcome {
        LifecycleOutcome::Failed(GenerationError::Validation(errors)) => {
            assert_eq!(errors, vec!["model is not available".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_retry_after_preparation_failure() {
    let provider = Arc::new(MockProvider::new("mock").with_prepare_failures(1));
    let mut machine = machine(&provider, text_request("note"), options(1));

    let report = machine.run().await;
    assert_eq!(machine.phase(), Phase::Failed);
    assert!(matches!(
        report.outcome,
        LifecycleOutcome::Failed(GenerationError::Preparation(_))
    ));

    assert!(machine.retry());
    assert_eq!(machine.phase(), Phase::Validating);
    let report = machine.run().await;
    assert_eq!(machine.phase(), Phase::Completed);
    assert_eq!(report.retries, 1);

    assert!(!machine.retry(), "completed lifecycles cannot retry");
}

#[tokio::test(start_paused = true)]
async fn test_retry_refused_when_budget_spent() {
    let provider = Arc::new(MockProvider::new("mock").with_prepare_failures(5));
    let mut machine = machine(&provider, text_request("note"), options(0));

    machine.run().await;
    assert_eq!(machine.phase(), Phase::Failed);
    assert!(!machine.retry());
    assert_eq!(machine.phase(), Phase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_locally() {
    let provider = Arc::new(MockProvider::new("mock").with_text_results(vec![Err(
        GenerationError::Provider("connection reset".to_string()),
    )]));
    let (observer, updates) = recording_observer();
    let mut machine = machine(&provider, text_request("note"), options(2)).with_observer(observer);

    let report = machine.run().await;

    assert!(matches!(report.outcome, LifecycleOutcome::Completed(_)));
    assert_eq!(report.retries, 1);
    assert_eq!(provider.calls().len(), 2);
    assert!(updates.lock().iter().any(|u| matches!(
        u,
        LifecycleUpdate::PhaseChanged {
            to: Phase::Retrying(_),
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_not_retried_locally() {
    let provider = Arc::new(MockProvider::new("mock").with_text_results(vec![Err(
        GenerationError::RateLimit("429".to_string()),
    )]));
    let mut machine = machine(&provider, text_request("note"), options(3));

    let report = machine.run().await;

    assert_eq!(report.retries, 0);
    assert_eq!(provider.calls().len(), 1);
    match report.outcome {
        LifecycleOutcome::Failed(err) => assert!(err.is_rate_limit()),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_run() {
    let provider = Arc::new(MockProvider::new("mock"));
    let mut machine = machine(&provider, text_request("note"), options(3));

    machine.cancel();
    let report = machine.run().await;

    assert_eq!(machine.phase(), Phase::Cancelled);
    assert!(matches!(report.outcome, LifecycleOutcome::Cancelled));
    assert!(provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_video_polling_cancels_job() {
    let provider = Arc::new(MockProvider::new("mock"));
    let mut machine = machine(&provider, video_request(), options(3));
    let token = machine.cancel_token();
    let live = machine.live();

    let handle = tokio::spawn(async move {
        let report = machine.run().await;
        (machine.phase(), report)
    });
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(live.snapshot().phase, Phase::Executing(Step::VideoPolling));
    token.cancel();

    let (phase, report) = handle.await.unwrap();
    assert_eq!(phase, Phase::Cancelled);
    assert!(matches!(report.outcome, LifecycleOutcome::Cancelled));
    assert_eq!(provider.cancelled_jobs(), vec!["job-clip".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_image_branch_reports_progress() {
    let provider = Arc::new(MockProvider::new("mock"));
    let request = GenerationRequest::image(
        "banner",
        "mock-image",
        PromptSource::Template {
            template_id: "hero".to_string(),
        },
    );
    let mut machine = machine(&provider, request, options(3));
    let live = machine.live();

    let report = machine.run().await;

    assert_eq!(live.snapshot().progress, 100);
    match report.outcome {
        LifecycleOutcome::Completed(GenerationOutput::Image { urls, asset_ids }) => {
            assert_eq!(urls, vec!["mock://banner/0.png".to_string()]);
            assert_eq!(asset_ids, vec!["asset-banner".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}
