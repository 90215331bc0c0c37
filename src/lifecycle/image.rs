//! Image branch: one generation call with provider progress callbacks.

use super::{Event, LifecycleMachine, LifecycleUpdate};
use crate::provider::ProgressCallback;
use crate::types::GenerationOutput;
use std::sync::Arc;

impl LifecycleMachine {
    pub(super) async fn execute_sync_image(&mut self) -> Event {
        let prompt = match self.prepared_prompt() {
            Ok(prompt) => prompt,
            Err(err) => return self.execution_failed(err),
        };

        // Callbacks arrive from inside the provider call, so they update the
        // live handle and observer directly instead of borrowing the machine.
        let live = self.live.clone();
        let observer = self.observer.clone();
        let on_progress: ProgressCallback = Arc::new(move |percent: u8| {
            let percent = percent.min(99);
            let mut advanced = false;
            live.update(|snapshot| {
                if percent > snapshot.progress {
                    snapshot.progress = percent;
                    advanced = true;
                }
            });
            if advanced {
                if let Some(observer) = &observer {
                    observer(&LifecycleUpdate::Progress(percent));
                }
            }
        });

        let result = self
            .provider
            .generate_image(&self.request, &prompt, Some(on_progress))
            .await;
        self.context.progress = self.context.progress.max(self.live.snapshot().progress);
        if self.cancel.is_cancelled() {
            return Event::Cancel;
        }
        match result {
            Ok(output) => self.complete_with(GenerationOutput::Image {
                urls: output.urls,
                asset_ids: output.asset_ids,
            }),
            Err(err) => self.execution_failed(err),
        }
    }
}
