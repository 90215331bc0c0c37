//! Text branches: single-shot generation and fragment streaming.

use super::{Event, LifecycleMachine};
use crate::types::GenerationOutput;
use futures::StreamExt;
use tracing::debug;

impl LifecycleMachine {
    pub(super) async fn execute_sync_text(&mut self) -> Event {
        let prompt = match self.prepared_prompt() {
            Ok(prompt) => prompt,
            Err(err) => return self.execution_failed(err),
        };
        let result = self.provider.generate_text(&self.request, &prompt).await;
        if self.cancel.is_cancelled() {
            return Event::Cancel;
        }
        match result {
            Ok(content) => {
                self.context.content = content.clone();
                self.complete_with(GenerationOutput::Text { content })
            }
            Err(err) => self.execution_failed(err),
        }
    }

    /// Consume the provider stream fragment by fragment.
    ///
    /// The cancellation token is checked after every fragment; once it fires no
    /// further fragments are pulled from the provider.
    pub(super) async fn execute_streaming_text(&mut self) -> Event {
        let prompt = match self.prepared_prompt() {
            Ok(prompt) => prompt,
            Err(err) => return self.execution_failed(err),
        };
        self.context.content.clear();
        self.context.fragments.clear();

        let mut stream = match self.provider.stream_text(&self.request, &prompt).await {
            Ok(stream) => stream,
            Err(err) => return self.execution_failed(err),
        };
        if self.cancel.is_cancelled() {
            return Event::Cancel;
        }

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    self.push_fragment(fragment.text);
                    if let Some(progress) = fragment.progress {
                        // 100 is reserved for completion.
                        self.set_progress(progress.min(99));
                    }
                }
                Err(err) => return self.execution_failed(err),
            }
            if self.cancel.is_cancelled() {
                debug!(
                    request_id = %self.request.id,
                    fragments = self.context.fragments.len(),
                    "Stream abandoned after cancellation"
                );
                return Event::Cancel;
            }
        }

        let content = self.context.content.clone();
        self.complete_with(GenerationOutput::Text { content })
    }
}
