//! Completion provider implementations

pub mod anthropic;

use crate::stream::{CompletionEventStream, ResponseCollector};
use crate::{Error, Result, StreamRequest};
use async_trait::async_trait;
use futures::StreamExt;

/// Trait for LLM completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Stream a response for a full layered request
    async fn stream(&self, request: &StreamRequest) -> Result<CompletionEventStream>;

    /// Run a single prompt to completion and return the trimmed text.
    ///
    /// An empty completion is an error.
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        model_id: &str,
        max_output_tokens: u32,
    ) -> Result<String> {
        let request = StreamRequest::simple(system, prompt, model_id, max_output_tokens);
        let mut events = self.stream(&request).await?;

        let mut collector = ResponseCollector::new();
        while let Some(event) = events.next().await {
            collector.process_event(&event);
            if event.is_terminal() {
                break;
            }
        }

        let text = collector.finish()?.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::EmptyCompletion);
        }
        Ok(text)
    }
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
