//! Scripted completion provider for tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use strata_ai::{
    CompletionEventStream, CompletionProvider, Error, Result, StreamEvent, StreamRequest,
    UsageReport,
};

/// One scripted response
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Stream this text, then finish
    Text(String),
    /// Stream this text after a delay
    Delayed(Duration, String),
    /// Refuse the request before streaming
    Fail(String),
    /// Start streaming, then emit an error event
    StreamError(String),
    /// Never produce anything
    Hang,
}

impl MockReply {
    /// A text reply
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// A request-level failure
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

/// A request as the provider saw it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// System blocks joined with blank lines
    pub system: String,
    /// Text of the last turn
    pub prompt: String,
    pub model_id: String,
    pub max_output_tokens: u32,
    pub turns: usize,
}

/// Provider that answers from a queue of scripted replies and records every request.
///
/// Once the queue is empty it answers with the fallback text.
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<RecordedCall>>,
    fallback: String,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a provider with scripted replies
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            fallback: "mock summary".to_string(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue another reply
    pub fn push(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    /// Requests received so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Highest number of responses that were streaming at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, request: &StreamRequest) {
        let system = request
            .system
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = request
            .messages
            .last()
            .map(|t| t.text())
            .unwrap_or_default();
        self.calls.lock().push(RecordedCall {
            system,
            prompt,
            model_id: request.model_id.clone(),
            max_output_tokens: request.max_output_tokens,
            turns: request.messages.len(),
        });
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn stream(&self, request: &StreamRequest) -> Result<CompletionEventStream> {
        self.record(request);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockReply::Text(self.fallback.clone()));

        let (delay, text) = match reply {
            MockReply::Fail(message) => return Err(Error::api("mock_error", message)),
            MockReply::Hang => return Ok(Box::pin(futures::stream::pending::<StreamEvent>())),
            MockReply::StreamError(message) => {
                return Ok(Box::pin(futures::stream::iter(vec![
                    StreamEvent::TextDelta {
                        text: "partial".to_string(),
                    },
                    StreamEvent::Error { message },
                ])));
            }
            MockReply::Text(text) => (None, text),
            MockReply::Delayed(delay, text) => (Some(delay), text),
        };

        let usage = UsageReport {
            input_tokens: request.messages.iter().map(|t| t.text().len() as u32 / 4).sum(),
            output_tokens: text.len() as u32 / 4,
            ..Default::default()
        };
        let in_flight = self.in_flight.clone();
        let max_in_flight = self.max_in_flight.clone();

        Ok(Box::pin(async_stream::stream! {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);

            yield StreamEvent::TextDelta { text };
            yield StreamEvent::Usage { usage };
            yield StreamEvent::Done { stop_reason: Some("end_turn".to_string()) };
        }))
    }
}
