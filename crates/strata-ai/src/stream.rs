//! Streaming event types and utilities

use crate::error::{Error, Result};
use crate::types::UsageReport;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a completion streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Generated text
    TextDelta { text: String },
    /// Extended thinking text
    ThinkingDelta { thinking: String },
    /// Token usage for the whole request; a later report replaces an earlier one
    Usage { usage: UsageReport },
    /// Generation finished
    Done { stop_reason: Option<String> },
    /// Error occurred; no further events follow
    Error { message: String },
}

impl StreamEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// A stream of completion events
pub type CompletionEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A fully received completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedResponse {
    pub text: String,
    pub thinking: String,
    pub usage: UsageReport,
    pub stop_reason: Option<String>,
}

/// Accumulates streaming events into a complete response
#[derive(Debug, Default)]
pub struct ResponseCollector {
    response: CollectedResponse,
    error: Option<String>,
}

impl ResponseCollector {
    /// Create a new collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the response
    pub fn process_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => self.response.text.push_str(text),
            StreamEvent::ThinkingDelta { thinking } => self.response.thinking.push_str(thinking),
            StreamEvent::Usage { usage } => self.response.usage = *usage,
            StreamEvent::Done { stop_reason } => self.response.stop_reason = stop_reason.clone(),
            StreamEvent::Error { message } => self.error = Some(message.clone()),
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.response.text
    }

    /// Usage received so far
    pub fn usage(&self) -> UsageReport {
        self.response.usage
    }

    /// Finish collecting; an error event turns into `Err`
    pub fn finish(self) -> Result<CollectedResponse> {
        match self.error {
            Some(message) => Err(Error::Sse(message)),
            None => Ok(self.response),
        }
    }
}
