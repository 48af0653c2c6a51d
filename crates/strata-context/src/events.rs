//! Compression status events

use serde::{Deserialize, Serialize};

use crate::compression::CompressionResult;

/// Events emitted by the compression scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompressionEvent {
    /// The trigger was met and a pass started
    Started { conversation_id: String },

    /// The trigger was not met, or the turn was cancelled
    Skipped {
        conversation_id: String,
        reason: SkipReason,
    },

    /// The rolling summary was updated
    Completed {
        conversation_id: String,
        tokens_saved: u32,
        compressed_messages: usize,
        summary_tokens: u32,
    },

    /// The pass failed; the conversation keeps its previous summary
    Failed {
        conversation_id: String,
        error: String,
    },
}

/// Why no compression ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BelowThreshold,
    Cancelled,
}

impl CompressionEvent {
    /// Build the terminal event for a finished pass
    pub fn from_result(conversation_id: impl Into<String>, result: &CompressionResult) -> Self {
        let conversation_id = conversation_id.into();
        if result.success {
            CompressionEvent::Completed {
                conversation_id,
                tokens_saved: result.tokens_saved,
                compressed_messages: result.compressed_messages,
                summary_tokens: result.summary_tokens,
            }
        } else {
            CompressionEvent::Failed {
                conversation_id,
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }
        }
    }

    /// Conversation the event belongs to
    pub fn conversation_id(&self) -> &str {
        match self {
            CompressionEvent::Started { conversation_id }
            | CompressionEvent::Skipped {
                conversation_id, ..
            }
            | CompressionEvent::Completed {
                conversation_id, ..
            }
            | CompressionEvent::Failed {
                conversation_id, ..
            } => conversation_id,
        }
    }

    /// Check if this is the last event of a scheduled pass
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CompressionEvent::Started { .. })
    }

    /// Short line suitable for showing to the user, if any
    pub fn status_message(&self) -> Option<String> {
        match self {
            CompressionEvent::Completed { tokens_saved, .. } => Some(format!(
                "Conversation history compressed, saved {} tokens",
                tokens_saved
            )),
            CompressionEvent::Failed { .. } => Some(
                "History compression is temporarily unavailable, continuing with full context"
                    .to_string(),
            ),
            _ => None,
        }
    }
}
