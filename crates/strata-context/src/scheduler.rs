//! Runs compression in the background after a turn is persisted

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::compression::{CompressionEngine, CompressionResult};
use crate::events::{CompressionEvent, SkipReason};

/// Hands finished turns to the compression engine off the response path.
///
/// Cloning is cheap; clones share the engine and the event channel.
#[derive(Clone)]
pub struct CompressionScheduler {
    engine: Arc<CompressionEngine>,
    event_tx: broadcast::Sender<CompressionEvent>,
}

impl CompressionScheduler {
    /// Create a scheduler around an engine
    pub fn new(engine: Arc<CompressionEngine>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self { engine, event_tx }
    }

    /// Subscribe to compression events
    pub fn subscribe(&self) -> broadcast::Receiver<CompressionEvent> {
        self.event_tx.subscribe()
    }

    /// The engine this scheduler drives
    pub fn engine(&self) -> &Arc<CompressionEngine> {
        &self.engine
    }

    /// Spawn a compression check for a conversation whose latest turn has been persisted.
    ///
    /// Returns immediately. A cancelled `turn` token means the turn never
    /// completed, so nothing is compressed.
    pub fn schedule(
        &self,
        conversation_id: impl Into<String>,
        project_label: impl Into<String>,
        turn: CancellationToken,
    ) -> JoinHandle<Option<CompressionResult>> {
        let scheduler = self.clone();
        let conversation_id = conversation_id.into();
        let project_label = project_label.into();
        tokio::spawn(async move {
            scheduler
                .run(&conversation_id, &project_label, &turn)
                .await
        })
    }

    /// Check and compress in the current task, emitting events as it goes
    pub async fn run(
        &self,
        conversation_id: &str,
        project_label: &str,
        turn: &CancellationToken,
    ) -> Option<CompressionResult> {
        if turn.is_cancelled() {
            tracing::debug!("Turn cancelled, skipping compression for {}", conversation_id);
            self.emit(CompressionEvent::Skipped {
                conversation_id: conversation_id.to_string(),
                reason: SkipReason::Cancelled,
            });
            return None;
        }

        if !self.engine.should_compress(conversation_id) {
            self.emit(CompressionEvent::Skipped {
                conversation_id: conversation_id.to_string(),
                reason: SkipReason::BelowThreshold,
            });
            return None;
        }

        self.emit(CompressionEvent::Started {
            conversation_id: conversation_id.to_string(),
        });

        // Re-checked under the conversation lock; another pass may have won
        let Some(result) = self
            .engine
            .compress_if_needed(conversation_id, project_label)
            .await
        else {
            self.emit(CompressionEvent::Skipped {
                conversation_id: conversation_id.to_string(),
                reason: SkipReason::BelowThreshold,
            });
            return None;
        };

        if !result.success {
            tracing::warn!(
                "Compression failed for {}: {}",
                conversation_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.emit(CompressionEvent::from_result(conversation_id, &result));
        Some(result)
    }

    fn emit(&self, event: CompressionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
