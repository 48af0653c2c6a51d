//! Incremental rolling-summary compression
//!
//! Each pass summarizes the oldest batch of uncompressed turns with a
//! low-cost model, appends the result to the rolling summary and advances the
//! conversation's compression pointer to the last message of that batch.
//! When the summary outgrows its ceiling it is compressed again as a whole.
//! Nothing is written unless every provider call of the pass succeeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strata_ai::{CompletionProvider, ModelCatalog, SharedEstimator, default_estimator};

use crate::config::ContextConfig;
use crate::store::{Message, MessageStore, split_uncompressed};

const COMPRESS_SYSTEM_PROMPT: &str = "\
You are a conversation summarizer for project '{project}'. \
Output ONLY the summary in the same language as the conversation. \
No preamble, no explanation.";

const COMPRESS_PROMPT: &str = "\
Compress the following conversation into a concise summary. Rules:
1. Keep every decision and conclusion.
2. Keep function signatures and the core logic of code; do not paraphrase code in prose.
3. Keep data points, technical details and terminology verbatim.
4. Keep the user's stated preferences and constraints.
5. Drop pleasantries, small talk and repetition.
6. Stay under {max_tokens} tokens.

Existing summary:
{existing_summary}

New conversation:
{conversation}";

/// Placeholder for the existing summary on a first pass
const NO_SUMMARY: &str = "(none)";

/// Share of input assumed to come back as summary when estimating cost
const OUTPUT_RATIO: f64 = 0.3;

/// Outcome of one compression pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub success: bool,
    /// The summary after the pass; the unchanged summary on failure
    pub new_summary: String,
    pub tokens_saved: u32,
    pub error: Option<String>,
    /// Messages folded into the summary
    pub compressed_messages: usize,
    /// Self-compression passes performed
    pub recompress_passes: u32,
    /// Token estimate of `new_summary`
    pub summary_tokens: u32,
}

impl CompressionResult {
    fn failure(summary: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            new_summary: summary.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Render messages as `[User]: ...` / `[Assistant]: ...` blocks
pub fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Summarizes old turns into the rolling summary
pub struct CompressionEngine {
    config: ContextConfig,
    store: Arc<dyn MessageStore>,
    provider: Arc<dyn CompletionProvider>,
    estimator: SharedEstimator,
    catalog: ModelCatalog,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CompressionEngine {
    /// Create an engine with the default estimator and built-in prices
    pub fn new(
        config: ContextConfig,
        store: Arc<dyn MessageStore>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            estimator: default_estimator(),
            catalog: ModelCatalog::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Use a specific token estimator
    pub fn with_estimator(mut self, estimator: SharedEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Use a specific model catalog for cost estimates
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Whether the uncompressed tail has reached the conversation's trigger.
    ///
    /// False for unknown conversations or when the store cannot be read.
    pub fn should_compress(&self, conversation_id: &str) -> bool {
        let conversation = match self.store.get_conversation(conversation_id) {
            Ok(Some(c)) => c,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!("Compression check failed for {}: {}", conversation_id, e);
                return false;
            }
        };
        let uncompressed = match self.store.uncompressed_messages(conversation_id) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Compression check failed for {}: {}", conversation_id, e);
                return false;
            }
        };

        let turns = uncompressed.len() / 2;
        let threshold = conversation.compress_threshold(self.config.compress_after_turns);
        let should = turns as u64 >= u64::from(threshold);
        tracing::debug!(
            "Compression check for {}: {} turns >= {} threshold = {}",
            conversation_id,
            turns,
            threshold,
            should
        );
        should
    }

    /// Compress the oldest batch of uncompressed turns
    pub async fn compress(&self, conversation_id: &str, project_label: &str) -> CompressionResult {
        let lock = self.lock_for(conversation_id);
        let guard = lock.lock().await;
        let result = self.compress_locked(conversation_id, project_label).await;
        drop(guard);
        self.release_lock(conversation_id, lock);
        result
    }

    /// Check the trigger and compress under one lock.
    ///
    /// Returns `None` when no compression was needed.
    pub async fn compress_if_needed(
        &self,
        conversation_id: &str,
        project_label: &str,
    ) -> Option<CompressionResult> {
        let lock = self.lock_for(conversation_id);
        let guard = lock.lock().await;
        let result = if self.should_compress(conversation_id) {
            Some(self.compress_locked(conversation_id, project_label).await)
        } else {
            tracing::debug!("No compression needed for {}", conversation_id);
            None
        };
        drop(guard);
        self.release_lock(conversation_id, lock);
        result
    }

    /// Estimated dollar cost of summarizing `messages` with the compression model
    pub fn estimate_compression_cost(&self, messages: &[Message]) -> f64 {
        let input: f64 = messages
            .iter()
            .map(|m| f64::from(self.estimator.estimate(&m.content)))
            .sum();
        let model = self.catalog.resolve(&self.config.compression_model);
        let cost = input * model.input_price / 1_000_000.0
            + input * OUTPUT_RATIO * model.output_price / 1_000_000.0;
        (cost * 10_000.0).round() / 10_000.0
    }

    fn lock_for(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the map entry once no other pass holds or waits on it
    fn release_lock(&self, conversation_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks
            .get(conversation_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(conversation_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }

    async fn compress_locked(&self, conversation_id: &str, project_label: &str) -> CompressionResult {
        let conversation = match self.store.get_conversation(conversation_id) {
            Ok(Some(c)) => c,
            Ok(None) => return CompressionResult::failure("", "Conversation not found"),
            Err(e) => return CompressionResult::failure("", e.to_string()),
        };
        let existing = conversation.rolling_summary;

        let messages = match self.store.get_messages(conversation_id) {
            Ok(messages) => messages,
            Err(e) => return CompressionResult::failure(existing, e.to_string()),
        };
        let (mut batch, found) =
            split_uncompressed(messages, conversation.last_compressed_message_id.as_deref());
        if !found {
            tracing::warn!(
                "Compression pointer of {} not found, treating all messages as uncompressed",
                conversation_id
            );
        }
        batch.truncate((self.config.compress_batch_turns as usize) * 2);

        let Some(last_id) = batch.last().map(|m| m.id.clone()) else {
            return CompressionResult::failure(existing, "No messages to compress");
        };

        let tokens_before = batch
            .iter()
            .map(|m| self.estimator.estimate(&m.content))
            .fold(0u32, u32::saturating_add);
        let existing_slot = if existing.is_empty() { NO_SUMMARY } else { existing.as_str() };

        let summary = match self
            .summarize(project_label, existing_slot, &format_transcript(&batch))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Compression API failed for {}: {}", conversation_id, e);
                return CompressionResult::failure(existing, e.to_string());
            }
        };

        let tokens_after = self.estimator.estimate(&summary);
        let tokens_saved = tokens_before.saturating_sub(tokens_after);

        let mut combined = if existing.is_empty() {
            summary
        } else {
            format!("{}\n\n{}", existing, summary)
        };
        let mut summary_tokens = self.estimator.estimate(&combined);

        let mut recompress_passes = 0;
        while summary_tokens > self.config.summary_recompress_threshold
            && recompress_passes < self.config.max_recompress_passes
        {
            tracing::info!(
                "Summary exceeds threshold ({} > {}), re-compressing",
                summary_tokens,
                self.config.summary_recompress_threshold
            );
            combined = match self.summarize(project_label, "", &combined).await {
                Ok(shorter) => shorter,
                Err(e) => {
                    tracing::error!("Summary re-compression failed for {}: {}", conversation_id, e);
                    return CompressionResult::failure(existing, e.to_string());
                }
            };
            summary_tokens = self.estimator.estimate(&combined);
            recompress_passes += 1;
        }

        if let Err(e) =
            self.store
                .update_summary(conversation_id, &combined, &last_id, summary_tokens)
        {
            tracing::error!("Failed to persist summary for {}: {}", conversation_id, e);
            return CompressionResult::failure(existing, e.to_string());
        }

        tracing::info!(
            "Compression complete for {}: {} messages, {} -> {} tokens (saved {})",
            conversation_id,
            batch.len(),
            tokens_before,
            summary_tokens,
            tokens_saved
        );

        CompressionResult {
            success: true,
            new_summary: combined,
            tokens_saved,
            error: None,
            compressed_messages: batch.len(),
            recompress_passes,
            summary_tokens,
        }
    }

    /// One summarization call, bounded by the configured timeout
    async fn summarize(
        &self,
        project_label: &str,
        existing_summary: &str,
        conversation: &str,
    ) -> strata_ai::Result<String> {
        let system = COMPRESS_SYSTEM_PROMPT.replace("{project}", project_label);
        let prompt = COMPRESS_PROMPT
            .replace("{max_tokens}", &self.config.max_summary_tokens.to_string())
            .replace("{existing_summary}", existing_summary)
            .replace("{conversation}", conversation);

        let timeout = self.config.compression_timeout_secs;
        tokio::time::timeout(
            Duration::from_secs(timeout),
            self.provider.complete(
                &system,
                &prompt,
                &self.config.compression_model,
                self.config.max_summary_tokens,
            ),
        )
        .await
        .map_err(|_| strata_ai::Error::Timeout(timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Conversation, InMemoryStore};
    use crate::testing::{MockProvider, MockReply};
    use strata_ai::{HeuristicEstimator, Role, TokenEstimator};

    type Setup = (Arc<InMemoryStore>, Arc<MockProvider>, CompressionEngine, Conversation);

    fn setup(turns: usize, replies: Vec<MockReply>) -> Setup {
        let store = Arc::new(InMemoryStore::new());
        let conv = store.create_conversation("proj");
        for i in 0..turns {
            store.append_message(Message::user(&conv.id, format!("question {}", i))).unwrap();
            store
                .append_message(Message::assistant(&conv.id, format!("answer {}", i)))
                .unwrap();
        }
        let provider = Arc::new(MockProvider::new(replies));
        let engine = CompressionEngine::new(ContextConfig::default(), store.clone(), provider.clone())
            .with_estimator(Arc::new(HeuristicEstimator));
        (store, provider, engine, conv)
    }

    #[test]
    fn test_format_transcript() {
        let msgs = vec![Message::user("c", "Hello"), Message::assistant("c", "Hi there!")];
        assert_eq!(format_transcript(&msgs), "[User]: Hello\n\n[Assistant]: Hi there!");
    }

    #[test]
    fn test_should_compress_threshold() {
        let (_, _, engine, conv) = setup(9, vec![]);
        assert!(!engine.should_compress(&conv.id));
        let (_, _, engine, conv) = setup(10, vec![]);
        assert!(engine.should_compress(&conv.id));
        assert!(!engine.should_compress("missing"));
    }

    #[test]
    fn test_should_compress_counts_whole_turns() {
        let (store, _, engine, conv) = setup(9, vec![]);
        // 19 messages is still 9 turns
        store.append_message(Message::user(&conv.id, "dangling")).unwrap();
        assert!(!engine.should_compress(&conv.id));
    }

    #[test]
    fn test_should_compress_respects_override() {
        let (store, _, engine, conv) = setup(3, vec![]);
        assert!(!engine.should_compress(&conv.id));
        let mut updated = conv.clone();
        updated.compress_after_turns = Some(3);
        store.insert_conversation(updated);
        assert!(engine.should_compress(&conv.id));
    }

    #[tokio::test]
    async fn test_compress_first_pass_uses_none_marker() {
        let (store, provider, engine, conv) = setup(6, vec![MockReply::text("summary one")]);
        let result = engine.compress(&conv.id, "Apollo").await;
        assert!(result.success);
        assert_eq!(result.new_summary, "summary one");
        assert_eq!(result.compressed_messages, 10);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model_id, "claude-haiku-4-5-20251001");
        assert_eq!(calls[0].max_output_tokens, 500);
        assert!(calls[0].system.contains("project 'Apollo'"));
        assert!(calls[0].prompt.contains("Existing summary:\n(none)\n"));
        assert!(calls[0].prompt.contains("[User]: question 0\n\n[Assistant]: answer 0"));
        assert!(!calls[0].prompt.contains("question 5"));

        let stored = store.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(stored.rolling_summary, "summary one");
        assert_eq!(stored.summary_token_count, HeuristicEstimator.estimate("summary one"));
    }

    #[tokio::test]
    async fn test_compress_appends_to_existing_summary() {
        let (store, provider, engine, conv) =
            setup(10, vec![MockReply::text("first"), MockReply::text("second")]);
        assert!(engine.compress(&conv.id, "p").await.success);
        let result = engine.compress(&conv.id, "p").await;
        assert_eq!(result.new_summary, "first\n\nsecond");
        assert!(provider.calls()[1].prompt.contains("Existing summary:\nfirst\n"));

        let stored = store.get_conversation(&conv.id).unwrap().unwrap();
        let messages = store.get_messages(&conv.id).unwrap();
        assert_eq!(stored.last_compressed_message_id.as_deref(), Some(messages[19].id.as_str()));
    }

    #[tokio::test]
    async fn test_compress_nothing_to_do() {
        let (_, provider, engine, conv) = setup(0, vec![]);
        let result = engine.compress(&conv.id, "p").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No messages to compress"));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_compress_missing_conversation() {
        let (_, _, engine, _) = setup(0, vec![]);
        let result = engine.compress("missing", "p").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Conversation not found"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_failure() {
        let (store, _, engine, conv) = setup(5, vec![MockReply::text("   ")]);
        let result = engine.compress(&conv.id, "p").await;
        assert!(!result.success);
        let stored = store.get_conversation(&conv.id).unwrap().unwrap();
        assert!(stored.last_compressed_message_id.is_none());
    }

    #[tokio::test]
    async fn test_tokens_saved_never_negative() {
        let long = "x".repeat(4000);
        let (_, _, engine, conv) = setup(1, vec![MockReply::text(long)]);
        let result = engine.compress(&conv.id, "p").await;
        assert!(result.success);
        assert_eq!(result.tokens_saved, 0);
    }

    #[tokio::test]
    async fn test_recompress_failure_commits_nothing() {
        let (store, provider, engine, conv) = setup(
            5,
            vec![MockReply::text("y".repeat(13_000)), MockReply::fail("overloaded")],
        );
        let result = engine.compress(&conv.id, "p").await;
        assert!(!result.success);
        assert_eq!(provider.calls().len(), 2);
        let stored = store.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(stored.rolling_summary, "");
        assert!(stored.last_compressed_message_id.is_none());
    }

    #[tokio::test]
    async fn test_recompress_capped_at_configured_passes() {
        let big = "z".repeat(13_000);
        let store = Arc::new(InMemoryStore::new());
        let conv = store.create_conversation("proj");
        store.append_message(Message::new(&conv.id, Role::User, "q")).unwrap();
        store.append_message(Message::new(&conv.id, Role::Assistant, "a")).unwrap();
        let provider = Arc::new(MockProvider::new(vec![
            MockReply::text(big.clone()),
            MockReply::text(big.clone()),
            MockReply::text("short"),
        ]));
        let config = ContextConfig {
            max_recompress_passes: 2,
            ..Default::default()
        };
        let engine = CompressionEngine::new(config, store.clone(), provider.clone())
            .with_estimator(Arc::new(HeuristicEstimator));

        let result = engine.compress(&conv.id, "p").await;
        assert!(result.success);
        assert_eq!(result.recompress_passes, 2);
        assert_eq!(result.new_summary, "short");
        // Recompression sends an empty existing-summary slot
        assert!(provider.calls()[1].prompt.contains("Existing summary:\n\n"));
    }

    #[tokio::test]
    async fn test_dangling_pointer_restarts_batch_at_first_message() {
        let (store, provider, engine, conv) = setup(8, vec![MockReply::text("again")]);
        let messages = store.get_messages(&conv.id).unwrap();
        store.update_summary(&conv.id, "old", &messages[3].id, 1).unwrap();
        assert!(store.delete_message(&conv.id, &messages[3].id));

        let result = engine.compress(&conv.id, "p").await;
        assert!(result.success);
        assert_eq!(result.compressed_messages, 10);
        assert!(provider.calls()[0].prompt.contains("New conversation:\n[User]: question 0\n"));

        let stored = store.get_conversation(&conv.id).unwrap().unwrap();
        let remaining = store.get_messages(&conv.id).unwrap();
        // messages[3] is gone, so the tenth remaining message is the old messages[10]
        assert_eq!(stored.last_compressed_message_id.as_deref(), Some(remaining[9].id.as_str()));
        assert_eq!(remaining[9].id, messages[10].id);
        assert_eq!(stored.rolling_summary, "old\n\nagain");
    }

    #[tokio::test]
    async fn test_lock_entries_released_after_pass() {
        let (_, _, engine, conv) = setup(10, vec![MockReply::text("s")]);
        assert!(engine.compress(&conv.id, "p").await.success);
        assert!(engine.compress_if_needed(&conv.id, "p").await.is_none());
        engine.compress("missing", "p").await;
        assert_eq!(engine.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_compress_if_needed_skips_below_trigger() {
        let (_, provider, engine, conv) = setup(4, vec![]);
        assert!(engine.compress_if_needed(&conv.id, "p").await.is_none());
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_estimate_compression_cost() {
        let (_, _, engine, _) = setup(0, vec![]);
        // 4000 chars -> 1000 tokens: 1000 * $1/M + 300 * $5/M
        let msgs = vec![Message::user("c", "x".repeat(4000))];
        let cost = engine.estimate_compression_cost(&msgs);
        assert!((cost - 0.0025).abs() < 1e-12);
        assert_eq!(engine.estimate_compression_cost(&[]), 0.0);
    }
}
