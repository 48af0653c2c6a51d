//! Four-layer request assembly
//!
//! Layer 1 is the system prompt plus project documents and always ends a
//! cached prefix. Layer 2 is the rolling summary; it gets its own cache
//! breakpoint only once it is large enough to repay the write premium.
//! Layer 3 is the uncompressed tail of the conversation, trimmed to the
//! remaining token budget, and layer 4 is the message being sent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_ai::{
    Attachment, CacheFlag, CacheTtl, ContentPart, CostModel, Role, ServerCompaction,
    SharedEstimator, StreamRequest, SystemBlock, Turn, default_estimator,
};

use crate::config::{COMPACTION_BETA, ContextConfig};
use crate::store::{Conversation, DocumentStore, Message, MessageStore, split_uncompressed};

/// Token estimate of each layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTokens {
    pub system: u32,
    pub summary: u32,
    pub history: u32,
    pub user: u32,
}

impl LayerTokens {
    /// Sum of all layers
    pub fn total(&self) -> u32 {
        self.system
            .saturating_add(self.summary)
            .saturating_add(self.history)
            .saturating_add(self.user)
    }
}

/// A ready-to-send request body
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPayload {
    /// Layer 1 and, if present, layer 2
    pub system_blocks: Vec<SystemBlock>,
    /// History turns followed by the current user turn
    pub messages: Vec<Turn>,
    /// Sum of the four layers' token estimates
    pub estimated_tokens: u32,
    /// Per-layer token estimates
    pub layers: LayerTokens,
    /// Number of history messages included
    pub history_messages: usize,
    /// Input budget derived from the model's context window
    pub budget: u32,
    /// Set when layers 1-2 left less than the history floor and the floor was used instead
    pub budget_clamped: bool,
}

impl ContextPayload {
    /// Turn the payload into a stream request
    pub fn into_request(self, model_id: impl Into<String>, max_output_tokens: u32) -> StreamRequest {
        StreamRequest {
            system: self.system_blocks,
            messages: self.messages,
            model_id: model_id.into(),
            max_output_tokens,
            thinking_budget: None,
            compaction: None,
        }
    }
}

/// Pre-flight token and cost estimate for a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestEstimate {
    pub system_tokens: u32,
    pub summary_tokens: u32,
    pub history_tokens: u32,
    pub user_tokens: u32,
    pub total_tokens: u32,
    /// Layer 1, plus layer 2 when it carries a cache breakpoint
    pub cacheable_tokens: u32,
    /// Tokens expected to be read from cache
    pub cached_tokens: u32,
    /// Whether the summary carries its own cache breakpoint
    pub summary_cached: bool,
    /// Whether the cacheable prefix is expected to hit
    pub likely_cache_hit: bool,
    /// Estimated input cost under the hit/miss assumption
    pub estimated_cost: f64,
    /// Input cost with nothing read from cache
    pub uncached_cost: f64,
    pub savings_percent: f64,
    pub budget_clamped: bool,
}

struct SummaryLayer {
    text: String,
    tokens: u32,
    cached: bool,
}

/// Layers 1-3 as selected for one request
struct LayerPlan {
    system_text: String,
    system_tokens: u32,
    summary: Option<SummaryLayer>,
    history: Vec<Message>,
    history_tokens: u32,
    budget: u32,
    budget_clamped: bool,
    context_window: u32,
}

/// Assembles layered, cache-aware request payloads
pub struct ContextBuilder {
    config: ContextConfig,
    messages: Arc<dyn MessageStore>,
    documents: Arc<dyn DocumentStore>,
    estimator: SharedEstimator,
    cost_model: CostModel,
}

impl ContextBuilder {
    /// Create a builder with the default estimator and built-in prices
    pub fn new(
        config: ContextConfig,
        messages: Arc<dyn MessageStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let mut cost_model = CostModel::default();
        cost_model.set_ttl(config.cache_ttl);
        Self {
            config,
            messages,
            documents,
            estimator: default_estimator(),
            cost_model,
        }
    }

    /// Use a specific token estimator
    pub fn with_estimator(mut self, estimator: SharedEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Use a specific cost model; its TTL follows the builder's
    pub fn with_cost_model(mut self, mut cost_model: CostModel) -> Self {
        cost_model.set_ttl(self.config.cache_ttl);
        self.cost_model = cost_model;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Cost model used for estimates
    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Current cache TTL
    pub fn cache_ttl(&self) -> CacheTtl {
        self.config.cache_ttl
    }

    /// Switch the TTL used for cache breakpoints and write pricing
    pub fn set_cache_ttl(&mut self, ttl: CacheTtl) {
        tracing::debug!("Cache TTL set to {}", ttl);
        self.config.cache_ttl = ttl;
        self.cost_model.set_ttl(ttl);
    }

    /// Provider-side compaction parameters, a fallback for when the layered
    /// context still overflows
    pub fn compaction_params(&self) -> ServerCompaction {
        ServerCompaction {
            beta: COMPACTION_BETA.to_string(),
            trigger_tokens: self.config.compaction_trigger_tokens,
        }
    }

    /// Assemble the request payload for a new user message
    pub fn build(
        &self,
        project_id: &str,
        conversation_id: &str,
        user_message: &str,
        system_prompt: &str,
        model_id: &str,
        attachments: &[Attachment],
    ) -> ContextPayload {
        let plan = self.plan(project_id, conversation_id, system_prompt, model_id);
        let ttl = self.config.cache_ttl;

        // Layers 1 and 2
        let mut system_blocks = vec![SystemBlock::cached(plan.system_text, ttl)];
        let mut summary_tokens = 0;
        if let Some(summary) = plan.summary {
            summary_tokens = summary.tokens;
            system_blocks.push(SystemBlock {
                text: summary.text,
                cache: if summary.cached {
                    CacheFlag::Cached(ttl)
                } else {
                    CacheFlag::Uncached
                },
            });
        }

        // Layer 3
        let history_messages = plan.history.len();
        let mut messages: Vec<Turn> = plan
            .history
            .into_iter()
            .map(|m| match m.role {
                Role::User => Turn::user(m.content),
                Role::Assistant => Turn::assistant(m.content),
            })
            .collect();

        // Layer 4
        if attachments.is_empty() {
            messages.push(Turn::user(user_message));
        } else {
            let mut parts = Vec::with_capacity(attachments.len() + 1);
            parts.push(ContentPart::text(user_message));
            parts.extend(attachments.iter().map(Attachment::to_content_part));
            messages.push(Turn::user_with_parts(parts));
        }

        let layers = LayerTokens {
            system: plan.system_tokens,
            summary: summary_tokens,
            history: plan.history_tokens,
            user: self.estimator.estimate(user_message),
        };

        tracing::info!(
            "Context built: L1={}, L2={} (cached={}), L3={} ({} messages), L4={}, total={}/{} tokens",
            layers.system,
            layers.summary,
            system_blocks.get(1).is_some_and(|b| b.cache.is_cached()),
            layers.history,
            history_messages,
            layers.user,
            layers.total(),
            plan.context_window
        );

        ContextPayload {
            system_blocks,
            messages,
            estimated_tokens: layers.total(),
            layers,
            history_messages,
            budget: plan.budget,
            budget_clamped: plan.budget_clamped,
        }
    }

    /// Token and cost estimate for a message without building the payload
    pub fn estimate_request(
        &self,
        project_id: &str,
        conversation_id: &str,
        user_message: &str,
        system_prompt: &str,
        model_id: &str,
    ) -> RequestEstimate {
        let plan = self.plan(project_id, conversation_id, system_prompt, model_id);

        let (summary_tokens, summary_cached) = plan
            .summary
            .as_ref()
            .map_or((0, false), |s| (s.tokens, s.cached));
        let user_tokens = self.estimator.estimate(user_message);

        let (cached_summary, uncached_summary) = if summary_cached {
            (summary_tokens, 0)
        } else {
            (0, summary_tokens)
        };
        let cacheable_tokens = plan.system_tokens.saturating_add(cached_summary);
        let uncached_tokens = plan
            .history_tokens
            .saturating_add(user_tokens)
            .saturating_add(uncached_summary);
        let likely_cache_hit = summary_cached;

        let estimate = self.cost_model.estimate_with_cache(
            model_id,
            cacheable_tokens,
            uncached_tokens,
            likely_cache_hit,
        );
        let uncached_cost = self
            .cost_model
            .estimate_input_cost(model_id, cacheable_tokens.saturating_add(uncached_tokens));

        RequestEstimate {
            system_tokens: plan.system_tokens,
            summary_tokens,
            history_tokens: plan.history_tokens,
            user_tokens,
            total_tokens: cacheable_tokens.saturating_add(uncached_tokens),
            cacheable_tokens,
            cached_tokens: estimate.cached_tokens,
            summary_cached,
            likely_cache_hit,
            estimated_cost: estimate.estimated_cost,
            uncached_cost,
            savings_percent: estimate.savings_percent,
            budget_clamped: plan.budget_clamped,
        }
    }

    /// Select layers 1-3 for a request
    fn plan(
        &self,
        project_id: &str,
        conversation_id: &str,
        system_prompt: &str,
        model_id: &str,
    ) -> LayerPlan {
        let context_window = self.cost_model.catalog().context_window(model_id);
        let budget = self.config.input_budget(context_window);

        let documents = self
            .documents
            .get_project_context(project_id)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load documents for {}: {}", project_id, e);
                String::new()
            });
        let system_text = self.system_text(system_prompt, &documents);
        let system_tokens = self.estimator.estimate(&system_text);

        let conversation = self.load_conversation(conversation_id);
        let summary = conversation
            .as_ref()
            .filter(|c| !c.rolling_summary.trim().is_empty())
            .map(|c| self.summary_layer(&c.rolling_summary));
        let summary_tokens = summary.as_ref().map_or(0, |s| s.tokens);

        let remaining = i64::from(budget) - i64::from(system_tokens) - i64::from(summary_tokens);
        let floor = i64::from(self.config.min_history_budget);
        let budget_clamped = remaining < floor;
        let history_budget = if budget_clamped {
            tracing::warn!(
                "Very little room for conversation ({} tokens left), using {} instead",
                remaining,
                floor
            );
            self.config.min_history_budget
        } else {
            u32::try_from(remaining).unwrap_or(u32::MAX)
        };

        let pointer = conversation
            .as_ref()
            .and_then(|c| c.last_compressed_message_id.as_deref());
        let tail = self.uncompressed_tail(conversation_id, pointer);
        let (history, history_tokens) = self.fit_history(tail, history_budget);

        LayerPlan {
            system_text,
            system_tokens,
            summary,
            history,
            history_tokens,
            budget,
            budget_clamped,
            context_window,
        }
    }

    fn system_text(&self, system_prompt: &str, documents: &str) -> String {
        let mut parts = Vec::with_capacity(2);
        let prompt = system_prompt.trim();
        if !prompt.is_empty() {
            parts.push(prompt.to_string());
        }
        if !documents.trim().is_empty() {
            parts.push(format!("<project_knowledge>\n{}\n</project_knowledge>", documents));
        }
        if parts.is_empty() {
            return self.config.default_persona.clone();
        }
        parts.join("\n\n")
    }

    fn summary_layer(&self, summary: &str) -> SummaryLayer {
        let text = format!("<conversation_summary>\n{}\n</conversation_summary>", summary);
        // The breakpoint decision looks at the summary alone, not the wrapper
        let own_tokens = self.estimator.estimate(summary);
        let cached = own_tokens >= self.config.cache_breakpoint_threshold;
        tracing::debug!(
            "Summary {} tokens, {} cache breakpoint (threshold {})",
            own_tokens,
            if cached { "with" } else { "without" },
            self.config.cache_breakpoint_threshold
        );
        SummaryLayer {
            tokens: self.estimator.estimate(&text),
            text,
            cached,
        }
    }

    fn load_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.messages
            .get_conversation(conversation_id)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load conversation {}: {}", conversation_id, e);
                None
            })
    }

    fn uncompressed_tail(&self, conversation_id: &str, pointer: Option<&str>) -> Vec<Message> {
        let messages = self
            .messages
            .get_messages(conversation_id)
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load messages for {}: {}", conversation_id, e);
                Vec::new()
            });
        let (tail, found) = split_uncompressed(messages, pointer);
        if !found {
            tracing::warn!(
                "Compression pointer of {} not found, sending full history",
                conversation_id
            );
        }
        tail
    }

    /// Trailing window, then newest-first budget fit, then the turn cap.
    ///
    /// Every cut is followed by dropping leading assistant messages so the
    /// request starts with a user turn.
    fn fit_history(&self, mut messages: Vec<Message>, token_budget: u32) -> (Vec<Message>, u32) {
        let window = (self.config.recent_turns_kept as usize) * 2;
        if messages.len() > window {
            messages.drain(..messages.len() - window);
        }
        let considered = messages.len();

        let mut tokens_used: u32 = 0;
        let mut keep_from = messages.len();
        for (index, message) in messages.iter().enumerate().rev() {
            let tokens = self.estimator.estimate(&message.content);
            if tokens_used.saturating_add(tokens) > token_budget {
                break;
            }
            tokens_used += tokens;
            keep_from = index;
        }
        messages.drain(..keep_from);
        drop_leading_assistant(&mut messages);

        let cap = (self.config.max_history_turns as usize) * 2;
        if messages.len() > cap {
            messages.drain(..messages.len() - cap);
            drop_leading_assistant(&mut messages);
        }

        let tokens = messages
            .iter()
            .map(|m| self.estimator.estimate(&m.content))
            .fold(0u32, u32::saturating_add);
        tracing::debug!(
            "History: {}/{} messages selected ({} tokens, budget {})",
            messages.len(),
            considered,
            tokens,
            token_budget
        );
        (messages, tokens)
    }
}

fn drop_leading_assistant(messages: &mut Vec<Message>) {
    let leading = messages
        .iter()
        .take_while(|m| m.role == Role::Assistant)
        .count();
    messages.drain(..leading);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryDocuments, InMemoryStore};
    use strata_ai::{HeuristicEstimator, TokenEstimator};

    const SONNET: &str = "claude-sonnet-4-5-20250929";

    struct Fixture {
        store: Arc<InMemoryStore>,
        docs: Arc<InMemoryDocuments>,
        conversation: Conversation,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let conversation = store.create_conversation("proj");
            Self {
                store,
                docs: Arc::new(InMemoryDocuments::new()),
                conversation,
            }
        }

        fn builder(&self, config: ContextConfig) -> ContextBuilder {
            ContextBuilder::new(config, self.store.clone(), self.docs.clone())
                .with_estimator(Arc::new(HeuristicEstimator))
        }

        fn push(&self, role: Role, content: String) -> Message {
            let msg = Message::new(&self.conversation.id, role, content);
            self.store.append_message(msg.clone()).unwrap();
            msg
        }

        fn push_turns(&self, turns: usize, chars: usize) -> Vec<Message> {
            let mut out = vec![];
            for i in 0..turns {
                out.push(self.push(Role::User, format!("{:0>width$}", i, width = chars)));
                out.push(self.push(Role::Assistant, format!("{:a>width$}", i, width = chars)));
            }
            out
        }

        fn set_summary(&self, summary: &str, pointer: &str) {
            self.store
                .update_summary(&self.conversation.id, summary, pointer, 0)
                .unwrap();
        }
    }

    #[test]
    fn test_layer1_combines_prompt_and_documents() {
        let f = Fixture::new();
        f.docs.set("proj", "API reference");
        let payload = f
            .builder(ContextConfig::default())
            .build("proj", &f.conversation.id, "hi", "  Be terse.  ", SONNET, &[]);

        assert_eq!(payload.system_blocks.len(), 1);
        assert_eq!(
            payload.system_blocks[0].text,
            "Be terse.\n\n<project_knowledge>\nAPI reference\n</project_knowledge>"
        );
        assert_eq!(
            payload.system_blocks[0].cache,
            CacheFlag::Cached(CacheTtl::FiveMinutes)
        );
    }

    #[test]
    fn test_missing_conversation_still_builds() {
        let f = Fixture::new();
        let payload = f
            .builder(ContextConfig::default())
            .build("proj", "no-such-conversation", "hello", "", SONNET, &[]);
        assert_eq!(payload.messages, vec![Turn::user("hello")]);
        assert_eq!(payload.system_blocks[0].text, crate::config::DEFAULT_PERSONA);
    }

    #[test]
    fn test_compressed_messages_are_excluded() {
        let f = Fixture::new();
        let msgs = f.push_turns(3, 8);
        f.set_summary("earlier stuff", &msgs[1].id);

        let payload = f
            .builder(ContextConfig::default())
            .build("proj", &f.conversation.id, "next", "", SONNET, &[]);
        // 4 history + current
        assert_eq!(payload.messages.len(), 5);
        assert_eq!(payload.messages[0].text(), msgs[2].content);
        assert_eq!(payload.system_blocks.len(), 2);
        assert_eq!(
            payload.system_blocks[1].text,
            "<conversation_summary>\nearlier stuff\n</conversation_summary>"
        );
        assert_eq!(payload.system_blocks[1].cache, CacheFlag::Uncached);
    }

    #[test]
    fn test_dangling_pointer_sends_full_history() {
        let f = Fixture::new();
        f.push_turns(2, 8);
        f.set_summary("s", "deleted-message-id");

        let payload = f
            .builder(ContextConfig::default())
            .build("proj", &f.conversation.id, "next", "", SONNET, &[]);
        assert_eq!(payload.history_messages, 4);
    }

    #[test]
    fn test_recent_window_limits_history() {
        let f = Fixture::new();
        f.push_turns(15, 8);
        let payload = f
            .builder(ContextConfig::default())
            .build("proj", &f.conversation.id, "next", "", SONNET, &[]);
        assert_eq!(payload.history_messages, 20);
        assert_eq!(payload.messages[0].role, Role::User);
    }

    #[test]
    fn test_budget_fit_drops_oldest_and_leading_assistant() {
        let f = Fixture::new();
        // 4 messages of 100 tokens each
        f.push_turns(2, 400);
        let config = ContextConfig {
            min_history_budget: 250,
            ..Default::default()
        };
        // Force the clamp: the system prompt eats the whole budget
        let builder = f.builder(config);
        let huge_prompt = "p".repeat(4 * 200_000);
        let payload = builder.build("proj", &f.conversation.id, "q", &huge_prompt, SONNET, &[]);

        assert!(payload.budget_clamped);
        // Budget 250 fits the newest two messages
        assert_eq!(payload.history_messages, 2);
        assert_eq!(payload.messages[0].role, Role::User);
        assert_eq!(payload.layers.history, 200);
    }

    #[test]
    fn test_budget_fit_trims_assistant_left_at_front() {
        let f = Fixture::new();
        f.push_turns(2, 400);
        let config = ContextConfig {
            min_history_budget: 150,
            ..Default::default()
        };
        let huge_prompt = "p".repeat(4 * 200_000);
        let payload =
            f.builder(config)
                .build("proj", &f.conversation.id, "q", &huge_prompt, SONNET, &[]);
        // Only the final assistant message fits, and it cannot lead
        assert_eq!(payload.history_messages, 0);
        assert_eq!(payload.messages, vec![Turn::user("q")]);
    }

    #[test]
    fn test_turn_cap_reapplies_role_trim() {
        let f = Fixture::new();
        f.push(Role::User, "u0".into());
        f.push(Role::Assistant, "a0".into());
        f.push(Role::User, "u1".into());
        f.push(Role::Assistant, "a1".into());
        f.push(Role::Assistant, "a1b".into());
        let config = ContextConfig {
            max_history_turns: 1,
            ..Default::default()
        };
        let payload = f
            .builder(config)
            .build("proj", &f.conversation.id, "q", "", SONNET, &[]);
        // Cap keeps [a1, a1b]; both are assistant so both go
        assert_eq!(payload.history_messages, 0);
        assert_eq!(payload.messages[0].role, Role::User);
    }

    #[test]
    fn test_attachments_become_parts() {
        let f = Fixture::new();
        let payload = f.builder(ContextConfig::default()).build(
            "proj",
            &f.conversation.id,
            "what is in this file",
            "",
            SONNET,
            &[Attachment::image("image/png", "iVBOR"), Attachment::document("application/pdf", "JVBER")],
        );
        let last = payload.messages.last().unwrap();
        match &last.content {
            strata_ai::TurnContent::Parts(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0].as_text(), Some("what is in this file"));
                assert!(matches!(parts[1], ContentPart::Image { .. }));
                assert!(matches!(parts[2], ContentPart::Document { .. }));
            }
            other => panic!("expected parts, got {:?}", other),
        }
        assert_eq!(payload.layers.user, HeuristicEstimator.estimate("what is in this file"));
    }

    #[test]
    fn test_set_cache_ttl_applies_to_breakpoints() {
        let f = Fixture::new();
        let mut builder = f.builder(ContextConfig::default());
        builder.set_cache_ttl(CacheTtl::OneHour);
        let payload = builder.build("proj", &f.conversation.id, "q", "sys", SONNET, &[]);
        assert_eq!(payload.system_blocks[0].cache, CacheFlag::Cached(CacheTtl::OneHour));
        assert_eq!(builder.cost_model().ttl(), CacheTtl::OneHour);
    }

    #[test]
    fn test_estimate_matches_build_layers() {
        let f = Fixture::new();
        let msgs = f.push_turns(4, 40);
        f.set_summary(&"s".repeat(5000), &msgs[1].id);
        let builder = f.builder(ContextConfig::default());

        let payload = builder.build("proj", &f.conversation.id, "question", "sys", SONNET, &[]);
        let estimate = builder.estimate_request("proj", &f.conversation.id, "question", "sys", SONNET);

        assert_eq!(estimate.total_tokens, payload.estimated_tokens);
        assert_eq!(estimate.summary_tokens, payload.layers.summary);
        assert!(estimate.summary_cached);
        assert!(estimate.likely_cache_hit);
        assert_eq!(estimate.cacheable_tokens, payload.layers.system + payload.layers.summary);
        assert_eq!(estimate.cached_tokens, estimate.cacheable_tokens);
        assert!(estimate.estimated_cost < estimate.uncached_cost);
        assert!(estimate.savings_percent > 0.0);
    }

    #[test]
    fn test_estimate_without_summary_is_a_miss() {
        let f = Fixture::new();
        f.push_turns(1, 40);
        let builder = f.builder(ContextConfig::default());
        let estimate = builder.estimate_request("proj", &f.conversation.id, "question", "sys", SONNET);
        assert!(!estimate.likely_cache_hit);
        assert_eq!(estimate.cached_tokens, 0);
        assert_eq!(estimate.estimated_cost, estimate.uncached_cost);
    }

    #[test]
    fn test_compaction_params() {
        let f = Fixture::new();
        let params = f.builder(ContextConfig::default()).compaction_params();
        assert_eq!(params.beta, "compact-2026-01-12");
        assert_eq!(params.trigger_tokens, 160_000);
    }

    #[test]
    fn test_into_request_keeps_layers() {
        let f = Fixture::new();
        let payload = f
            .builder(ContextConfig::default())
            .build("proj", &f.conversation.id, "hi", "sys", SONNET, &[]);
        let request = payload.clone().into_request(SONNET, 4096);
        assert_eq!(request.system, payload.system_blocks);
        assert_eq!(request.messages, payload.messages);
        assert_eq!(request.max_output_tokens, 4096);
    }

    /// Charges every text the whole token range
    struct Enormous;

    impl TokenEstimator for Enormous {
        fn estimate(&self, _text: &str) -> u32 {
            u32::MAX / 2
        }

        fn name(&self) -> &'static str {
            "enormous"
        }
    }

    #[test]
    fn test_huge_token_counts_saturate() {
        let f = Fixture::new();
        f.push_turns(2, 10);
        f.store
            .update_summary(&f.conversation.id, "digest", "missing-id", 1)
            .unwrap();
        let builder = ContextBuilder::new(ContextConfig::default(), f.store.clone(), f.docs.clone())
            .with_estimator(Arc::new(Enormous));

        let estimate = builder.estimate_request("proj", &f.conversation.id, "q", "sys", SONNET);
        assert!(estimate.budget_clamped);
        assert_eq!(estimate.total_tokens, u32::MAX);
        assert!(estimate.uncached_cost > 0.0);

        let payload = builder.build("proj", &f.conversation.id, "q", "sys", SONNET, &[]);
        assert_eq!(payload.layers.total(), u32::MAX);
    }
}
