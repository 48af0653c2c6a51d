//! Tuning knobs for context assembly and compression

use serde::{Deserialize, Serialize};
use strata_ai::CacheTtl;

use crate::error::{Error, Result};

/// Persona used when neither a system prompt nor documents are present
pub const DEFAULT_PERSONA: &str = "You are a helpful AI assistant.";

/// Model used for summarization
pub const DEFAULT_COMPRESSION_MODEL: &str = "claude-haiku-4-5-20251001";

/// Beta flag for provider-side compaction
pub const COMPACTION_BETA: &str = "compact-2026-01-12";

/// Configuration shared by the builder, the compression engine and the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Fraction of the context window usable for input
    pub usage_threshold: f64,
    /// Tokens withheld for the model's answer
    pub response_token_reserve: u32,
    /// Trailing window of history turns considered by the builder
    pub recent_turns_kept: u32,
    /// Hard cap on history turns sent
    pub max_history_turns: u32,
    /// Minimum summary tokens before it gets its own cache breakpoint
    pub cache_breakpoint_threshold: u32,
    /// History budget floor when layers 1-2 eat the budget
    pub min_history_budget: u32,
    /// Uncompressed turns that trigger compression
    pub compress_after_turns: u32,
    /// Turns summarized per compression pass
    pub compress_batch_turns: u32,
    /// Output cap for the summarization call
    pub max_summary_tokens: u32,
    /// Summary size above which it is compressed again
    pub summary_recompress_threshold: u32,
    /// Maximum self-compression passes per compress call
    pub max_recompress_passes: u32,
    /// Low-cost model used for summarization
    pub compression_model: String,
    /// Layer 1 text when the system prompt and documents are empty
    pub default_persona: String,
    /// TTL for cache breakpoints
    pub cache_ttl: CacheTtl,
    /// Input size at which provider-side compaction kicks in
    pub compaction_trigger_tokens: u32,
    /// Upper bound on one summarization call, in seconds
    pub compression_timeout_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            usage_threshold: 0.80,
            response_token_reserve: 8192,
            recent_turns_kept: 10,
            max_history_turns: 40,
            cache_breakpoint_threshold: 1024,
            min_history_budget: 1000,
            compress_after_turns: 10,
            compress_batch_turns: 5,
            max_summary_tokens: 500,
            summary_recompress_threshold: 3000,
            max_recompress_passes: 1,
            compression_model: DEFAULT_COMPRESSION_MODEL.to_string(),
            default_persona: DEFAULT_PERSONA.to_string(),
            cache_ttl: CacheTtl::default(),
            compaction_trigger_tokens: 160_000,
            compression_timeout_secs: 120,
        }
    }
}

impl ContextConfig {
    /// Reject values the builder or the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.usage_threshold > 0.0 && self.usage_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "usage_threshold must be in (0, 1], got {}",
                self.usage_threshold
            )));
        }
        if self.compress_after_turns == 0 {
            return Err(Error::Config("compress_after_turns must be at least 1".into()));
        }
        if self.compress_batch_turns == 0 {
            return Err(Error::Config("compress_batch_turns must be at least 1".into()));
        }
        if self.recent_turns_kept == 0 || self.max_history_turns == 0 {
            return Err(Error::Config(
                "recent_turns_kept and max_history_turns must be at least 1".into(),
            ));
        }
        if self.max_summary_tokens == 0 {
            return Err(Error::Config("max_summary_tokens must be at least 1".into()));
        }
        if self.default_persona.trim().is_empty() {
            return Err(Error::Config("default_persona must not be empty".into()));
        }
        if self.compression_timeout_secs == 0 {
            return Err(Error::Config("compression_timeout_secs must be at least 1".into()));
        }
        if self.compression_model.trim().is_empty() {
            return Err(Error::Config("compression_model must not be empty".into()));
        }
        Ok(())
    }

    /// Input token budget for a model with this context window
    pub fn input_budget(&self, context_window: u32) -> u32 {
        let usable = (context_window as f64 * self.usage_threshold).floor() as u32;
        usable.saturating_sub(self.response_token_reserve)
    }
}
