//! Token estimation
//!
//! Budget arithmetic in the context builder and the compressor must agree,
//! so both take the same [`TokenEstimator`]. With the `tiktoken` feature the
//! default estimator counts cl100k_base BPE tokens; without it (or if the
//! encoding fails to load) it falls back to chars/4.

use std::sync::Arc;

/// Approximates the token count of text
pub trait TokenEstimator: Send + Sync {
    /// Token estimate for `text`. Deterministic and never fails.
    fn estimate(&self, text: &str) -> u32;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Shared estimator handle
pub type SharedEstimator = Arc<dyn TokenEstimator>;

/// chars/4 heuristic
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    const CHARS_PER_TOKEN: usize = 4;
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> u32 {
        let tokens = text.chars().count() / Self::CHARS_PER_TOKEN;
        u32::try_from(tokens).unwrap_or(u32::MAX)
    }

    fn name(&self) -> &'static str {
        "chars/4"
    }
}

/// BPE token counts using the cl100k_base encoding
#[cfg(feature = "tiktoken")]
pub struct TiktokenEstimator {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenEstimator {
    /// Load the cl100k_base encoding
    pub fn new() -> crate::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to load cl100k_base: {}", e)))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> u32 {
        let tokens = self.bpe.encode_with_special_tokens(text).len();
        u32::try_from(tokens).unwrap_or(u32::MAX)
    }

    fn name(&self) -> &'static str {
        "cl100k_base"
    }
}

/// The best estimator available in this build.
pub fn default_estimator() -> SharedEstimator {
    #[cfg(feature = "tiktoken")]
    {
        match TiktokenEstimator::new() {
            Ok(estimator) => return Arc::new(estimator),
            Err(e) => tracing::warn!("{}; falling back to chars/4 token estimate", e),
        }
    }
    Arc::new(HeuristicEstimator)
}
