//! Error types for strata-context

use thiserror::Error;

/// Result type alias using strata-context Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by stores and configuration checks
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] strata_ai::Error),

    /// A message or document store failed
    #[error("Store error: {0}")]
    Store(String),

    /// No conversation with this id
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a store error from anything displayable
    pub fn store(err: impl std::fmt::Display) -> Self {
        Error::Store(err.to_string())
    }

    /// Check if retrying on the next trigger may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_retryable(),
            _ => false,
        }
    }
}
