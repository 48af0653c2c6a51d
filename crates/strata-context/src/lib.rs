//! strata-context: layered context assembly and conversation compression
//!
//! This crate builds cache-aware request payloads from a system prompt,
//! project documents, a rolling summary and recent history, and keeps the
//! rolling summary current by compressing old turns in the background.

pub mod builder;
pub mod compression;
pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use builder::{ContextBuilder, ContextPayload, LayerTokens, RequestEstimate};
pub use compression::{CompressionEngine, CompressionResult, format_transcript};
pub use config::ContextConfig;
pub use error::{Error, Result};
pub use events::{CompressionEvent, SkipReason};
pub use scheduler::CompressionScheduler;
pub use store::{
    Conversation, DocumentStore, InMemoryDocuments, InMemoryStore, Message, MessageStore,
};
