//! strata-ai: completion provider layer for strata
//!
//! Provides the request types shared by the context builder and the
//! compressor, a model/price catalog, cost arithmetic, token estimation and
//! a streaming Anthropic Messages API client.

pub mod cost;
pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod tokens;
pub mod types;

pub use cost::{CacheEstimate, CostBreakdown, CostModel, PricingConfig, format_cost};
pub use error::{Error, Result};
pub use models::{ModelCatalog, ModelInfo};
pub use providers::CompletionProvider;
pub use stream::{CompletionEventStream, StreamEvent};
pub use tokens::{HeuristicEstimator, SharedEstimator, TokenEstimator, default_estimator};
pub use types::*;
