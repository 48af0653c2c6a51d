//! Model registry: built-in price table with a configurable catalog on top.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Model used when an unknown id is requested
pub const DEFAULT_FALLBACK_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Pricing and limits for one model (prices in USD per million tokens)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier (e.g., "claude-sonnet-4-5-20250929")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Price per million uncached input tokens
    pub input_price: f64,
    /// Price per million output tokens
    pub output_price: f64,
    /// Context window size in tokens
    pub context_window: u32,
    /// Whether the model supports extended thinking
    #[serde(default = "default_true")]
    pub supports_thinking: bool,
    /// Whether the model accepts the one-hour cache TTL
    #[serde(default = "default_true")]
    pub supports_cache_1h: bool,
}

fn default_true() -> bool {
    true
}

struct ModelEntry {
    id: &'static str,
    name: &'static str,
    input_price: f64,
    output_price: f64,
    context_window: u32,
}

impl ModelEntry {
    fn to_model(&self) -> ModelInfo {
        ModelInfo {
            id: self.id.to_string(),
            name: self.name.to_string(),
            input_price: self.input_price,
            output_price: self.output_price,
            context_window: self.context_window,
            supports_thinking: true,
            supports_cache_1h: true,
        }
    }
}

const MODEL_ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        id: "claude-opus-4-6",
        name: "Claude Opus 4.6 (Latest)",
        input_price: 5.00,
        output_price: 25.00,
        context_window: 200_000,
    },
    ModelEntry {
        id: "claude-opus-4-5-20251101",
        name: "Claude Opus 4.5",
        input_price: 5.00,
        output_price: 25.00,
        context_window: 200_000,
    },
    ModelEntry {
        id: "claude-sonnet-4-5-20250929",
        name: "Claude Sonnet 4.5",
        input_price: 3.00,
        output_price: 15.00,
        context_window: 200_000,
    },
    ModelEntry {
        id: "claude-haiku-4-5-20251001",
        name: "Claude Haiku 4.5",
        input_price: 1.00,
        output_price: 5.00,
        context_window: 200_000,
    },
];

/// Last resort when even the configured fallback is missing from the catalog
static BUILTIN_FALLBACK: LazyLock<ModelInfo> = LazyLock::new(|| {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == DEFAULT_FALLBACK_MODEL)
        .map(|e| e.to_model())
        .unwrap_or_else(|| MODEL_ENTRIES[0].to_model())
});

/// Get all built-in models.
pub fn builtin_models() -> Vec<ModelInfo> {
    MODEL_ENTRIES.iter().map(|e| e.to_model()).collect()
}

/// The set of models a host knows prices and context windows for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    /// Known models
    pub models: Vec<ModelInfo>,
    /// Model whose prices and window apply to unknown ids
    pub fallback: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: builtin_models(),
            fallback: DEFAULT_FALLBACK_MODEL.to_string(),
        }
    }
}

impl ModelCatalog {
    /// Built-in models plus `extra`; entries in `extra` replace built-ins with the same id.
    pub fn with_models(extra: Vec<ModelInfo>) -> Self {
        let mut catalog = Self::default();
        for model in extra {
            catalog.insert(model);
        }
        catalog
    }

    /// Add or replace a model
    pub fn insert(&mut self, model: ModelInfo) {
        if let Some(existing) = self.models.iter_mut().find(|m| m.id == model.id) {
            *existing = model;
        } else {
            self.models.push(model);
        }
    }

    /// Look up a model by ID.
    pub fn get(&self, id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Look up a model by ID, falling back to the designated default model.
    pub fn resolve(&self, id: &str) -> &ModelInfo {
        if let Some(model) = self.get(id) {
            return model;
        }
        tracing::warn!("Unknown model '{}', using {} pricing", id, self.fallback);
        self.get(&self.fallback).unwrap_or(&BUILTIN_FALLBACK)
    }

    /// Context window of a model (fallback model's window for unknown ids)
    pub fn context_window(&self, id: &str) -> u32 {
        self.resolve(id).context_window
    }

    /// Check the catalog is usable
    pub fn validate(&self) -> crate::Result<()> {
        if self.models.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "model catalog is empty".to_string(),
            ));
        }
        if self.get(&self.fallback).is_none() {
            return Err(crate::Error::InvalidConfig(format!(
                "fallback model '{}' is not in the catalog",
                self.fallback
            )));
        }
        for model in &self.models {
            if model.context_window == 0 {
                return Err(crate::Error::InvalidConfig(format!(
                    "model '{}' has a zero context window",
                    model.id
                )));
            }
            if model.input_price < 0.0 || model.output_price < 0.0 {
                return Err(crate::Error::InvalidConfig(format!(
                    "model '{}' has a negative price",
                    model.id
                )));
            }
        }
        Ok(())
    }
}
