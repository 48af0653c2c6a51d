//! Configuration file support

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strata_ai::models::DEFAULT_FALLBACK_MODEL;
use strata_ai::{CostModel, ModelCatalog, ModelInfo, PricingConfig};
use strata_context::ContextConfig;

/// Configuration for strata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model used for chat
    pub model: Option<String>,
    /// Anthropic API key (alternative to ANTHROPIC_API_KEY)
    pub api_key: Option<String>,
    /// Where conversations and project documents live
    pub data_dir: Option<PathBuf>,
    /// Context assembly and compression settings
    pub context: ContextConfig,
    /// Cache price multipliers
    pub pricing: PricingConfig,
    /// Extra or overriding entries for the model catalog
    pub models: Vec<ModelInfo>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STRATA_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        let config = match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring config file {}: {:#}", path.display(), e);
                    return Self::default();
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                return Self::default();
            }
        };
        tracing::debug!("Loaded config from {}", path.display());
        config
    }

    /// Parse and validate TOML config text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content).context("invalid TOML")?;
        config.context.validate()?;
        config.pricing.validate()?;
        config.catalog().validate()?;
        Ok(config)
    }

    /// Write the commented example config if no file exists yet
    pub fn init() -> anyhow::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        fs::write(&path, example_config())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Chat model, from the command line, the file, or the default
    pub fn model_id(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_string())
    }

    /// Directory holding conversations and project documents
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("strata")
        })
    }

    /// Built-in models plus the configured ones
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::with_models(self.models.clone())
    }

    /// Cost model using the configured prices and cache TTL
    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.catalog(), self.pricing.clone(), self.context.cache_ttl)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# strata configuration file
# Place at ~/.config/strata/config.toml or point STRATA_CONFIG_PATH at it

# Chat model
model = "claude-sonnet-4-5-20250929"

# Anthropic API key (ANTHROPIC_API_KEY is used when unset)
# api_key = "sk-ant-..."

# Conversations and project documents
# data_dir = "~/.local/share/strata"

[context]
# Share of the context window usable for input
usage_threshold = 0.80
# Tokens kept free for the answer
response_token_reserve = 8192
# History window and hard cap, in turns
recent_turns_kept = 10
max_history_turns = 40
# Minimum summary size that gets its own cache breakpoint
cache_breakpoint_threshold = 1024
# History budget floor when the prompt and summary leave no room
min_history_budget = 1000
# Compress once this many turns are uncompressed, this many at a time
compress_after_turns = 10
compress_batch_turns = 5
max_summary_tokens = 500
# Re-compress the summary itself above this size
summary_recompress_threshold = 3000
max_recompress_passes = 1
compression_model = "claude-haiku-4-5-20251001"
compression_timeout_secs = 120
# Cache TTL: "5m" or "1h"
cache_ttl = "5m"
# Provider-side compaction trigger (used with --compaction)
compaction_trigger_tokens = 160000

[pricing]
cache_write_multiplier_5m = 1.25
cache_write_multiplier_1h = 2.0
cache_read_multiplier = 0.10

# Additional models (prices in USD per million tokens)
# [[models]]
# id = "my-proxy-model"
# name = "Proxy model"
# input_price = 3.0
# output_price = 15.0
# context_window = 200000
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ai::CacheTtl;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some("claude-sonnet-4-5-20250929"));
        assert_eq!(config.context.compress_after_turns, 10);
        assert_eq!(config.context.cache_ttl, CacheTtl::FiveMinutes);
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse(
            r#"
            [context]
            cache_ttl = "1h"
            recent_turns_kept = 4

            [[models]]
            id = "custom"
            name = "Custom"
            input_price = 1.0
            output_price = 2.0
            context_window = 32000
            "#,
        )
        .unwrap();
        assert_eq!(config.context.cache_ttl, CacheTtl::OneHour);
        assert_eq!(config.context.recent_turns_kept, 4);
        assert_eq!(config.context.max_history_turns, 40);
        assert_eq!(config.pricing.cache_read_multiplier, 0.10);
        assert_eq!(config.catalog().context_window("custom"), 32000);
        assert_eq!(config.cost_model().ttl(), CacheTtl::OneHour);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::parse("[context]\nusage_threshold = 1.5\n").is_err());
        assert!(Config::parse("[pricing]\ncache_read_multiplier = -1.0\n").is_err());
        assert!(Config::parse("model = [").is_err());
    }

    #[test]
    fn test_model_precedence() {
        let config = Config {
            model: Some("from-file".into()),
            ..Default::default()
        };
        assert_eq!(config.model_id(Some("from-cli")), "from-cli");
        assert_eq!(config.model_id(None), "from-file");
        assert_eq!(Config::default().model_id(None), DEFAULT_FALLBACK_MODEL);
    }

    #[test]
    fn test_init_writes_example_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        // SAFETY: tests in this module are the only readers of this variable
        unsafe { std::env::set_var("STRATA_CONFIG_PATH", &path) };
        let written = Config::init().unwrap();
        assert_eq!(written, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), example_config());
        fs::write(&path, "model = \"kept\"\n").unwrap();
        Config::init().unwrap();
        assert_eq!(Config::load().model.as_deref(), Some("kept"));
        unsafe { std::env::remove_var("STRATA_CONFIG_PATH") };
    }
}
