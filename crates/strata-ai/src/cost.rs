//! Cost calculation for actual usage and pre-flight estimates.
//!
//! Cache writes are billed at a premium over plain input (the premium grows
//! with the TTL), cache reads at a steep discount. Prices come from the
//! [`ModelCatalog`]; unknown models are billed at the fallback model's rates.

use serde::{Deserialize, Serialize};

use crate::models::ModelCatalog;
use crate::types::{CacheTtl, UsageReport};

/// Cache multipliers applied to a model's input price
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Write multiplier for the five-minute TTL
    pub cache_write_multiplier_5m: f64,
    /// Write multiplier for the one-hour TTL
    pub cache_write_multiplier_1h: f64,
    /// Read multiplier, independent of TTL
    pub cache_read_multiplier: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cache_write_multiplier_5m: 1.25,
            cache_write_multiplier_1h: 2.0,
            cache_read_multiplier: 0.10,
        }
    }
}

impl PricingConfig {
    /// Write multiplier for a TTL
    pub fn write_multiplier(&self, ttl: CacheTtl) -> f64 {
        match ttl {
            CacheTtl::FiveMinutes => self.cache_write_multiplier_5m,
            CacheTtl::OneHour => self.cache_write_multiplier_1h,
        }
    }

    /// Check the multipliers are usable
    pub fn validate(&self) -> crate::Result<()> {
        let all = [
            self.cache_write_multiplier_5m,
            self.cache_write_multiplier_1h,
            self.cache_read_multiplier,
        ];
        if all.iter().any(|m| !m.is_finite() || *m < 0.0) {
            return Err(crate::Error::InvalidConfig(
                "cache multipliers must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cost breakdown in dollars
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
    pub total: f64,
}

/// Pre-flight estimate of input cost under a cache hit or miss assumption
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEstimate {
    /// Cacheable plus uncached tokens
    pub estimated_input_tokens: u32,
    /// Estimated input cost in dollars
    pub estimated_cost: f64,
    /// Tokens expected to be served from cache
    pub cached_tokens: u32,
    /// Saving against an all-uncached request, in percent (one decimal)
    pub savings_percent: f64,
}

/// Converts token counts into dollars
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    catalog: ModelCatalog,
    pricing: PricingConfig,
    ttl: CacheTtl,
}

impl CostModel {
    /// Create a cost model
    pub fn new(catalog: ModelCatalog, pricing: PricingConfig, ttl: CacheTtl) -> Self {
        Self {
            catalog,
            pricing,
            ttl,
        }
    }

    /// Set the cache TTL used for write pricing
    pub fn set_ttl(&mut self, ttl: CacheTtl) {
        self.ttl = ttl;
    }

    /// Current cache TTL
    pub fn ttl(&self) -> CacheTtl {
        self.ttl
    }

    /// The model catalog prices are read from
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Cache multipliers
    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// Per-category cost of a request
    pub fn breakdown(&self, model_id: &str, usage: &UsageReport) -> CostBreakdown {
        let model = self.catalog.resolve(model_id);
        let input_price = model.input_price / 1_000_000.0;
        let output_price = model.output_price / 1_000_000.0;
        let write_multiplier = self.pricing.write_multiplier(self.ttl);

        let input = usage.input_tokens as f64 * input_price;
        let output = usage.output_tokens as f64 * output_price;
        let cache_write = usage.cache_creation_tokens as f64 * input_price * write_multiplier;
        let cache_read =
            usage.cache_read_tokens as f64 * input_price * self.pricing.cache_read_multiplier;

        let total = input + output + cache_write + cache_read;
        tracing::debug!(
            "Cost calc [{}]: {} in + {} out + {} cache_write ({:.2}x) + {} cache_read = ${:.6}",
            model_id,
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_creation_tokens,
            write_multiplier,
            usage.cache_read_tokens,
            total
        );

        CostBreakdown {
            input,
            output,
            cache_write,
            cache_read,
            total,
        }
    }

    /// Cost in dollars of a completed request
    pub fn cost(&self, model_id: &str, usage: &UsageReport) -> f64 {
        self.breakdown(model_id, usage).total
    }

    /// Estimate input cost assuming the cacheable prefix is a hit or a miss.
    ///
    /// A miss is priced as plain input: the write premium is only known once
    /// the provider reports how much it actually wrote.
    pub fn estimate_with_cache(
        &self,
        model_id: &str,
        cacheable_tokens: u32,
        uncached_tokens: u32,
        likely_hit: bool,
    ) -> CacheEstimate {
        let model = self.catalog.resolve(model_id);
        let input_price = model.input_price / 1_000_000.0;
        let total_tokens = cacheable_tokens.saturating_add(uncached_tokens);
        let full_price = (cacheable_tokens as f64 + uncached_tokens as f64) * input_price;

        if !likely_hit {
            return CacheEstimate {
                estimated_input_tokens: total_tokens,
                estimated_cost: full_price,
                cached_tokens: 0,
                savings_percent: 0.0,
            };
        }

        let cache_read_cost =
            cacheable_tokens as f64 * input_price * self.pricing.cache_read_multiplier;
        let uncached_cost = uncached_tokens as f64 * input_price;
        let estimated_cost = cache_read_cost + uncached_cost;
        let savings_percent = if full_price > 0.0 {
            ((1.0 - estimated_cost / full_price) * 1000.0).round() / 10.0
        } else {
            0.0
        };

        CacheEstimate {
            estimated_input_tokens: total_tokens,
            estimated_cost,
            cached_tokens: cacheable_tokens,
            savings_percent,
        }
    }

    /// Cost of `tokens` uncached input tokens
    pub fn estimate_input_cost(&self, model_id: &str, tokens: u32) -> f64 {
        let input_price = self.catalog.resolve(model_id).input_price / 1_000_000.0;
        tokens as f64 * input_price
    }
}

/// Format a dollar amount with precision that suits its size
pub fn format_cost(cost_usd: f64) -> String {
    if cost_usd < 0.001 {
        format!("${:.4}", cost_usd)
    } else if cost_usd < 0.10 {
        format!("${:.3}", cost_usd)
    } else {
        format!("${:.2}", cost_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONNET: &str = "claude-sonnet-4-5-20250929";

    fn usage(input: u32, output: u32, write: u32, read: u32) -> UsageReport {
        UsageReport {
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: write,
            cache_read_tokens: read,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_cost_plain_input_output() {
        let model = CostModel::default();
        // 1M in at $3 + 1M out at $15
        let cost = model.cost(SONNET, &usage(1_000_000, 1_000_000, 0, 0));
        assert!(approx(cost, 18.0));
    }

    #[test]
    fn test_cache_write_multiplier_depends_on_ttl() {
        let mut model = CostModel::default();
        let report = usage(0, 0, 1_000_000, 0);
        assert!(approx(model.cost(SONNET, &report), 3.75));
        model.set_ttl(CacheTtl::OneHour);
        assert!(approx(model.cost(SONNET, &report), 6.0));
    }

    #[test]
    fn test_cache_read_is_discounted() {
        let model = CostModel::default();
        let cost = model.cost(SONNET, &usage(0, 0, 0, 1_000_000));
        assert!(approx(cost, 0.3));
    }

    #[test]
    fn test_unknown_model_priced_as_fallback() {
        let model = CostModel::default();
        let report = usage(1000, 500, 200, 3000);
        assert!(approx(
            model.cost("mystery-model", &report),
            model.cost(SONNET, &report)
        ));
    }

    #[test]
    fn test_cost_monotonic_in_each_field() {
        let model = CostModel::default();
        let base = usage(1000, 1000, 1000, 1000);
        let base_cost = model.cost(SONNET, &base);
        for bumped in [
            usage(1001, 1000, 1000, 1000),
            usage(1000, 1001, 1000, 1000),
            usage(1000, 1000, 1001, 1000),
            usage(1000, 1000, 1000, 1001),
        ] {
            assert!(model.cost(SONNET, &bumped) >= base_cost);
        }
    }

    #[test]
    fn test_breakdown_total_matches_parts() {
        let model = CostModel::default();
        let b = model.breakdown(SONNET, &usage(10_000, 2_000, 5_000, 40_000));
        assert!(approx(b.total, b.input + b.output + b.cache_write + b.cache_read));
    }

    #[test]
    fn test_estimate_with_cache_hit() {
        let model = CostModel::default();
        let est = model.estimate_with_cache(SONNET, 9000, 1000, true);
        assert_eq!(est.cached_tokens, 9000);
        assert_eq!(est.estimated_input_tokens, 10_000);
        // 9000 * 0.1 + 1000 = 1900 token-equivalents out of 10000
        assert!(approx(est.estimated_cost, 1900.0 * 3.0 / 1_000_000.0));
        assert!(approx(est.savings_percent, 81.0));
    }

    #[test]
    fn test_estimate_with_cache_miss() {
        let model = CostModel::default();
        let est = model.estimate_with_cache(SONNET, 9000, 1000, false);
        assert_eq!(est.cached_tokens, 0);
        assert_eq!(est.savings_percent, 0.0);
        assert!(approx(est.estimated_cost, 10_000.0 * 3.0 / 1_000_000.0));
    }

    #[test]
    fn test_estimate_with_cache_zero_tokens() {
        let model = CostModel::default();
        let est = model.estimate_with_cache(SONNET, 0, 0, true);
        assert_eq!(est.estimated_cost, 0.0);
        assert_eq!(est.savings_percent, 0.0);
    }

    #[test]
    fn test_estimate_with_cache_huge_counts_saturate() {
        let model = CostModel::default();
        let miss = model.estimate_with_cache(SONNET, u32::MAX, 1, false);
        assert_eq!(miss.estimated_input_tokens, u32::MAX);
        let expected = (u32::MAX as f64 + 1.0) * 3.0 / 1_000_000.0;
        assert!((miss.estimated_cost - expected).abs() < 1e-6);

        let hit = model.estimate_with_cache(SONNET, u32::MAX, u32::MAX, true);
        assert_eq!(hit.cached_tokens, u32::MAX);
        assert!(hit.estimated_cost < expected * 2.0);
        assert!(hit.savings_percent > 0.0);
    }

    #[test]
    fn test_estimate_input_cost() {
        let model = CostModel::default();
        assert!(approx(
            model.estimate_input_cost("claude-haiku-4-5-20251001", 2_000_000),
            2.0
        ));
    }

    #[test]
    fn test_format_cost_precision() {
        assert_eq!(format_cost(0.00042), "$0.0004");
        assert_eq!(format_cost(0.0421), "$0.042");
        assert_eq!(format_cost(1.2345), "$1.23");
    }

    #[test]
    fn test_pricing_validate_rejects_negative() {
        let pricing = PricingConfig {
            cache_read_multiplier: -0.1,
            ..Default::default()
        };
        assert!(pricing.validate().is_err());
        assert!(PricingConfig::default().validate().is_ok());
    }
}
