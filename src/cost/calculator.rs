// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The cost calculator.
//!
//! Every cost figure in the system (iteration totals, session totals,
//! realtime aggregates) is a sum of [`CostCalculator::calculate_cost`] results.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CostError;

use super::pricing::{default_pricing, normalize_model_name, ModelPricing, PricingUpdate, UNKNOWN_MODEL};

/// Token counts for one priced call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model: String,
}

impl TokenUsage {
    pub fn new(model: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            model: model.into(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Priced result for one usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
    /// Model name as given by the caller.
    pub model: String,
    /// Table entry actually used (`unknown` when the model was not found).
    pub pricing_model: String,
}

impl CostBreakdown {
    pub fn used_fallback(&self) -> bool {
        self.pricing_model == UNKNOWN_MODEL
    }
}

/// Aggregate over many usages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCost {
    pub total_cost: f64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    /// Keyed by normalized model name.
    pub cost_by_model: HashMap<String, f64>,
}

/// One candidate in a model comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelComparison {
    pub model: String,
    pub cost: CostBreakdown,
    /// Absolute saving vs. the most expensive candidate.
    pub savings: f64,
    /// Saving as a percentage of the most expensive candidate.
    pub savings_percent: f64,
}

/// Prices token usage against a mutable pricing table.
///
/// Constructed explicitly and shared by reference (`Arc<CostCalculator>`);
/// runtime table edits are visible to every holder.
#[derive(Debug)]
pub struct CostCalculator {
    pricing: RwLock<HashMap<String, ModelPricing>>,
}

impl CostCalculator {
    /// Build from an initial table. Keys are normalized, and an `unknown`
    /// entry is added from the default table if missing.
    pub fn new(initial: HashMap<String, ModelPricing>) -> Self {
        let mut pricing: HashMap<String, ModelPricing> = initial
            .into_iter()
            .map(|(name, mut entry)| {
                let key = normalize_model_name(&name);
                entry.name = key.clone();
                (key, entry)
            })
            .collect();

        if !pricing.contains_key(UNKNOWN_MODEL) {
            if let Some(fallback) = default_pricing().remove(UNKNOWN_MODEL) {
                pricing.insert(UNKNOWN_MODEL.to_string(), fallback);
            }
        }

        Self {
            pricing: RwLock::new(pricing),
        }
    }

    pub fn with_default_pricing() -> Self {
        Self::new(default_pricing())
    }

    /// Price one usage. Unknown models use the `unknown` entry.
    pub fn calculate_cost(&self, usage: &TokenUsage) -> CostBreakdown {
        let pricing = self.resolve(&usage.model);

        let prompt_cost = (usage.prompt_tokens as f64 / 1000.0) * pricing.prompt_price_per_1k;
        let completion_cost =
            (usage.completion_tokens as f64 / 1000.0) * pricing.completion_price_per_1k;

        CostBreakdown {
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
            model: usage.model.clone(),
            pricing_model: pricing.name,
        }
    }

    /// Convenience wrapper returning only the total.
    pub fn cost_for(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.calculate_cost(&TokenUsage::new(model, prompt_tokens, completion_tokens))
            .total_cost
    }

    pub fn calculate_batch_cost(&self, usages: &[TokenUsage]) -> BatchCost {
        usages.iter().fold(BatchCost::default(), |mut batch, usage| {
            let cost = self.calculate_cost(usage);
            batch.total_cost += cost.total_cost;
            batch.total_prompt_tokens += usage.prompt_tokens;
            batch.total_completion_tokens += usage.completion_tokens;
            *batch
                .cost_by_model
                .entry(normalize_model_name(&usage.model))
                .or_insert(0.0) += cost.total_cost;
            batch
        })
    }

    /// Price `usage` under each candidate model, cheapest first.
    pub fn compare_models(&self, usage: &TokenUsage, models: &[&str]) -> Vec<ModelComparison> {
        let costs: Vec<CostBreakdown> = models
            .iter()
            .map(|model| {
                self.calculate_cost(&TokenUsage {
                    model: model.to_string(),
                    ..usage.clone()
                })
            })
            .collect();

        let max_cost = costs.iter().map(|c| c.total_cost).fold(0.0_f64, f64::max);

        let mut comparisons: Vec<ModelComparison> = costs
            .into_iter()
            .map(|cost| {
                let savings = max_cost - cost.total_cost;
                let savings_percent = if max_cost > 0.0 {
                    savings / max_cost * 100.0
                } else {
                    0.0
                };
                ModelComparison {
                    model: cost.model.clone(),
                    cost,
                    savings,
                    savings_percent,
                }
            })
            .collect();

        comparisons.sort_by(|a, b| a.cost.total_cost.total_cmp(&b.cost.total_cost));
        comparisons
    }

    /// Insert or replace a model.
    pub fn add_model(&self, pricing: ModelPricing) -> Result<(), CostError> {
        validate(&pricing.name, pricing.prompt_price_per_1k)?;
        validate(&pricing.name, pricing.completion_price_per_1k)?;

        let key = normalize_model_name(&pricing.name);
        info!(model = %key, "Pricing entry added");
        self.write().insert(
            key.clone(),
            ModelPricing {
                name: key,
                ..pricing
            },
        );
        Ok(())
    }

    /// Patch an existing model. Returns false if the model is not known.
    pub fn update_model(&self, model: &str, update: PricingUpdate) -> Result<bool, CostError> {
        if let Some(price) = update.prompt_price_per_1k {
            validate(model, price)?;
        }
        if let Some(price) = update.completion_price_per_1k {
            validate(model, price)?;
        }

        let key = normalize_model_name(model);
        let mut table = self.write();
        let Some(entry) = table.get_mut(&key) else {
            debug!(model = %key, "Update for unknown model ignored");
            return Ok(false);
        };
        if let Some(price) = update.prompt_price_per_1k {
            entry.prompt_price_per_1k = price;
        }
        if let Some(price) = update.completion_price_per_1k {
            entry.completion_price_per_1k = price;
        }
        info!(model = %key, "Pricing entry updated");
        Ok(true)
    }

    /// Remove a model. The `unknown` fallback cannot be removed.
    pub fn remove_model(&self, model: &str) -> Result<bool, CostError> {
        let key = normalize_model_name(model);
        if key == UNKNOWN_MODEL {
            return Err(CostError::FallbackRequired);
        }
        Ok(self.write().remove(&key).is_some())
    }

    /// Exact entry for a model, without fallback.
    pub fn get_pricing(&self, model: &str) -> Option<ModelPricing> {
        self.read().get(&normalize_model_name(model)).cloned()
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.read().contains_key(&normalize_model_name(model))
    }

    /// All entries sorted by name.
    pub fn list_models(&self) -> Vec<ModelPricing> {
        let mut models: Vec<ModelPricing> = self.read().values().cloned().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    fn resolve(&self, model: &str) -> ModelPricing {
        let table = self.read();
        let key = normalize_model_name(model);
        if let Some(entry) = table.get(&key) {
            return entry.clone();
        }
        debug!(model = %model, "No pricing for model, using fallback");
        table
            .get(UNKNOWN_MODEL)
            .cloned()
            .unwrap_or_else(|| ModelPricing::new(UNKNOWN_MODEL, 0.0, 0.0))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ModelPricing>> {
        self.pricing.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ModelPricing>> {
        self.pricing.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::with_default_pricing()
    }
}

fn validate(model: &str, price: f64) -> Result<(), CostError> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(CostError::InvalidPricing {
            model: model.to_string(),
            message: format!("price must be a non-negative number, got {}", price),
        })
    }
}

/// Format a USD amount for display.
pub fn format_cost(cost: f64) -> String {
    if cost == 0.0 {
        "$0.00".to_string()
    } else if cost < 0.01 {
        format!("${:.4}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_calculate_cost_known_model() {
        let calc = CostCalculator::with_default_pricing();
        let cost = calc.calculate_cost(&TokenUsage::new("gpt-4", 1000, 500));

        assert!(approx(cost.prompt_cost, 0.03));
        assert!(approx(cost.completion_cost, 0.03));
        assert!(approx(cost.total_cost, cost.prompt_cost + cost.completion_cost));
        assert_eq!(cost.pricing_model, "gpt-4");
        assert!(!cost.used_fallback());
    }

    #[test]
    fn test_total_is_sum_of_parts() {
        let calc = CostCalculator::with_default_pricing();
        for (model, p, c) in [
            ("claude-3-opus", 0, 0),
            ("gpt-4o-mini", 1, 999_999),
            ("mystery", 123_456, 7),
            ("GPT4", 10_000_000, 10_000_000),
        ] {
            let cost = calc.calculate_cost(&TokenUsage::new(model, p, c));
            assert!(cost.prompt_cost >= 0.0);
            assert!(cost.completion_cost >= 0.0);
            assert_eq!(cost.total_cost, cost.prompt_cost + cost.completion_cost);
        }
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let calc = CostCalculator::with_default_pricing();
        let cost = calc.calculate_cost(&TokenUsage::new("totally-new-model", 2000, 1000));
        assert!(cost.used_fallback());
        assert!(approx(cost.total_cost, 2.0 * 0.01 + 1.0 * 0.03));
    }

    #[test]
    fn test_alias_lookup() {
        let calc = CostCalculator::with_default_pricing();
        let aliased = calc.cost_for("Claude-3", 1000, 1000);
        let canonical = calc.cost_for("claude-3-sonnet-20240229", 1000, 1000);
        assert!(approx(aliased, canonical));
    }

    #[test]
    fn test_fallback_added_when_missing() {
        let calc = CostCalculator::new(HashMap::from([(
            "Cheap".to_string(),
            ModelPricing::new("Cheap", 0.001, 0.002),
        )]));
        assert!(calc.has_model("cheap"));
        assert!(calc.has_model(UNKNOWN_MODEL));
    }

    #[test]
    fn test_batch_cost() {
        let calc = CostCalculator::with_default_pricing();
        let usages = vec![
            TokenUsage::new("gpt-4", 1000, 0),
            TokenUsage::new("gpt4", 1000, 0),
            TokenUsage::new("gpt-3.5-turbo", 2000, 2000),
        ];
        let batch = calc.calculate_batch_cost(&usages);

        assert_eq!(batch.total_prompt_tokens, 4000);
        assert_eq!(batch.total_completion_tokens, 2000);
        assert!(approx(batch.cost_by_model["gpt-4"], 0.06));
        assert!(approx(batch.cost_by_model["gpt-3.5-turbo"], 0.001 + 0.003));
        assert!(approx(batch.total_cost, 0.064));
    }

    #[test]
    fn test_compare_models_savings() {
        let calc = CostCalculator::new(HashMap::from([
            ("model-a".to_string(), ModelPricing::new("model-a", 0.01, 0.02)),
            ("model-b".to_string(), ModelPricing::new("model-b", 0.02, 0.04)),
        ]));
        let usage = TokenUsage::new("whatever", 1000, 1000);
        let ranked = calc.compare_models(&usage, &["model-b", "model-a"]);

        assert_eq!(ranked[0].model, "model-a");
        assert!((ranked[0].savings_percent - 50.0).abs() < 1e-6);
        assert!(approx(ranked[0].savings, 0.03));
        assert_eq!(ranked[1].model, "model-b");
        assert_eq!(ranked[1].savings_percent, 0.0);
    }

    #[test]
    fn test_pricing_table_mutation() {
        let calc = CostCalculator::with_default_pricing();

        assert!(!calc
            .update_model("brand-new", PricingUpdate {
                prompt_price_per_1k: Some(1.0),
                ..Default::default()
            })
            .unwrap());
        assert!(!calc.has_model("brand-new"));

        calc.add_model(ModelPricing::new("Brand-New", 0.5, 1.0)).unwrap();
        assert!(calc
            .update_model("brand-new", PricingUpdate {
                completion_price_per_1k: Some(2.0),
                ..Default::default()
            })
            .unwrap());
        let entry = calc.get_pricing("BRAND-NEW").unwrap();
        assert_eq!(entry.prompt_price_per_1k, 0.5);
        assert_eq!(entry.completion_price_per_1k, 2.0);

        assert!(calc.remove_model("brand-new").unwrap());
        assert!(!calc.remove_model("brand-new").unwrap());
        assert_eq!(calc.remove_model("unknown"), Err(CostError::FallbackRequired));
    }

    #[test]
    fn test_invalid_pricing_rejected() {
        let calc = CostCalculator::with_default_pricing();
        assert!(calc.add_model(ModelPricing::new("bad", -1.0, 0.0)).is_err());
        assert!(calc
            .update_model("gpt-4", PricingUpdate {
                prompt_price_per_1k: Some(f64::NAN),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(0.0015), "$0.0015");
        assert_eq!(format_cost(1.234), "$1.23");
    }
}
