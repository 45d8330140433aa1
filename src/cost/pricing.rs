// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model pricing entries, the seed table and model-name normalization.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Key of the entry used when a model is not in the table.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Price of one model, in USD per 1000 tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub name: String,
    pub prompt_price_per_1k: f64,
    pub completion_price_per_1k: f64,
}

impl ModelPricing {
    pub fn new(name: impl Into<String>, prompt_price_per_1k: f64, completion_price_per_1k: f64) -> Self {
        Self {
            name: name.into(),
            prompt_price_per_1k,
            completion_price_per_1k,
        }
    }
}

/// Partial update for an existing entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_price_per_1k: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_price_per_1k: Option<f64>,
}

/// Aliases resolved after lower-casing and trimming.
static MODEL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("gpt4", "gpt-4"),
        ("gpt-4-0613", "gpt-4"),
        ("gpt-4-turbo-preview", "gpt-4-turbo"),
        ("gpt-4-1106-preview", "gpt-4-turbo"),
        ("gpt4o", "gpt-4o"),
        ("gpt-4o-2024-08-06", "gpt-4o"),
        ("gpt4o-mini", "gpt-4o-mini"),
        ("gpt35", "gpt-3.5-turbo"),
        ("gpt-35-turbo", "gpt-3.5-turbo"),
        ("gpt-3.5", "gpt-3.5-turbo"),
        ("claude-3", "claude-3-sonnet-20240229"),
        ("claude-3-sonnet", "claude-3-sonnet-20240229"),
        ("claude-3-opus", "claude-3-opus-20240229"),
        ("claude-3-haiku", "claude-3-haiku-20240307"),
        ("claude-3.5-sonnet", "claude-3-5-sonnet-20241022"),
        ("claude-3-5-sonnet", "claude-3-5-sonnet-20241022"),
        ("claude-3.5-haiku", "claude-3-5-haiku-20241022"),
        ("claude-3-5-haiku", "claude-3-5-haiku-20241022"),
        ("claude-sonnet-4", "claude-sonnet-4-20250514"),
        ("claude-opus-4", "claude-opus-4-20250514"),
    ])
});

/// Provider prefixes some agents put in front of the model id.
const PROVIDER_PREFIXES: &[&str] = &["anthropic/", "openai/"];

/// Normalize a model name for table lookup.
///
/// Lower-cases, trims, strips a provider prefix, then resolves aliases.
pub fn normalize_model_name(model: &str) -> String {
    let mut name = model.trim().to_lowercase();
    for prefix in PROVIDER_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest.to_string();
            break;
        }
    }
    match MODEL_ALIASES.get(name.as_str()) {
        Some(canonical) => canonical.to_string(),
        None => name,
    }
}

/// Known models plus the `unknown` fallback.
pub fn default_pricing() -> HashMap<String, ModelPricing> {
    [
        ModelPricing::new("gpt-4", 0.03, 0.06),
        ModelPricing::new("gpt-4-32k", 0.06, 0.12),
        ModelPricing::new("gpt-4-turbo", 0.01, 0.03),
        ModelPricing::new("gpt-4o", 0.0025, 0.01),
        ModelPricing::new("gpt-4o-mini", 0.00015, 0.0006),
        ModelPricing::new("gpt-3.5-turbo", 0.0005, 0.0015),
        ModelPricing::new("o1", 0.015, 0.06),
        ModelPricing::new("o3-mini", 0.0011, 0.0044),
        ModelPricing::new("claude-3-opus-20240229", 0.015, 0.075),
        ModelPricing::new("claude-3-sonnet-20240229", 0.003, 0.015),
        ModelPricing::new("claude-3-haiku-20240307", 0.00025, 0.00125),
        ModelPricing::new("claude-3-5-sonnet-20241022", 0.003, 0.015),
        ModelPricing::new("claude-3-5-haiku-20241022", 0.0008, 0.004),
        ModelPricing::new("claude-sonnet-4-20250514", 0.003, 0.015),
        ModelPricing::new("claude-opus-4-20250514", 0.015, 0.075),
        ModelPricing::new(UNKNOWN_MODEL, 0.01, 0.03),
    ]
    .into_iter()
    .map(|p| (p.name.clone(), p))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_model_name() {
        assert_eq!(normalize_model_name("  GPT4 "), "gpt-4");
        assert_eq!(normalize_model_name("claude-3"), "claude-3-sonnet-20240229");
        assert_eq!(
            normalize_model_name("anthropic/claude-sonnet-4-20250514"),
            "claude-sonnet-4-20250514"
        );
        assert_eq!(normalize_model_name("Some-New-Model"), "some-new-model");
    }

    #[test]
    fn test_aliases_resolve_to_seeded_models() {
        let table = default_pricing();
        for target in MODEL_ALIASES.values() {
            assert!(table.contains_key(*target), "alias target {} not priced", target);
        }
        assert!(table.contains_key(UNKNOWN_MODEL));
    }
}
