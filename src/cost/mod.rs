// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token pricing.
//!
//! `cost = (prompt / 1000) * prompt_price_per_1k
//!       + (completion / 1000) * completion_price_per_1k`
//!
//! Model names are normalized (lower-cased, trimmed, provider prefix
//! stripped, aliases resolved) before lookup, and any model missing from the
//! table is priced with the `unknown` entry so an estimate is always produced.

mod calculator;
mod pricing;

pub use calculator::{
    format_cost, BatchCost, CostBreakdown, CostCalculator, ModelComparison, TokenUsage,
};
pub use pricing::{default_pricing, normalize_model_name, ModelPricing, PricingUpdate, UNKNOWN_MODEL};
