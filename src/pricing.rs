use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price per 1M tokens, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    pub input: f64,
    pub output: f64,
}

impl TokenPrice {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }
}

/// Static pricing table mapping model identifiers to token prices.
///
/// Lookups never fail: an unrecognized model falls back to the default
/// entry, so cost attribution keeps working when a new model shows up
/// before the table is updated.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, TokenPrice>,
    default_price: TokenPrice,
}

const DEFAULT_PRICE: TokenPrice = TokenPrice::new(1.00, 2.00);

/// Decimal places kept on an estimate. Fixed so that sums over many
/// executions don't accumulate float noise in different directions.
const COST_PRECISION: i32 = 6;

impl PricingTable {
    /// Empty table; every model resolves to the default entry.
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            default_price: DEFAULT_PRICE,
        }
    }

    /// Table seeded with known provider pricing.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();

        // Groq
        table.register("groq/llama-3.1-70b", TokenPrice::new(0.59, 0.79));
        table.register("groq/llama-3.1-8b", TokenPrice::new(0.05, 0.08));
        table.register("groq/mixtral-8x7b", TokenPrice::new(0.24, 0.24));

        // Anthropic
        table.register("claude-3-5-sonnet-20241022", TokenPrice::new(3.00, 15.00));
        table.register("claude-3-opus-20240229", TokenPrice::new(15.00, 75.00));
        table.register("claude-3-sonnet-20240229", TokenPrice::new(3.00, 15.00));
        table.register("claude-3-haiku-20240307", TokenPrice::new(0.25, 1.25));

        // OpenAI
        table.register("gpt-4o", TokenPrice::new(2.50, 10.00));
        table.register("gpt-4o-mini", TokenPrice::new(0.15, 0.60));
        table.register("gpt-4-turbo", TokenPrice::new(10.00, 30.00));

        table
    }

    /// Register or replace pricing for a model.
    pub fn register(&mut self, model: impl Into<String>, price: TokenPrice) {
        self.models.insert(model.into(), price);
    }

    /// Override the fallback entry used for unknown models.
    pub fn set_default_price(&mut self, price: TokenPrice) {
        self.default_price = price;
    }

    pub fn price_for(&self, model: &str) -> &TokenPrice {
        self.models.get(model).unwrap_or(&self.default_price)
    }

    /// Estimate the cost in USD of one execution on `model`.
    pub fn estimate(&self, model: &str, tokens_input: i64, tokens_output: i64) -> f64 {
        let price = self.price_for(model);
        let input_cost = (tokens_input as f64 / 1_000_000.0) * price.input;
        let output_cost = (tokens_output as f64 / 1_000_000.0) * price.output;
        round_to(input_cost + output_cost, COST_PRECISION)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Round to a fixed number of decimal places.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
