//! Chat model pricing, in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// $/1M tokens maps 1:1 to nanodollars/token x 1000.
// Claude 3.5 Haiku: $0.80 in, $4.00 out
// GPT-4o-mini: $0.15 in, $0.60 out
// GPT-5-mini: $0.25 in, $2.00 out
// Kimi K2 0905: $0.39 in, $1.90 out
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new(800, 4_000);
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);
const GPT_5_MINI: ModelPricing = ModelPricing::new(250, 2_000);
const KIMI_K2_0905: ModelPricing = ModelPricing::new(390, 1_900);

/// Used for models missing from the table.
const FALLBACK: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    HashMap::from([
        ("anthropic/claude-3-5-haiku", CLAUDE_35_HAIKU),
        ("openai/gpt-4o-mini", GPT_4O_MINI),
        ("openai/gpt-5-mini", GPT_5_MINI),
        ("moonshotai/kimi-k2-0905", KIMI_K2_0905),
    ])
}

pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    PRICING_MAP.get_or_init(init_pricing).get(model_id).copied()
}

pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(FALLBACK)
        .calculate_cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_cost() {
        // 1000 * 250 + 1000 * 2000
        assert_eq!(chat_cost("openai/gpt-5-mini", 1_000, 1_000), 2_250_000);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        assert!(get_pricing("nobody/model").is_none());
        assert_eq!(chat_cost("nobody/model", 1, 1), 6_000);
    }
}
