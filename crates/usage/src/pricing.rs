//! Static model pricing.
//!
//! Keys are model-name substrings matched case-insensitively; the first
//! match in insertion order wins, so more specific names (e.g.
//! "gpt-4o-mini") must precede their prefixes ("gpt-4o"). Costs are USD
//! per million tokens. Unmatched models fall back to a flat combined rate.

/// Flat USD per 1M tokens (input + output) for unknown models.
pub const DEFAULT_RATE_PER_MTOK: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    pub input: f64,
    pub output: f64,
}

pub struct PricingTable {
    entries: Vec<(&'static str, ModelRate)>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingTable {
    pub fn new() -> Self {
        // Order matters: first substring match wins.
        let entries = vec![
            ("gpt-4o-mini", ModelRate { input: 0.15, output: 0.60 }),
            ("gpt-4o", ModelRate { input: 2.50, output: 10.00 }),
            ("gpt-4.1-mini", ModelRate { input: 0.40, output: 1.60 }),
            ("gpt-4.1", ModelRate { input: 2.00, output: 8.00 }),
            ("o3-mini", ModelRate { input: 1.10, output: 4.40 }),
            ("o3", ModelRate { input: 2.00, output: 8.00 }),
            ("claude-3-5-haiku", ModelRate { input: 0.80, output: 4.00 }),
            ("haiku", ModelRate { input: 1.00, output: 5.00 }),
            ("claude-3-5-sonnet", ModelRate { input: 3.00, output: 15.00 }),
            ("sonnet", ModelRate { input: 3.00, output: 15.00 }),
            ("opus", ModelRate { input: 15.00, output: 75.00 }),
            ("gemini-1.5-flash", ModelRate { input: 0.075, output: 0.30 }),
            ("gemini-1.5-pro", ModelRate { input: 1.25, output: 5.00 }),
            ("gemini-2.0-flash", ModelRate { input: 0.10, output: 0.40 }),
        ];
        Self { entries }
    }

    /// Cost in USD for one call against `model`.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let model_lower = model.to_lowercase();
        for (pattern, rate) in &self.entries {
            if model_lower.contains(pattern) {
                return input_tokens as f64 * rate.input / 1e6
                    + output_tokens as f64 * rate.output / 1e6;
            }
        }
        (input_tokens + output_tokens) as f64 * DEFAULT_RATE_PER_MTOK / 1e6
    }
}
