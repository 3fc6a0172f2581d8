//! Per-model cost estimation for billing-grade token accounting.

/// USD per 1M tokens: (input, output).
const MODEL_COSTS: &[(&str, f64, f64)] = &[
    ("claude-sonnet-4-20250514", 3.0, 15.0),
    ("claude-haiku-4-5-20251001", 1.0, 5.0),
    ("claude-haiku-3-20240307", 0.25, 1.25),
    ("gpt-4o", 2.5, 10.0),
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-4.1-nano", 0.20, 0.80),
    ("text-embedding-3-small", 0.02, 0.0),
];

/// Conservative mid-range rates for models missing from the table.
const FALLBACK_COSTS: (f64, f64) = (3.0, 15.0);

/// Per-1M rates for a model: exact match, then substring match in
/// either direction, then the fallback (with a warning).
fn rates_for(model: &str) -> (f64, f64) {
    for (name, input, output) in MODEL_COSTS {
        if *name == model {
            return (*input, *output);
        }
    }
    for (name, input, output) in MODEL_COSTS {
        if model.contains(name) || name.contains(model) {
            return (*input, *output);
        }
    }
    tracing::warn!(model, "unknown model for cost estimation, using fallback rates");
    FALLBACK_COSTS
}

/// Estimated USD cost of a call. Linear in each token count.
pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input_rate, output_rate) = rates_for(model);
    (input_tokens as f64 / 1_000_000.0) * input_rate
        + (output_tokens as f64 / 1_000_000.0) * output_rate
}
