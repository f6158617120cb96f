use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::PricingEntry;

/// Calibrated chars-per-token ratio per model family. Heuristic accuracy is
/// acceptable; this is never asked to be exact, only monotonic and cheap.
fn chars_per_token(model: &str) -> f64 {
    let lower = model.to_ascii_lowercase();
    if lower.contains("claude") || lower.contains("anthropic") {
        3.6
    } else if lower.contains("gpt-4") || lower.contains("o1") {
        3.8
    } else if lower.contains("gpt-3.5") || lower.contains("turbo") {
        4.0
    } else if lower.contains("gemini") {
        3.9
    } else {
        4.0
    }
}

pub fn estimate_tokens(model: &str, text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let ratio = chars_per_token(model);
    ((text.chars().count() as f64) / ratio).ceil() as u64
}

/// `cost = ceil(inputTokens) * inputRate/1000 + maxOutputTokens * outputRate/1000`,
/// expressed in integer micro-units of the configured currency. Never negative.
pub fn estimate_cost_micros(pricing: &PricingEntry, input_tokens: u64, max_output_tokens: u32) -> i64 {
    let input_cost = (input_tokens as i64 * pricing.input_per_1k_micros) / 1_000;
    let output_cost = (max_output_tokens as i64 * pricing.output_per_1k_micros) / 1_000;
    (input_cost + output_cost).max(0)
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Bounded in-process cache: a simple size cap, clear-on-overflow is
/// acceptable per the spec — no LRU bookkeeping needed.
pub struct TokenizerCache {
    capacity: usize,
    entries: Mutex<HashMap<(String, u64), u64>>,
}

impl TokenizerCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn tokenize(&self, model: &str, text: &str) -> u64 {
        let key = (model.to_string(), hash_text(text));
        let mut entries = self.entries.lock().expect("tokenizer cache poisoned");
        if let Some(count) = entries.get(&key) {
            return *count;
        }
        let count = estimate_tokens(model, text);
        if entries.len() >= self.capacity {
            entries.clear();
        }
        entries.insert(key, count);
        count
    }
}

impl Default for TokenizerCache {
    fn default() -> Self {
        Self::new(4_096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_is_never_negative_and_scales_with_length() {
        let short = estimate_tokens("gpt-4", "hello");
        let long = estimate_tokens("gpt-4", &"hello world ".repeat(50));
        assert!(long > short);
    }

    #[test]
    fn estimate_cost_never_negative() {
        let pricing = PricingEntry {
            input_per_1k_micros: 0,
            output_per_1k_micros: 0,
        };
        assert_eq!(estimate_cost_micros(&pricing, 10_000, 500), 0);
    }

    #[test]
    fn cache_returns_identical_estimate_on_repeat_lookup() {
        let cache = TokenizerCache::new(8);
        let a = cache.tokenize("claude-3", "a repeated prompt");
        let b = cache.tokenize("claude-3", "a repeated prompt");
        assert_eq!(a, b);
    }

    #[test]
    fn cache_clears_wholesale_past_capacity() {
        let cache = TokenizerCache::new(2);
        cache.tokenize("m", "one");
        cache.tokenize("m", "two");
        cache.tokenize("m", "three");
        let entries = cache.entries.lock().unwrap();
        assert!(entries.len() <= 2);
    }
}
