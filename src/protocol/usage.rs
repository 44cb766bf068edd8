//! Token usage accounting shared by stream-json events and persisted
//! log entries.

use serde::{Deserialize, Serialize};

/// Per-message token accounting. Totals are derived on demand rather than
/// stored, since not every event carries every field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, alias = "cache_creation_input_tokens")]
    pub cache_creation_tokens: u64,
    #[serde(default, alias = "cache_read_input_tokens")]
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// Sum of every accounted token, including cache creation/read.
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(other.cache_creation_tokens);
        self.cache_read_tokens = self
            .cache_read_tokens
            .saturating_add(other.cache_read_tokens);
    }
}

/// Per-model usage/cost breakdown carried on some `result` events.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelUsage {
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_all_fields() {
        let u = TokenUsage {
            input_tokens: 3,
            output_tokens: 1,
            cache_creation_tokens: 2,
            cache_read_tokens: 4,
        };
        assert_eq!(u.total(), 10);
    }

    #[test]
    fn merge_accumulates() {
        let mut a = TokenUsage {
            input_tokens: 1,
            ..Default::default()
        };
        let b = TokenUsage {
            input_tokens: 2,
            output_tokens: 5,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.input_tokens, 3);
        assert_eq!(a.output_tokens, 5);
    }

    #[test]
    fn accepts_cache_alias_field_names() {
        let v = serde_json::json!({
            "input_tokens": 1,
            "output_tokens": 2,
            "cache_creation_input_tokens": 3,
            "cache_read_input_tokens": 4
        });
        let u: TokenUsage = serde_json::from_value(v).unwrap();
        assert_eq!(u.cache_creation_tokens, 3);
        assert_eq!(u.cache_read_tokens, 4);
    }
}
