//! LLM gateway data types: token accounting, pricing, and errors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: i64,
    pub output: i64,
}

impl TokenUsage {
    pub fn total(&self) -> i64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// USD attribution for traces; not a billing system.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl Pricing {
    pub fn cost_usd(&self, usage: &TokenUsage) -> f64 {
        (usage.input as f64 / 1000.0) * self.input_cost_per_1k
            + (usage.output as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// LLM gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {message}")]
    ParseError { message: String, content: String },

    #[error("LLM returned invalid output after repair attempt: {0}")]
    InvalidOutput(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("request cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LlmError {
    /// Transport-level faults worth another attempt; schema faults are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ApiError(_) | Self::Timeout(_) | Self::RateLimited(_))
    }
}

impl From<LlmError> for crate::utils::error::ApiError {
    fn from(e: LlmError) -> Self {
        use crate::utils::error::ApiError;
        match e {
            LlmError::Timeout(_) | LlmError::RateLimited(_) => ApiError::llm_timeout(e.to_string()),
            LlmError::InvalidOutput(_) | LlmError::ParseError { .. } => {
                ApiError::llm_invalid_output(e.to_string())
            },
            LlmError::Cancelled => ApiError::internal("request cancelled"),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_math() {
        let pricing = Pricing { input_cost_per_1k: 0.5, output_cost_per_1k: 1.0 };
        let usage = TokenUsage { input: 2000, output: 500 };
        assert!((pricing.cost_usd(&usage) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn retryability() {
        assert!(LlmError::Timeout(30).is_retryable());
        assert!(LlmError::ApiError("503".into()).is_retryable());
        assert!(
            !LlmError::ParseError { message: "bad".into(), content: String::new() }.is_retryable()
        );
        assert!(!LlmError::Cancelled.is_retryable());
    }
}
