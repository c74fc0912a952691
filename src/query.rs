use crate::config::QueryLimits;
use crate::error::BrokerError;

/// A validated question, whitespace-normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
}

impl Query {
    // Length counts chars after trimming; whitespace runs collapse afterwards
    pub fn parse(raw: &str, limits: &QueryLimits) -> Result<Self, BrokerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BrokerError::InvalidInput("Question is required".to_string()));
        }

        let chars = trimmed.chars().count();
        if chars < limits.min_chars {
            return Err(BrokerError::InvalidInput(format!(
                "Question must be at least {} characters",
                limits.min_chars
            )));
        }
        if chars > limits.max_chars {
            return Err(BrokerError::InvalidInput(format!(
                "Question must be at most {} characters",
                limits.max_chars
            )));
        }

        Ok(Self {
            text: normalize(trimmed),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn folded(&self) -> String {
        self.text.to_lowercase()
    }
}

pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
