use serde::{Deserialize, Serialize};

fn default_use_cache() -> bool {
    true
}

// Inbound question
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    // Overrides the configured model for this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            use_cache: true,
            model_id: None,
        }
    }
}

// Response envelope returned to the worker UI
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AskResponse {
    pub response: String,
    pub question: String,
    pub model_id: String,
    pub cached: bool,
    pub timestamp: String,
}
