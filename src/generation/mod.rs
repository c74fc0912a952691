mod bedrock;
mod knowledge_base;
mod ollama;

pub use bedrock::BedrockGenerator;
pub use knowledge_base::KnowledgeBaseIndex;
pub use ollama::OllamaGenerator;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{GenerationError, RetrievalError};
use crate::metrics::RETRIEVAL_FAILURES;

#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub text: String,
    pub source: Option<String>,
    pub score: Option<f64>,
}

impl Passage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
            score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub system_prompt: String,
    pub question: String,
    pub passages: Vec<Passage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    // Bare question, or numbered context passages then the question
    pub fn user_prompt(&self) -> String {
        if self.passages.is_empty() {
            return self.question.clone();
        }

        let context = self
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| format!("[{}] {}", i + 1, p.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "Context:\n{context}\n\nQuestion: {}\n\nAnswer:",
            self.question
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model_id: String,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    async fn retrieve(&self, question: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError>;
}

pub enum GenerationPath {
    Plain(Arc<dyn Generator>),
    RetrievalAugmented {
        generator: Arc<dyn Generator>,
        index: Arc<dyn RetrievalIndex>,
        max_passages: usize,
    },
}

impl GenerationPath {
    pub fn generator(&self) -> &dyn Generator {
        match self {
            GenerationPath::Plain(generator) => generator.as_ref(),
            GenerationPath::RetrievalAugmented { generator, .. } => generator.as_ref(),
        }
    }

    // A failed retrieval yields no passages
    pub async fn grounding(&self, question: &str) -> Vec<Passage> {
        let GenerationPath::RetrievalAugmented {
            index,
            max_passages,
            ..
        } = self
        else {
            return Vec::new();
        };

        match index.retrieve(question, *max_passages).await {
            Ok(mut passages) => {
                passages.truncate(*max_passages);
                debug!(count = passages.len(), "Retrieved grounding passages");
                passages
            }
            Err(err) => {
                RETRIEVAL_FAILURES.inc();
                warn!(error = %err, "Retrieval failed, generating without context");
                Vec::new()
            }
        }
    }
}
