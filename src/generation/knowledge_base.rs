use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::error::DisplayErrorContext;
use aws_sdk_bedrockagentruntime::types::KnowledgeBaseQuery;
use tracing::info;

use super::{Passage, RetrievalIndex};
use crate::error::RetrievalError;

pub struct KnowledgeBaseIndex {
    client: aws_sdk_bedrockagentruntime::Client,
    knowledge_base_id: String,
}

impl KnowledgeBaseIndex {
    pub fn new(client: aws_sdk_bedrockagentruntime::Client, knowledge_base_id: impl Into<String>) -> Self {
        Self {
            client,
            knowledge_base_id: knowledge_base_id.into(),
        }
    }
}

// One retrieval result as returned by the knowledge base
struct Hit<'a> {
    text: &'a str,
    source: Option<&'a str>,
    score: Option<f64>,
}

// Blank chunks are dropped before the limit applies
fn collect_passages<'a>(hits: impl Iterator<Item = Hit<'a>>, limit: usize) -> Vec<Passage> {
    hits.filter_map(|hit| {
        let text = hit.text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Passage {
            text: text.to_string(),
            source: hit.source.map(str::to_string),
            score: hit.score,
        })
    })
    .take(limit)
    .collect()
}

#[async_trait]
impl RetrievalIndex for KnowledgeBaseIndex {
    async fn retrieve(&self, question: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        let query = KnowledgeBaseQuery::builder().text(question).build();

        let output = self
            .client
            .retrieve()
            .knowledge_base_id(&self.knowledge_base_id)
            .retrieval_query(query)
            .send()
            .await
            .map_err(|e| RetrievalError(DisplayErrorContext(&e).to_string()))?;

        let passages = collect_passages(
            output.retrieval_results().iter().map(|result| Hit {
                text: result.content().map(|c| c.text()).unwrap_or_default(),
                source: result
                    .location()
                    .and_then(|l| l.s3_location())
                    .and_then(|s3| s3.uri()),
                score: result.score(),
            }),
            limit,
        );

        info!(
            knowledge_base_id = %self.knowledge_base_id,
            count = passages.len(),
            "Retrieved passages"
        );
        for (idx, passage) in passages.iter().take(3).enumerate() {
            info!(
                citation = idx + 1,
                source = passage.source.as_deref().unwrap_or("Unknown"),
                "Grounding source"
            );
        }
        Ok(passages)
    }
}
