use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, SdkError};
use aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError;
use aws_sdk_bedrockruntime::primitives::Blob;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Generation, GenerationRequest, Generator};
use crate::error::GenerationError;

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

// Anthropic messages body accepted by InvokeModel
#[derive(Serialize)]
struct MessagesBody<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct BedrockGenerator {
    client: aws_sdk_bedrockruntime::Client,
}

impl BedrockGenerator {
    pub fn new(client: aws_sdk_bedrockruntime::Client) -> Self {
        Self { client }
    }
}

fn request_body(request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
    let body = MessagesBody {
        anthropic_version: ANTHROPIC_VERSION,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        system: Some(request.system_prompt.as_str()).filter(|s| !s.trim().is_empty()),
        messages: vec![Message {
            role: "user",
            content: request.user_prompt(),
        }],
    };
    serde_json::to_vec(&body).map_err(|e| GenerationError::Fatal(format!("encode request: {e}")))
}

fn reply_text(bytes: &[u8]) -> Result<String, GenerationError> {
    let reply: MessagesReply = serde_json::from_slice(bytes)
        .map_err(|e| GenerationError::Fatal(format!("unexpected model output: {e}")))?;
    let text = reply
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::Fatal("model returned an empty response".to_string()));
    }
    Ok(text.to_string())
}

fn classify(err: SdkError<InvokeModelError>) -> GenerationError {
    let message = DisplayErrorContext(&err).to_string();
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        SdkError::ServiceError(context) => {
            let e = context.err();
            e.is_throttling_exception()
                || e.is_model_timeout_exception()
                || e.is_service_unavailable_exception()
                || e.is_internal_server_exception()
                || e.is_model_not_ready_exception()
        }
        _ => false,
    };
    if transient {
        GenerationError::Transient(message)
    } else {
        GenerationError::Fatal(message)
    }
}

#[async_trait]
impl Generator for BedrockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let body = request_body(request)?;
        debug!(model_id = %request.model_id, passages = request.passages.len(), "Invoking Bedrock model");

        let output = self
            .client
            .invoke_model()
            .model_id(&request.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(classify)?;

        let text = reply_text(output.body().as_ref())?;
        info!(model_id = %request.model_id, chars = text.len(), "Generated response");
        Ok(Generation {
            text,
            model_id: request.model_id.clone(),
        })
    }
}
