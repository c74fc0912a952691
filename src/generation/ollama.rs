use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Generation, GenerationRequest, Generator};
use crate::error::GenerationError;

// Ollama API request format
#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

// Ollama API response format
#[derive(Deserialize)]
struct OllamaResponse {
    model: String,
    response: String,
}

/// Local generation through an Ollama server's `/api/generate`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaGenerator {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        // add http:// if not present
        let base_url = if base_url.starts_with("http") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let message = format!("ollama returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GenerationError::Transient(message)
    } else {
        GenerationError::Fatal(message)
    }
}

fn classify_transport(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() || err.is_connect() {
        GenerationError::Transient(format!("request to ollama failed: {err}"))
    } else {
        GenerationError::Fatal(format!("request to ollama failed: {err}"))
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let payload = OllamaRequest {
            model: &request.model_id,
            prompt: request.user_prompt(),
            system: Some(request.system_prompt.as_str()).filter(|s| !s.trim().is_empty()),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        debug!(url = %self.base_url, model = %request.model_id, "Calling ollama");

        let res = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body = res
            .json::<OllamaResponse>()
            .await
            .map_err(|e| GenerationError::Fatal(format!("Parse Error: {e}")))?;
        let text = body.response.trim();
        if text.is_empty() {
            return Err(GenerationError::Fatal("model returned an empty response".to_string()));
        }

        Ok(Generation {
            text: text.to_string(),
            model_id: body.model,
        })
    }
}
