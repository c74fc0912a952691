use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{error, info};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::models::AskRequest;

// One line of the labeling job's input manifest
#[derive(Debug, Clone, Deserialize)]
pub struct DataObject {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub reference_response: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_prompt_id")]
    pub prompt_id: String,
    // Filled in by a batch warm-up run
    #[serde(default)]
    pub response: String,
}

fn default_category() -> String {
    "General".to_string()
}

fn default_prompt_id() -> String {
    "N/A".to_string()
}

// Rendered into the worker UI template
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskInput {
    #[serde(rename = "taskObject", skip_serializing_if = "Value::is_null")]
    pub task_object: Value,
    pub question: String,
    pub response: String,
    pub reference_response: String,
    pub category: String,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreAnnotationResponse {
    pub task_input: TaskInput,
    pub human_annotation_required: String,
}

impl PreAnnotationResponse {
    fn for_review(task_input: TaskInput) -> Self {
        Self {
            task_input,
            human_annotation_required: "true".to_string(),
        }
    }
}

fn field(raw: &Value, name: &str, fallback: &str) -> String {
    raw.get(name)
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

// Errors still go to a worker, with the message in place of the answer
fn failure(raw: &Value, err: &BrokerError) -> PreAnnotationResponse {
    PreAnnotationResponse::for_review(TaskInput {
        task_object: raw.clone(),
        question: field(raw, "question", "Error occurred"),
        response: format!("Error generating response: {err}"),
        reference_response: String::new(),
        category: "Error".to_string(),
        prompt_id: field(raw, "prompt_id", "error"),
    })
}

pub async fn handle_pre_annotation(
    broker: &Broker,
    event: Value,
    deadline: Option<Instant>,
) -> PreAnnotationResponse {
    let raw = event.get("dataObject").cloned().unwrap_or(Value::Null);
    let data: DataObject = match &raw {
        Value::Object(_) => match serde_json::from_value(raw.clone()) {
            Ok(data) => data,
            Err(e) => {
                let err = BrokerError::Malformed(e.to_string());
                error!(error = %err, "Error in pre-annotation processing");
                return failure(&raw, &err);
            }
        },
        _ => {
            let err = BrokerError::Malformed("event has no dataObject".to_string());
            error!(error = %err, "Error in pre-annotation processing");
            return failure(&raw, &err);
        }
    };

    let response = if !data.response.trim().is_empty() {
        info!(prompt_id = %data.prompt_id, "Using pre-generated response");
        data.response.clone()
    } else {
        info!(prompt_id = %data.prompt_id, "Generating response");
        match broker.handle_within(AskRequest::new(data.question.clone()), deadline).await {
            Ok(envelope) => envelope.response,
            Err(err) => {
                error!(prompt_id = %data.prompt_id, error = %err, "Error in pre-annotation processing");
                return failure(&raw, &err);
            }
        }
    };

    info!(prompt_id = %data.prompt_id, "Prepared task input");
    PreAnnotationResponse::for_review(TaskInput {
        task_object: raw,
        question: data.question,
        response,
        reference_response: data.reference_response,
        category: data.category,
        prompt_id: data.prompt_id,
    })
}
