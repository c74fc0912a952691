use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::models::AskRequest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

fn cors_headers() -> Value {
    json!({
        "Content-Type": "application/json",
        "Access-Control-Allow-Origin": "*",
        "Access-Control-Allow-Headers": "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token",
        "Access-Control-Allow-Methods": "POST,OPTIONS",
    })
}

fn response(status_code: u16, body: &impl Serialize) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: cors_headers(),
        body: serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string()),
    }
}

fn error_response(err: &BrokerError) -> ApiGatewayResponse {
    response(err.status_code().as_u16(), &err.body())
}

// Body is a JSON string from API Gateway, an object from direct invocations
pub fn parse_event(event: &Value) -> Result<AskRequest, BrokerError> {
    let body = match event.get("body") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .map_err(|e| BrokerError::Malformed(e.to_string()))?,
        Some(Value::Null) | None => json!({}),
        Some(other) => other.clone(),
    };
    serde_json::from_value(body).map_err(|e| BrokerError::Malformed(e.to_string()))
}

// Time kept back to serialize the reply before Lambda kills the invocation
const DEADLINE_MARGIN: Duration = Duration::from_millis(250);

// Lambda reports its deadline in epoch milliseconds
pub fn invocation_deadline(deadline_ms: u64) -> Instant {
    let remaining_ms = i64::try_from(deadline_ms)
        .unwrap_or(i64::MAX)
        .saturating_sub(Utc::now().timestamp_millis())
        .max(0);
    let remaining = Duration::from_millis(remaining_ms as u64).saturating_sub(DEADLINE_MARGIN);
    Instant::now() + remaining
}

pub async fn handle_apigw_event(broker: &Broker, event: Value, deadline: Option<Instant>) -> ApiGatewayResponse {
    if event.get("httpMethod").and_then(Value::as_str) == Some("OPTIONS") {
        return response(200, &json!({}));
    }

    let request = match parse_event(&event) {
        Ok(request) => request,
        Err(err) => {
            info!(error = %err, "Rejected malformed request");
            return error_response(&err);
        }
    };

    match broker.handle_within(request, deadline).await {
        Ok(envelope) => response(200, &envelope),
        Err(err) => {
            if matches!(err, BrokerError::GenerationFailure(_)) {
                error!(error = %err, "Error processing request");
            }
            error_response(&err)
        }
    }
}
