use axum::{Json, extract::State};
use std::sync::Arc;
use crate::error::BrokerError;
use crate::models::{AskRequest, AskResponse};
use crate::state::AppState;

pub async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, BrokerError> {
    state.broker.handle(payload).await.map(Json)
}
