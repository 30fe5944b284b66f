use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{parse_task, route_error, RouteError};
use crate::state::AppState;
use taskpilot::models::message::Message;
use taskpilot::tasks::Reply;

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct ReplyResponse {
    reply: String,
    status: &'static str,
    /// Messages appended during the turn
    messages: Vec<Message>,
}

fn reply_status(reply: &Reply) -> &'static str {
    match reply {
        Reply::Answer(_) => "answer",
        Reply::Rejected(_) => "rejected",
        Reply::Exhausted { .. } => "exhausted",
    }
}

/// Run one turn. The turn works on a copy of the conversation that replaces it only
/// when the turn succeeds.
async fn handler(
    State(state): State<AppState>,
    Path((task, id)): Path<(String, String)>,
    Json(request): Json<ReplyRequest>,
) -> Result<Json<ReplyResponse>, RouteError> {
    let kind = parse_task(&task)?;
    let slot = state
        .session(kind, &id)
        .await
        .map_err(|e| route_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut conversation = slot.conversation.lock().await;
    let mut working = conversation.clone();
    let mark = working.len();

    match slot.task.reply(&mut working, &request.message).await {
        Ok(reply) => {
            let messages = working.since(mark).to_vec();
            *conversation = working;
            Ok(Json(ReplyResponse {
                status: reply_status(&reply),
                reply: reply.to_string(),
                messages,
            }))
        }
        Err(e) => {
            tracing::error!(task = %kind, id = %id, error = %e, "turn failed");
            Err(route_error(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions/:task/:id/reply", post(handler))
        .with_state(state)
}
