use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::{parse_task, route_error, RouteError};
use crate::state::AppState;
use taskpilot::models::message::Message;

#[derive(Debug, Serialize)]
struct SessionResponse {
    task: String,
    id: String,
    messages: Vec<Message>,
}

// Handlers
async fn get_session(
    State(state): State<AppState>,
    Path((task, id)): Path<(String, String)>,
) -> Result<Json<SessionResponse>, RouteError> {
    let kind = parse_task(&task)?;
    let slot = state
        .session(kind, &id)
        .await
        .map_err(|e| route_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let messages = slot.conversation.lock().await.messages().to_vec();

    Ok(Json(SessionResponse {
        task: kind.to_string(),
        id,
        messages,
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path((task, id)): Path<(String, String)>,
) -> Result<StatusCode, RouteError> {
    let kind = parse_task(&task)?;
    if state.reset(kind, &id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(route_error(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", id),
        ))
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions/:task/:id", get(get_session).delete(delete_session))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{empty, json_body, state_with};
    use axum::http::Request;
    use tower::ServiceExt;

    fn request(method: &str, uri: &str) -> Request<axum::body::Body> {
        Request::builder()
            .uri(uri)
            .method(method)
            .body(empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_session_is_primed() {
        let app = routes(state_with(&[]));

        let response = app
            .oneshot(request("GET", "/sessions/doc/s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["task"], "doc");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let state = state_with(&[]);
        let app = routes(state.clone());

        let response = app
            .clone()
            .oneshot(request("DELETE", "/sessions/chat/s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(request("GET", "/sessions/chat/s1"))
            .await
            .unwrap();
        assert_eq!(state.session_count().await, 1);

        let response = app
            .oneshot(request("DELETE", "/sessions/chat/s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let app = routes(state_with(&[]));
        let response = app
            .oneshot(request("GET", "/sessions/weather/s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
