// Export route modules
pub mod reply;
pub mod session;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::str::FromStr;

use crate::state::AppState;
use taskpilot::tasks::TaskKind;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type RouteError = (StatusCode, Json<ErrorResponse>);

pub fn route_error(status: StatusCode, error: impl Into<String>) -> RouteError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// The task named in the path, or 404
pub fn parse_task(name: &str) -> Result<TaskKind, RouteError> {
    TaskKind::from_str(name)
        .map_err(|_| route_error(StatusCode::NOT_FOUND, format!("Unknown task '{}'", name)))
}

async fn status() -> &'static str {
    "ok"
}

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .merge(reply::routes(state.clone()))
        .merge(session::routes(state))
}
