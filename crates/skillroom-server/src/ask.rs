//! `POST /api/ai/ask`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use skillroom_assist::window_history;
use skillroom_core::assist::{AskFailure, AskRequest, AskResponse};

use crate::server::AppState;

pub(crate) const UPSTREAM_FAILURE: &str = "Failed to get AI response";

fn failure(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(AskFailure {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub async fn ask_handler(State(state): State<AppState>, Json(request): Json<AskRequest>) -> Response {
    let question = request.question.trim();
    if question.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "question must not be empty");
    }

    let history = window_history(&request.history, state.config.max_history_turns);
    debug!(
        provider = state.provider.name(),
        history_turns = history.len(),
        "forwarding question"
    );

    match state.provider.answer(history, question).await {
        Ok(response) => Json(AskResponse { response }).into_response(),
        Err(e) => {
            warn!(
                provider = state.provider.name(),
                error_kind = e.error_kind(),
                error = %e,
                "answer provider failed"
            );
            failure(StatusCode::BAD_GATEWAY, UPSTREAM_FAILURE)
        }
    }
}
