//! Route handler functions for the coach endpoints.
//!
//! The coach endpoint accepts a loose JSON body and validates it by hand so
//! a malformed field produces a precise 400 message rather than a generic
//! deserialization failure.

use std::convert::Infallible;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{Extension, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use coach_core::types::Question;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cached_answers: usize,
    pub model_configured: bool,
}

/// GET /health - liveness and basic stats. Public.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: Instant::now().duration_since(state.start_time).as_secs(),
        cached_answers: state.orchestrator.cache().len(),
        model_configured: state.model_configured,
    })
}

/// Pull a validated `Question` out of the request body.
fn parse_question(user_id: &str, body: &Value) -> Result<Question, ApiError> {
    let obj = body
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("request body must be a JSON object".to_string()))?;

    let text = match obj.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(ApiError::BadRequest("message must be a string".to_string()));
        }
        None => return Err(ApiError::BadRequest("message is required".to_string())),
    };

    let streaming = match obj.get("stream") {
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(ApiError::BadRequest("stream must be a boolean".to_string())),
        // Incremental delivery is the default for the chat UI.
        None => true,
    };

    let page_context = match obj.get("pageContext") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) | Some(Value::Null) | None => None,
        Some(_) => {
            return Err(ApiError::BadRequest("pageContext must be a string".to_string()));
        }
    };

    let page_data = match obj.get("pageData") {
        Some(Value::Null) | None => None,
        Some(v) => Some(v.clone()),
    };

    Ok(Question {
        user_id: user_id.to_string(),
        text,
        page_context,
        page_data,
        streaming,
    })
}

/// POST /coach - answer a question, streamed or buffered.
pub async fn coach(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    if !state.model_configured {
        return Err(ApiError::ServiceUnavailable(
            "model API key is not configured".to_string(),
        ));
    }

    let question = parse_question(&user.user_id, &body)?;

    if question.streaming {
        let rx = state.orchestrator.answer_stream(&question).await?;
        let stream =
            ReceiverStream::new(rx).map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk)));
        let response = (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(stream),
        )
            .into_response();
        Ok(response)
    } else {
        let reply = state.orchestrator.answer(&question).await?;
        Ok(Json(reply).into_response())
    }
}
