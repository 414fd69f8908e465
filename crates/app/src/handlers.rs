use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rag_search_core::{QueryError, SearchRequest};
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchBody {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub search_payload: Option<SearchRequest>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbedBody {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Serialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    started_at: String,
    uptime_secs: u64,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn query_error_response(error: &QueryError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), %error, "request failed");
    } else {
        tracing::warn!(status = status.as_u16(), %error, "request rejected");
    }
    error_response(status, error.to_string())
}

pub(crate) async fn search_handler(
    State(state): State<AppState>,
    body: Result<Json<SearchBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };

    match state
        .api
        .answer_query(body.query.as_deref(), body.search_payload)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(error) => query_error_response(&error),
    }
}

pub(crate) async fn embed_handler(
    State(state): State<AppState>,
    body: Result<Json<EmbedBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };

    match state.api.embed_text(body.text.as_deref()).await {
        Ok(embedding) => Json(EmbedResponse { embedding }).into_response(),
        Err(error) => query_error_response(&error),
    }
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: (chrono::Utc::now() - state.started_at)
            .num_seconds()
            .max(0) as u64,
    })
}
