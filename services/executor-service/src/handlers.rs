use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ExecuteError;
use crate::models::ExecuteRequest;
use crate::service::run_script;
use crate::state::AppState;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz() -> StatusCode {
    StatusCode::OK
}

pub async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    // A body that is not a JSON object with a string `script` is treated as missing it.
    let script = match payload {
        Ok(Json(ExecuteRequest {
            script: Some(script),
        })) => script,
        Ok(_) => return ExecuteError::MissingScript.into_response(),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable execute request");
            return ExecuteError::MissingScript.into_response();
        }
    };

    match run_script(&state, &script).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}
