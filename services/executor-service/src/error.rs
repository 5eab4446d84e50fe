//! Failures of the execute pipeline and their client-facing responses.
//!
//! Every variant is answered with 400. A sandbox that cannot launch looks the
//! same to the caller as a script that crashed; the two are told apart only in
//! the service logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::validator::Violation;

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Missing 'script' in request")]
    MissingScript,

    #[error("Script must define a main() function")]
    MissingEntryPoint,

    #[error(transparent)]
    Rejected(#[from] Violation),

    #[error("Script execution timed out after {}", describe_duration(.timeout))]
    Timeout { timeout: Duration },

    #[error("Script must return a valid JSON value")]
    InvalidResult { stdout: String },

    /// The sandbox process could not be started or supervised.
    #[error("Script execution failed")]
    LaunchFailed { reason: String },

    /// The script ran but produced no usable result.
    #[error("Script execution failed")]
    ExecutionFailed { stderr: String },
}

impl ExecuteError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecuteError::MissingScript => "missing_script",
            ExecuteError::MissingEntryPoint => "missing_entry_point",
            ExecuteError::Rejected(Violation::DisallowedImport(_)) => "disallowed_import",
            ExecuteError::Rejected(Violation::DisallowedPattern(_)) => "disallowed_pattern",
            ExecuteError::Timeout { .. } => "timeout",
            ExecuteError::InvalidResult { .. } => "invalid_result",
            ExecuteError::LaunchFailed { .. } => "launch_failed",
            ExecuteError::ExecutionFailed { .. } => "execution_failed",
        }
    }

    fn into_body(self) -> ErrorResponse {
        let error = self.to_string();
        let (stdout, stderr) = match self {
            ExecuteError::Timeout { .. } => (Some(String::new()), None),
            ExecuteError::InvalidResult { stdout } => (Some(stdout), None),
            ExecuteError::LaunchFailed { reason } => (None, Some(reason)),
            ExecuteError::ExecutionFailed { stderr } => (None, Some(stderr)),
            ExecuteError::MissingScript
            | ExecuteError::MissingEntryPoint
            | ExecuteError::Rejected(_) => (None, None),
        };
        ErrorResponse {
            error,
            stdout,
            stderr,
        }
    }
}

impl IntoResponse for ExecuteError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self.into_body())).into_response()
    }
}

fn describe_duration(duration: &Duration) -> String {
    if duration.subsec_nanos() == 0 {
        match duration.as_secs() {
            1 => "1 second".to_string(),
            secs => format!("{secs} seconds"),
        }
    } else {
        format!("{} milliseconds", duration.as_millis())
    }
}
