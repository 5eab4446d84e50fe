use sha2::{Digest, Sha256};
use std::time::Instant;
use uuid::Uuid;

use crate::decoder::{decode, DecodedResult, FailureKind};
use crate::error::ExecuteError;
use crate::models::ExecuteResponse;
use crate::sandbox::{execute, ExecutionOutcome};
use crate::state::AppState;
use crate::validator::{has_entry_point, validate};
use crate::wrapper::ExecutionPayload;

/// Check, validate, run, and decode one script.
///
/// Nothing touches the filesystem until validation has passed.
pub async fn run_script(state: &AppState, script: &str) -> Result<ExecuteResponse, ExecuteError> {
    let request_id = Uuid::new_v4();
    let script_sha256 = hash_bytes(script.as_bytes());
    let started_at = Instant::now();

    let result = run_pipeline(state, script).await;

    let duration_ms = started_at.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => tracing::info!(
            %request_id,
            script_sha256 = %script_sha256,
            duration_ms,
            "script executed"
        ),
        Err(err @ ExecuteError::LaunchFailed { reason }) => tracing::error!(
            %request_id,
            script_sha256 = %script_sha256,
            outcome = err.as_str(),
            error = %reason,
            duration_ms,
            "sandbox infrastructure failure"
        ),
        Err(err @ ExecuteError::Rejected(violation)) => tracing::info!(
            %request_id,
            script_sha256 = %script_sha256,
            outcome = err.as_str(),
            rule = violation.detail(),
            "script rejected"
        ),
        Err(err) => tracing::info!(
            %request_id,
            script_sha256 = %script_sha256,
            outcome = err.as_str(),
            duration_ms,
            "script failed"
        ),
    }
    result
}

async fn run_pipeline(state: &AppState, script: &str) -> Result<ExecuteResponse, ExecuteError> {
    if !has_entry_point(script) {
        return Err(ExecuteError::MissingEntryPoint);
    }
    validate(&state.rules, script)?;

    let payload = ExecutionPayload::wrap(script);
    match execute(&payload, &state.sandbox).await {
        ExecutionOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        } => interpret(decode(&stdout), exit_code, &stderr),
        ExecutionOutcome::TimedOut => Err(ExecuteError::Timeout {
            timeout: state.sandbox.timeout,
        }),
        ExecutionOutcome::LaunchFailed(reason) => Err(ExecuteError::LaunchFailed { reason }),
        ExecutionOutcome::OutputLimitExceeded(stream) => Err(ExecuteError::ExecutionFailed {
            stderr: format!("{stream} exceeded the configured output limit"),
        }),
    }
}

fn interpret(
    decoded: DecodedResult,
    exit_code: Option<i32>,
    stderr: &[u8],
) -> Result<ExecuteResponse, ExecuteError> {
    match decoded {
        DecodedResult::Success { stdout, value } => Ok(ExecuteResponse {
            result: value,
            stdout,
        }),
        DecodedResult::Failure {
            kind: FailureKind::InvalidResult,
            stdout,
        } => Err(ExecuteError::InvalidResult { stdout }),
        DecodedResult::Failure {
            kind: FailureKind::Serialization(detail),
            ..
        } => Err(ExecuteError::ExecutionFailed {
            stderr: format!("malformed result line: {detail}"),
        }),
        DecodedResult::Failure {
            kind: FailureKind::RuntimeError,
            ..
        } => Err(ExecuteError::ExecutionFailed {
            stderr: runtime_diagnostic(exit_code, stderr),
        }),
    }
}

fn runtime_diagnostic(exit_code: Option<i32>, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match exit_code {
        Some(0) => "script exited without printing its result marker".to_string(),
        Some(code) => format!("script exited with status {code} before returning a result"),
        None => "script was terminated by a signal before returning a result".to_string(),
    }
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
