use std::{
    io::Write,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Instant,
};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};

use crate::state::SandboxConfig;
use crate::wrapper::ExecutionPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The sandbox exited on its own. A non-zero exit code is not a failure here.
    Completed {
        exit_code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
    LaunchFailed(String),
    OutputLimitExceeded(&'static str),
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed { .. } => "completed",
            ExecutionOutcome::TimedOut => "timed_out",
            ExecutionOutcome::LaunchFailed(_) => "launch_failed",
            ExecutionOutcome::OutputLimitExceeded(_) => "output_limit_exceeded",
        }
    }

    /// The run was cut short, so the sandbox's process group must be torn down.
    pub fn interrupted(&self) -> bool {
        !matches!(self, ExecutionOutcome::Completed { .. })
    }
}

enum CaptureError {
    Io(String),
    Limit(&'static str),
}

/// Run `payload` inside the sandbox. The scratch file is removed before this
/// returns, and also when the future is dropped mid-flight.
pub async fn execute(payload: &ExecutionPayload, sandbox: &SandboxConfig) -> ExecutionOutcome {
    let scratch = match write_scratch(payload, &sandbox.scratch_dir) {
        Ok(scratch) => scratch,
        Err(reason) => {
            tracing::error!(payload_id = %payload.id, error = %reason, "scratch file unavailable");
            return ExecutionOutcome::LaunchFailed(reason);
        }
    };

    let outcome = run_sandboxed(payload, scratch.path(), sandbox).await;

    let scratch_path = scratch.path().to_path_buf();
    if let Err(err) = scratch.close() {
        tracing::warn!(
            payload_id = %payload.id,
            path = %scratch_path.display(),
            error = %err,
            "scratch file removal failed"
        );
    }
    outcome
}

fn write_scratch(payload: &ExecutionPayload, scratch_dir: &Path) -> Result<NamedTempFile, String> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("script_{}_", payload.id.simple()))
        .suffix(".py")
        .tempfile_in(scratch_dir)
        .map_err(|err| format!("create scratch file: {err}"))?;
    file.write_all(payload.text.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|err| format!("write scratch file: {err}"))?;
    Ok(file)
}

async fn run_sandboxed(
    payload: &ExecutionPayload,
    script_path: &Path,
    sandbox: &SandboxConfig,
) -> ExecutionOutcome {
    let mut command = Command::new(sandbox.program.as_str());
    command
        .args(&sandbox.args)
        .arg(sandbox.interpreter.as_str())
        .arg(script_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a timeout can take down every descendant.
    #[cfg(unix)]
    command.process_group(0);

    let started_at = Instant::now();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            tracing::error!(
                payload_id = %payload.id,
                program = %sandbox.program,
                error = %err,
                "sandbox launch failed"
            );
            return ExecutionOutcome::LaunchFailed(format!("spawn {}: {err}", sandbox.program));
        }
    };
    let pid = child.id();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_process_group(pid);
        let _ = child.kill().await;
        return ExecutionOutcome::LaunchFailed("sandbox output pipes unavailable".to_string());
    };

    // Deadline covers both process exit and draining its pipes.
    let collected = tokio::time::timeout(sandbox.timeout, async {
        tokio::try_join!(
            read_limited(stdout, sandbox.stdout_limit_bytes, "stdout"),
            read_limited(stderr, sandbox.stderr_limit_bytes, "stderr"),
            wait_for_exit(&mut child),
        )
    })
    .await;

    let outcome = match collected {
        Ok(Ok((stdout, stderr, status))) => ExecutionOutcome::Completed {
            exit_code: status.code(),
            stdout,
            stderr,
        },
        Ok(Err(CaptureError::Limit(stream))) => ExecutionOutcome::OutputLimitExceeded(stream),
        Ok(Err(CaptureError::Io(reason))) => ExecutionOutcome::LaunchFailed(reason),
        Err(_) => ExecutionOutcome::TimedOut,
    };
    // A completed run has been reaped; its group id may already belong to
    // someone else.
    if outcome.interrupted() {
        kill_process_group(pid);
        let _ = child.kill().await;
    }
    let duration_ms = started_at.elapsed().as_millis() as u64;

    let exit_code = match &outcome {
        ExecutionOutcome::Completed { exit_code, .. } => *exit_code,
        _ => None,
    };
    tracing::info!(
        payload_id = %payload.id,
        outcome = outcome.as_str(),
        exit_code = ?exit_code,
        duration_ms,
        "sandbox finished"
    );
    outcome
}

async fn wait_for_exit(child: &mut tokio::process::Child) -> Result<ExitStatus, CaptureError> {
    child
        .wait()
        .await
        .map_err(|err| CaptureError::Io(format!("wait: {err}")))
}

async fn read_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit_bytes: u64,
    stream: &'static str,
) -> Result<Vec<u8>, CaptureError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader
            .read(&mut chunk)
            .await
            .map_err(|err| CaptureError::Io(format!("read {stream}: {err}")))?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() as u64 > limit_bytes {
            return Err(CaptureError::Limit(stream));
        }
    }
    Ok(buffer)
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // ESRCH just means the group is already gone.
    let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
