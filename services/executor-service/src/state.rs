use sandrun_common::{env_or, env_string};
use std::{env, path::PathBuf, sync::Arc, time::Duration};

use crate::rules::RuleSet;

#[derive(Clone)]
pub struct AppState {
    pub rules: Arc<RuleSet>,
    pub sandbox: Arc<SandboxConfig>,
}

impl AppState {
    pub fn new(rules: RuleSet, sandbox: SandboxConfig) -> Self {
        Self {
            rules: Arc::new(rules),
            sandbox: Arc::new(sandbox),
        }
    }
}

/// How the external sandbox is invoked:
/// `<program> <args...> <interpreter> <scratch script>`.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub program: String,
    pub args: Vec<String>,
    pub interpreter: String,
    pub timeout: Duration,
    pub scratch_dir: PathBuf,
    pub stdout_limit_bytes: u64,
    pub stderr_limit_bytes: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: "nsjail".to_string(),
            args: split_args("--config ./config.proto --"),
            interpreter: "/usr/local/bin/python3".to_string(),
            timeout: Duration::from_secs(5),
            scratch_dir: env::temp_dir(),
            stdout_limit_bytes: 1024 * 1024,
            stderr_limit_bytes: 64 * 1024,
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let args = env::var("SANDBOX_ARGS")
            .map(|value| split_args(&value))
            .unwrap_or(defaults.args);
        let scratch_dir = env::var_os("SCRATCH_DIR")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.scratch_dir);

        Self {
            program: env_string("SANDBOX_BIN", &defaults.program),
            args,
            interpreter: env_string("PYTHON_BIN", &defaults.interpreter),
            timeout: Duration::from_secs(env_or(
                "EXECUTION_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )),
            scratch_dir,
            stdout_limit_bytes: env_or("STDOUT_LIMIT_BYTES", defaults.stdout_limit_bytes),
            stderr_limit_bytes: env_or("STDERR_LIMIT_BYTES", defaults.stderr_limit_bytes),
        }
    }
}

fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}
