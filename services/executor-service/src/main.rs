mod app;
mod decoder;
mod error;
mod handlers;
mod models;
mod rules;
mod sandbox;
mod service;
mod state;
mod validator;
mod wrapper;

use sandrun_common::{bind_listener, env_list, env_or, init_tracing, shutdown_signal};

use crate::rules::RuleSet;
use crate::state::{AppState, SandboxConfig};

#[tokio::main]
async fn main() {
    let _guards = init_tracing("executor-service");

    let port = env_or("PORT", 8080u16);
    let rules = RuleSet::standard()
        .expect("built-in rule table")
        .with_allowed_modules(env_list("EXTRA_ALLOWED_MODULES"));
    let sandbox = SandboxConfig::from_env();

    tracing::info!(
        port,
        sandbox = %sandbox.program,
        interpreter = %sandbox.interpreter,
        timeout_secs = sandbox.timeout.as_secs(),
        scratch_dir = %sandbox.scratch_dir.display(),
        allowed_modules = rules.allowed_module_count(),
        dangerous_patterns = rules.pattern_count(),
        "executor service starting"
    );

    let app = app::build_router(AppState::new(rules, sandbox));
    let listener = bind_listener(port).await.expect("bind listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("serve");
}
