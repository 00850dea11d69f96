//! Logging setup and the run-scoped logger handed to entrypoints.

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Returns `false` if a global subscriber was already installed, so it is
/// safe to call more than once.
pub fn init() -> bool {
    init_with_default("info")
}

/// Like [`init`] with a different fallback filter.
pub fn init_with_default(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}

/// Leveled logging scoped to one run.
///
/// Every event is emitted inside the run's `workflow_run` span and carries
/// the run id.
#[derive(Debug, Clone)]
pub struct RunLogger {
    span: Span,
    run_id: String,
}

impl RunLogger {
    pub(crate) fn new(workflow_id: &str, run_id: &str, attempt: u32) -> Self {
        let span = tracing::info_span!(
            "workflow_run",
            workflow_id = %workflow_id,
            run_id = %run_id,
            attempt = attempt
        );
        Self {
            span,
            run_id: run_id.to_string(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn debug(&self, message: &str) {
        self.span
            .in_scope(|| tracing::debug!(run_id = %self.run_id, "{}", message));
    }

    pub fn info(&self, message: &str) {
        self.span
            .in_scope(|| tracing::info!(run_id = %self.run_id, "{}", message));
    }

    pub fn warn(&self, message: &str) {
        self.span
            .in_scope(|| tracing::warn!(run_id = %self.run_id, "{}", message));
    }

    pub fn error(&self, message: &str) {
        self.span
            .in_scope(|| tracing::error!(run_id = %self.run_id, "{}", message));
    }
}
