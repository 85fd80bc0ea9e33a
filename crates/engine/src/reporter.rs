//! Error reporting hook.
//!
//! Run failures never propagate to the dispatcher; they are recorded on the
//! run and handed to an `ErrorReporter` so operators see them.

/// Forwards errors to an operator-facing sink. Must never fail or panic.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &anyhow::Error);
}

/// Emits reported errors as structured `error` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &anyhow::Error) {
        tracing::error!(
            target: "curbside::error_report",
            error = %format!("{:#}", error),
            detail = ?error,
            "Error reported"
        );
    }
}
