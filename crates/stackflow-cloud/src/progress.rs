//! Operator-facing progress reporting
//!
//! Orchestrators announce each step through a [`StepObserver`]. The CLI
//! renders them on the terminal; tests usually pass [`NoopObserver`].

/// Receives step transitions from the orchestrators
pub trait StepObserver: Send + Sync {
    fn step_started(&self, step: &str, description: &str);

    fn step_succeeded(&self, step: &str, message: &str);

    fn step_skipped(&self, step: &str, reason: &str);

    fn step_failed(&self, step: &str, error: &str);

    /// Free-form progress inside a step
    fn detail(&self, _message: &str) {}

    /// A best-effort action did not work out
    fn warning(&self, _message: &str) {}
}

/// Observer that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    fn step_started(&self, _step: &str, _description: &str) {}

    fn step_succeeded(&self, _step: &str, _message: &str) {}

    fn step_skipped(&self, _step: &str, _reason: &str) {}

    fn step_failed(&self, _step: &str, _error: &str) {}
}
