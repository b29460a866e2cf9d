//! Step budget policies.
//!
//! The loop asks the policy, before every model call, whether that call is
//! the last one it may make. The loop itself never decides.

/// Decides whether the upcoming model call is the final permitted one.
pub trait StepBudget: Send + Sync {
    /// `step` is the 1-based number of the model call about to be made.
    fn is_last_step(&self, step: u32) -> bool;
}

/// Allow at most `n` model calls per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxSteps(pub u32);

impl StepBudget for MaxSteps {
    fn is_last_step(&self, step: u32) -> bool {
        step >= self.0
    }
}

impl<F> StepBudget for F
where
    F: Fn(u32) -> bool + Send + Sync,
{
    fn is_last_step(&self, step: u32) -> bool {
        self(step)
    }
}
