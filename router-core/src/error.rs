//! Router-wide error taxonomy. One `thiserror` enum per concern, kept
//! separate rather than folded into one catch-all; `RouterError` is the only
//! kind ever surfaced to `SmartRouter::handle_turn` callers (everything else
//! is absorbed or logged inside the component that raised it).

use thiserror::Error;

/// Errors raised by an [`crate::ports::EmbeddingProvider`].
#[derive(Error, Debug, Clone)]
#[error("embedding provider error: {0}")]
pub struct EmbeddingProviderError(pub String);

/// Errors raised when opening a binding via [`crate::ports::Transport`].
#[derive(Error, Debug, Clone)]
#[error("transport open error for {handle}: {message}")]
pub struct TransportOpenError {
    pub handle: String,
    pub message: String,
}

/// Errors raised by an [`crate::ports::AgentExecutor`].
#[derive(Error, Debug, Clone)]
pub enum AgentExecutorError {
    #[error("agent executor step budget exceeded ({max_steps} steps)")]
    StepBudgetExceeded { max_steps: usize },
    #[error("agent executor deadline exceeded")]
    DeadlineExceeded,
    #[error("agent executor network-transient error: {0}")]
    Transient(String),
    #[error("agent executor error: {0}")]
    Other(String),
}

/// Failure appending to the usage metrics file.
#[derive(Error, Debug, Clone)]
#[error("metrics write error: {0}")]
pub struct MetricsWriteError(pub String);

/// The single error kind ever returned from [`crate::router::SmartRouter::handle_turn`].
///
/// Carries a `recoverable` flag: step-budget, deadline, and network-transient
/// failures are recoverable (the caller may resubmit immediately); anything
/// else surfaced this way is treated as non-recoverable.
#[derive(Error, Debug, Clone)]
#[error("turn failed: {source}")]
pub struct RouterError {
    #[source]
    pub source: AgentExecutorError,
    pub recoverable: bool,
}

impl RouterError {
    pub fn from_agent_error(source: AgentExecutorError) -> Self {
        let recoverable = matches!(
            source,
            AgentExecutorError::StepBudgetExceeded { .. }
                | AgentExecutorError::DeadlineExceeded
                | AgentExecutorError::Transient(_)
        );
        Self { source, recoverable }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_budget_and_deadline_and_transient_are_recoverable() {
        assert!(RouterError::from_agent_error(AgentExecutorError::StepBudgetExceeded { max_steps: 5 })
            .is_recoverable());
        assert!(RouterError::from_agent_error(AgentExecutorError::DeadlineExceeded).is_recoverable());
        assert!(RouterError::from_agent_error(AgentExecutorError::Transient("connection reset".into()))
            .is_recoverable());
    }

    #[test]
    fn other_is_not_recoverable() {
        assert!(!RouterError::from_agent_error(AgentExecutorError::Other("boom".into())).is_recoverable());
    }
}
