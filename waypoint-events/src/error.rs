use std::fmt;

/// Failure surfaced by a single subscriber invocation.
///
/// Never propagated to an HTTP response — event handler failures are logged
/// and, depending on the subscription's retry policy, retried; they do not
/// affect sibling subscribers or the request that triggered the emission.
#[derive(Debug)]
pub enum EventHandlerError {
    /// The handler itself returned an error.
    Failed(String),
    /// The handler did not complete within its subscription's timeout.
    TimedOut,
}

impl fmt::Display for EventHandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventHandlerError::Failed(msg) => write!(f, "handler failed: {msg}"),
            EventHandlerError::TimedOut => write!(f, "handler timed out"),
        }
    }
}

impl std::error::Error for EventHandlerError {}

/// Failure surfaced by a pipeline stage (filter, transformer, or middleware).
#[derive(Debug)]
pub enum PipelineError {
    /// A filter rejected the event; not itself an error condition for the
    /// emitter but modeled distinctly from `Aborted` so pipeline middleware
    /// can tell "filtered out" apart from "failed".
    Filtered,
    /// Pipeline middleware declined to call `next`.
    Aborted,
    /// A transformer or middleware stage returned an error.
    Failed(String),
    /// The configured retry budget for this pipeline was exhausted.
    RetryBudgetExhausted,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Filtered => write!(f, "event rejected by filter"),
            PipelineError::Aborted => write!(f, "pipeline middleware aborted the event"),
            PipelineError::Failed(msg) => write!(f, "pipeline stage failed: {msg}"),
            PipelineError::RetryBudgetExhausted => {
                write!(f, "pipeline retry budget exhausted")
            }
        }
    }
}

impl std::error::Error for PipelineError {}
