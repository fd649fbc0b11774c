use thiserror::Error;

/// Errors surfaced to the caller of [`trace`](crate::trace).
///
/// Only malformed input and total resource exhaustion are hard failures.
/// Per-tile failures are skipped and reported in the run summary; output
/// size overflow is handled by the degradation ladder in the SVG emitter.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("invalid pixel buffer: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "memory budget of {budget_mb} MB cannot be satisfied even at minimum tile size after quality degradation"
    )]
    ResourceExhaustion { budget_mb: usize },

    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TraceError>;
