use crate::BreakpointId;
use thiserror::Error;

/// Failures that concern a single breakpoint.
///
/// These never abort a batch: they are rendered into the per-entry result as
/// `verified: false` plus the error text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BreakpointError {
    #[error("{0}")]
    UnresolvableLocation(String),
    #[error("{0}")]
    BackendRejected(String),
    #[error("no breakpoint number {0}")]
    StaleIdentifier(BreakpointId),
    #[error("invalid hit condition {0:?}")]
    InvalidHitCondition(String),
    #[error("invalid instruction reference {0:?}")]
    InvalidInstructionReference(String),
    #[error("log messages are not supported, the breakpoint would stop")]
    LogMessageUnsupported,
}

impl BreakpointError {
    /// Returns true when `error` reports a breakpoint the backend no longer has.
    pub fn is_stale(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<BreakpointError>(),
            Some(BreakpointError::StaleIdentifier(_))
        )
    }
}
