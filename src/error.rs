//! Analysis error types.

use thiserror::Error;

/// Errors reported by the analyses.
///
/// The analyses are total on well-formed IR; the only failure mode is a
/// malformed-IR precondition (an unsupported opcode, predicate, or
/// instruction variant reaching a dispatch that assumed it was filtered
/// out). These indicate a bug in the IR producer, not bad user input, and
/// are surfaced to the caller instead of aborting the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// An instruction that the dispatch filter should have excluded reached
    /// the dispatch anyway.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolated(String),
}

impl AnalysisError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        AnalysisError::InternalInvariantViolated(msg.into())
    }
}
