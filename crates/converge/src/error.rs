//! Error types for convergence runs
//!
//! Skips are not errors: a false guard or empty target produces no record
//! and no failure. Everything here aborts the run for the host.

use thiserror::Error;

/// Guard evaluation failure (malformed conditional)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    /// A comparison or truthiness predicate referenced a fact with no value
    #[error("fact '{0}' is not defined")]
    UndefinedFact(String),
}

/// Fatal error raised by a convergence run
///
/// A run is fail-fast: the first error aborts the remaining sequence for
/// the host. Already-applied changes are not rolled back; re-running the
/// plan is the recovery path.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Guard expression could not be evaluated
    #[error("guard on '{assertion}' failed to evaluate: {source}")]
    Guard {
        assertion: String,
        #[source]
        source: GuardError,
    },

    /// Mutation (or state probe) failed at the OS level
    #[error("failed to converge '{assertion}': {source}")]
    Mutation {
        assertion: String,
        #[source]
        source: anyhow::Error,
    },

    /// A notified handler failed after the assertion sweep
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    /// An assertion notified a handler that the plan does not declare
    #[error("assertion '{assertion}' notifies unknown handler '{handler}'")]
    UnknownHandler { assertion: String, handler: String },
}

impl ConvergeError {
    /// Identity of the assertion or handler that failed
    pub fn subject(&self) -> &str {
        match self {
            Self::Guard { assertion, .. } | Self::Mutation { assertion, .. } => assertion,
            Self::Handler { handler, .. } => handler,
            Self::UnknownHandler { handler, .. } => handler,
        }
    }
}
