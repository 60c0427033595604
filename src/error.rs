//! Error taxonomy for the engine.
//!
//! Every failure path the engine can take surfaces as one of these
//! variants. Driver-classified failures that don't fit a more specific
//! variant are wrapped rather than discarded, so callers and log lines
//! never see an opaque, unclassified error.

use std::fmt;

use thiserror::Error;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The query declares a parameter name the caller didn't supply.
    #[error("parameter not found: \"{0}\"")]
    ParameterNotFound(String),

    /// A built-in result handler couldn't find binding metadata on `Model`.
    #[error("no mapping attributes found for \"{0}\"")]
    NoMappingAttributesFound(&'static str),

    /// A mock result's runtime type doesn't match the call's declared type.
    #[error("mock result for \"{query}\" doesn't match expected type \"{expected}\"")]
    MockTypeMismatch {
        query: String,
        expected: &'static str,
    },

    /// The breaker is open and its test interval hasn't elapsed.
    #[error("circuit open for \"{0}\"")]
    CircuitOpen(String),

    /// Driver-classified, retried internally; surfaced only once retries
    /// are exhausted.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Driver-classified as fatal for this command only; breaker
    /// untouched.
    #[error("fatal command error: {0}")]
    FatalForCommand(Box<dyn std::error::Error + Send + Sync>),

    /// Driver-classified as fatal; counts toward the breaker.
    #[error("fatal error: {0}")]
    FatalAndFailure(Box<dyn std::error::Error + Send + Sync>),

    /// A `ShardParameterValues` entry names a shard absent from the set.
    #[error("unknown shard: {0}")]
    UnknownShard(String),

    /// Caller-initiated cancellation.
    #[error("cancelled")]
    Cancelled,

    /// No shard in the shard set and no default shard configured.
    #[error("no shard found: {0}")]
    NoShard(String),

    /// A batch step failed; `step` is the 0-based offending index.
    #[error("batch step {step} failed: {source}")]
    BatchStep {
        step: usize,
        #[source]
        source: Box<Error>,
    },

    /// Opening a connection failed and could not be classified as
    /// retryable.
    #[error("connection open failed: {0}")]
    ConnectionFailed(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// True if this error kind should count toward a connection manager's
    /// breaker (maps to §7's `FatalAndFailure`).
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(self, Error::FatalAndFailure(_))
    }
}

/// The three verdicts a driver can classify a failure as, plus
/// cancellation, per spec.md §4.1 and §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Retry within the current attempt budget.
    Retryable,
    /// Surface immediately; breaker untouched.
    FatalForCommand,
    /// Surface immediately; counts toward the breaker.
    FatalAndFailure,
    /// The operation was cancelled.
    Cancelled,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Retryable => "retryable",
            Verdict::FatalForCommand => "fatal-for-command",
            Verdict::FatalAndFailure => "fatal-and-failure",
            Verdict::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_counts_toward_breaker() {
        let retryable = Error::CircuitOpen("db".into());
        assert!(!retryable.counts_toward_breaker());

        let fatal_and_failure = Error::FatalAndFailure(Box::new(std::io::Error::other("x")));
        assert!(fatal_and_failure.counts_toward_breaker());

        let fatal_for_command = Error::FatalForCommand(Box::new(std::io::Error::other("x")));
        assert!(!fatal_for_command.counts_toward_breaker());
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Retryable.to_string(), "retryable");
        assert_eq!(Verdict::Cancelled.to_string(), "cancelled");
    }
}
