//! Typed result of analysing one trace.

use std::fmt;

use serde::Serialize;

use super::metrics::ConnectionMetrics;
use crate::error::{Error, Result};

/// Result of one trace analysis, as handed to the batch driver.
///
/// Whether to skip, log or abort on a given kind is the driver's decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceOutcome {
    /// A usable connection was found.
    Metrics(ConnectionMetrics),
    /// No SYN/SYN-ACK pair. Expected for empty or unrelated captures.
    NoUsableConnection,
    /// A record was cut short or corrupt; no partial metrics are kept.
    TruncatedCapture { detail: String },
    /// End of connection not after its start. A data-quality problem.
    NonPositiveDuration { seconds: f64 },
    /// The file could not be opened, read, or recognised as a capture.
    IoFailure { detail: String },
    /// The per-trace time limit expired before analysis finished.
    TimedOut,
}

/// Outcome discriminant, for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Metrics,
    NoUsableConnection,
    TruncatedCapture,
    NonPositiveDuration,
    IoFailure,
    TimedOut,
}

impl TraceOutcome {
    /// Get the outcome discriminant.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            TraceOutcome::Metrics(_) => OutcomeKind::Metrics,
            TraceOutcome::NoUsableConnection => OutcomeKind::NoUsableConnection,
            TraceOutcome::TruncatedCapture { .. } => OutcomeKind::TruncatedCapture,
            TraceOutcome::NonPositiveDuration { .. } => OutcomeKind::NonPositiveDuration,
            TraceOutcome::IoFailure { .. } => OutcomeKind::IoFailure,
            TraceOutcome::TimedOut => OutcomeKind::TimedOut,
        }
    }

    /// Get the metrics, if a usable connection was found.
    pub fn metrics(&self) -> Option<&ConnectionMetrics> {
        match self {
            TraceOutcome::Metrics(m) => Some(m),
            _ => None,
        }
    }

    /// Check if the outcome should be surfaced to the operator rather than
    /// quietly skipped.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            TraceOutcome::NonPositiveDuration { .. }
                | TraceOutcome::IoFailure { .. }
                | TraceOutcome::TimedOut
        )
    }
}

impl From<Result<ConnectionMetrics>> for TraceOutcome {
    fn from(result: Result<ConnectionMetrics>) -> Self {
        match result {
            Ok(metrics) => TraceOutcome::Metrics(metrics),
            Err(e) => e.into(),
        }
    }
}

impl From<Error> for TraceOutcome {
    fn from(err: Error) -> Self {
        match err {
            Error::IncompleteHandshake => TraceOutcome::NoUsableConnection,
            Error::NonPositiveDuration { seconds } => TraceOutcome::NonPositiveDuration { seconds },
            // only the batch driver cancels, and only when a trace runs out of time
            Error::Cancelled => TraceOutcome::TimedOut,
            Error::Capture(e) if e.is_truncation() => TraceOutcome::TruncatedCapture {
                detail: e.to_string(),
            },
            other => TraceOutcome::IoFailure {
                detail: other.to_string(),
            },
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeKind::Metrics => "metrics",
            OutcomeKind::NoUsableConnection => "no usable connection",
            OutcomeKind::TruncatedCapture => "truncated capture",
            OutcomeKind::NonPositiveDuration => "non-positive duration",
            OutcomeKind::IoFailure => "io failure",
            OutcomeKind::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}
