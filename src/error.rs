//! Error types for mptrace.

use std::io;

use thiserror::Error;

/// Result type alias for mptrace operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mptrace.
#[derive(Error, Debug)]
pub enum Error {
    // Capture decoding errors
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    // Analysis errors
    #[error("incomplete handshake: no SYN/SYN-ACK pair observed")]
    IncompleteHandshake,

    #[error("non-positive connection duration: {seconds}s")]
    NonPositiveDuration { seconds: f64 },

    #[error("analysis cancelled")]
    Cancelled,

    // Delay log errors
    #[error("delay log error: {0}")]
    DelayLog(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Capture container and header decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("truncated record {record}: {layer} needs {needed} bytes, {available} captured")]
    Truncated {
        record: u64,
        layer: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("malformed record {record}: {reason}")]
    Malformed { record: u64, reason: String },

    #[error("truncated capture: file ends inside record {record}")]
    UnexpectedEof { record: u64 },

    #[error("invalid capture header: {0}")]
    InvalidHeader(String),

    #[error("unsupported link type: {0}")]
    UnsupportedLinkType(i32),
}

impl CaptureError {
    /// Check if this error means the capture content is cut short or corrupt,
    /// as opposed to the file not being a usable capture at all.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            CaptureError::Truncated { .. }
                | CaptureError::Malformed { .. }
                | CaptureError::UnexpectedEof { .. }
        )
    }

    /// Attach the record index to a decode error raised without one.
    pub(crate) fn at_record(self, index: u64) -> Self {
        match self {
            CaptureError::Truncated {
                layer,
                needed,
                available,
                ..
            } => CaptureError::Truncated {
                record: index,
                layer,
                needed,
                available,
            },
            CaptureError::Malformed { reason, .. } => CaptureError::Malformed {
                record: index,
                reason,
            },
            other => other,
        }
    }
}

impl Error {
    /// Check if error indicates a truncated or malformed capture.
    pub fn is_truncated_capture(&self) -> bool {
        matches!(self, Error::Capture(e) if e.is_truncation())
    }

    /// Check if error only means the trace has nothing to report.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Error::IncompleteHandshake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_classification() {
        let truncated = Error::from(CaptureError::Truncated {
            record: 3,
            layer: "tcp",
            needed: 20,
            available: 7,
        });
        assert!(truncated.is_truncated_capture());
        assert!(!truncated.is_no_data());

        let eof = Error::from(CaptureError::UnexpectedEof { record: 9 });
        assert!(eof.is_truncated_capture());

        let link = Error::from(CaptureError::UnsupportedLinkType(147));
        assert!(!link.is_truncated_capture());

        assert!(Error::IncompleteHandshake.is_no_data());
    }

    #[test]
    fn test_at_record_fills_index() {
        let err = CaptureError::Malformed {
            record: 0,
            reason: "bad length".into(),
        }
        .at_record(42);
        assert_eq!(
            err,
            CaptureError::Malformed {
                record: 42,
                reason: "bad length".into()
            }
        );
        assert_eq!(err.to_string(), "malformed record 42: bad length");
    }
}
