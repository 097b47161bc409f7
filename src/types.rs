//! Core types used throughout mptrace.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capture timestamp, measured from the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Create a timestamp from the time elapsed since the epoch.
    pub fn new(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    /// Build a timestamp from a pcap record's seconds and sub-second field.
    pub fn from_parts(secs: u32, fraction: u32, nanosecond_precision: bool) -> Self {
        let nanos = if nanosecond_precision {
            u64::from(fraction)
        } else {
            u64::from(fraction) * 1_000
        };
        Self::new(Duration::from_secs(u64::from(secs)) + Duration::from_nanos(nanos))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(Duration::from_secs_f64(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Signed number of seconds elapsed since `earlier`.
    ///
    /// Negative when `earlier` is actually later, which happens with
    /// reordered or clock-stepped captures.
    pub fn secs_since(&self, earlier: Timestamp) -> f64 {
        match self.0.checked_sub(earlier.0) {
            Some(d) => d.as_secs_f64(),
            None => -(earlier.0 - self.0).as_secs_f64(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0.as_secs(), self.0.subsec_nanos())
    }
}

/// Which of the two paths a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathRole {
    /// Path of the initiator's first SYN.
    Primary,
    /// Path that joined after the primary handshake completed.
    Secondary,
}

impl fmt::Display for PathRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRole::Primary => write!(f, "primary"),
            PathRole::Secondary => write!(f, "secondary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_precision() {
        let micro = Timestamp::from_parts(10, 250_000, false);
        let nano = Timestamp::from_parts(10, 250_000_000, true);
        assert_eq!(micro, nano);
        assert_eq!(micro.as_duration(), Duration::from_millis(10_250));
    }

    #[test]
    fn test_secs_since_signed() {
        let a = Timestamp::from_parts(100, 0, false);
        let b = Timestamp::from_parts(101, 500_000, false);
        assert!((b.secs_since(a) - 1.5).abs() < 1e-12);
        assert!((a.secs_since(b) + 1.5).abs() < 1e-12);
        assert_eq!(a.secs_since(a), 0.0);
    }

    #[test]
    fn test_display() {
        let ts = Timestamp::from_parts(7, 20, true);
        assert_eq!(ts.to_string(), "7.000000020");
        assert_eq!(PathRole::Secondary.to_string(), "secondary");
    }
}
