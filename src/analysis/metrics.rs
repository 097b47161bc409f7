//! Path usage metrics derived from a finished timeline.

use serde::Serialize;

use super::classifier::ConnectionTimeline;
use crate::error::{Error, Result};

/// How the two paths were used over one connection.
///
/// Only constructed by [`ConnectionMetrics::compute`], so every value
/// satisfies the range guarantees documented on the accessors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    total_duration_seconds: f64,
    secondary_byte_percent: f64,
    secondary_active_time_percent: f64,
    secondary_join_latency_percent: f64,
}

impl ConnectionMetrics {
    /// Derive metrics from a finished timeline.
    pub fn compute(timeline: &ConnectionTimeline) -> Result<Self> {
        let (Some(start), Some(_)) = (timeline.handshake_start, timeline.handshake_ack_time)
        else {
            return Err(Error::IncompleteHandshake);
        };
        let end = timeline.end_time().ok_or(Error::IncompleteHandshake)?;

        let total = end.secs_since(start);
        if total <= 0.0 || !total.is_finite() {
            return Err(Error::NonPositiveDuration { seconds: total });
        }

        let moved = timeline.secondary_bytes + timeline.primary_bytes;
        let byte_percent = if moved > 0 {
            100.0 * timeline.secondary_bytes as f64 / moved as f64
        } else {
            0.0
        };

        let active_percent = match (
            timeline.first_secondary_data_time,
            timeline.last_secondary_data_time,
        ) {
            (Some(first), Some(last)) => 100.0 * last.secs_since(first) / total,
            _ => 0.0,
        };

        // earlier join => larger value
        let join_percent = match timeline.secondary_join_time {
            Some(join) => 100.0 - 100.0 * join.secs_since(start) / total,
            None => 0.0,
        };

        Ok(Self {
            total_duration_seconds: total,
            secondary_byte_percent: clamp_percent(byte_percent),
            secondary_active_time_percent: clamp_percent(active_percent),
            secondary_join_latency_percent: clamp_percent(join_percent),
        })
    }

    /// Seconds from the first SYN to the end of the connection. Always > 0.
    pub fn total_duration_seconds(&self) -> f64 {
        self.total_duration_seconds
    }

    /// Share of payload bytes carried by the secondary path, 0–100.
    pub fn secondary_byte_percent(&self) -> f64 {
        self.secondary_byte_percent
    }

    /// Share of the connection between the first and last secondary-path
    /// payload, 0–100.
    pub fn secondary_active_time_percent(&self) -> f64 {
        self.secondary_active_time_percent
    }

    /// Share of the connection that ran after the secondary path joined,
    /// 0–100. Zero when no join was observed.
    pub fn secondary_join_latency_percent(&self) -> f64 {
        self.secondary_join_latency_percent
    }

    /// Check if the secondary path carried anything at all.
    pub fn used_secondary(&self) -> bool {
        self.secondary_byte_percent > 0.0
    }

    /// Get a brief summary.
    pub fn summary(&self) -> String {
        format!(
            "duration={:.3}s secondary_bytes={:.1}% secondary_active={:.1}% secondary_join={:.1}%",
            self.total_duration_seconds,
            self.secondary_byte_percent,
            self.secondary_active_time_percent,
            self.secondary_join_latency_percent
        )
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn at(t: f64) -> Option<Timestamp> {
        Some(Timestamp::from_secs_f64(50.0 + t))
    }

    fn handshake(end: f64) -> ConnectionTimeline {
        ConnectionTimeline {
            handshake_start: at(0.0),
            handshake_ack_time: at(0.02),
            fin_time: at(end),
            last_seen: at(end),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_handshake() {
        let mut tl = handshake(1.0);
        tl.handshake_ack_time = None;
        assert!(matches!(
            ConnectionMetrics::compute(&tl),
            Err(Error::IncompleteHandshake)
        ));

        let tl = ConnectionTimeline::default();
        assert!(matches!(
            ConnectionMetrics::compute(&tl),
            Err(Error::IncompleteHandshake)
        ));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut tl = handshake(0.0);
        tl.handshake_ack_time = at(0.0);
        assert!(matches!(
            ConnectionMetrics::compute(&tl),
            Err(Error::NonPositiveDuration { .. })
        ));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut tl = handshake(1.0);
        tl.fin_time = Some(Timestamp::from_secs_f64(49.0));
        match ConnectionMetrics::compute(&tl) {
            Err(Error::NonPositiveDuration { seconds }) => assert!((seconds + 1.0).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_secondary_is_all_zero() {
        let mut tl = handshake(2.0);
        tl.primary_bytes = 4096;
        let m = ConnectionMetrics::compute(&tl).unwrap();
        assert!((m.total_duration_seconds() - 2.0).abs() < 1e-9);
        assert_eq!(m.secondary_byte_percent(), 0.0);
        assert_eq!(m.secondary_active_time_percent(), 0.0);
        assert_eq!(m.secondary_join_latency_percent(), 0.0);
        assert!(!m.used_secondary());
    }

    #[test]
    fn test_secondary_metrics() {
        let mut tl = handshake(1.0);
        tl.primary_bytes = 1000;
        tl.secondary_bytes = 500;
        tl.secondary_join_time = at(0.5);
        tl.first_secondary_data_time = at(0.6);
        tl.last_secondary_data_time = at(0.9);

        let m = ConnectionMetrics::compute(&tl).unwrap();
        assert!((m.secondary_byte_percent() - 100.0 / 3.0).abs() < 1e-6);
        assert!((m.secondary_active_time_percent() - 30.0).abs() < 1e-6);
        assert!((m.secondary_join_latency_percent() - 50.0).abs() < 1e-6);
        assert!(m.used_secondary());
    }

    #[test]
    fn test_percentages_clamped() {
        // secondary data after the FIN-based end time
        let mut tl = handshake(1.0);
        tl.secondary_join_time = at(-0.5);
        tl.first_secondary_data_time = at(0.1);
        tl.last_secondary_data_time = at(3.0);
        tl.secondary_bytes = 10;

        let m = ConnectionMetrics::compute(&tl).unwrap();
        assert_eq!(m.secondary_active_time_percent(), 100.0);
        assert_eq!(m.secondary_join_latency_percent(), 100.0);
        assert_eq!(m.secondary_byte_percent(), 100.0);
    }

    #[test]
    fn test_clamp_percent_nan() {
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(100.5), 100.0);
    }
}
