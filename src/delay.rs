//! Application-side request delay logs.
//!
//! Some experiments write a log next to each capture with one request delay
//! per line. The unit depends on the client that produced it, so the log
//! format is injected into the batch driver instead of being baked into the
//! trace analysis.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Unit of the values in a delay log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    /// Integer milliseconds.
    #[default]
    Millis,
    /// Fractional seconds, truncated to whole milliseconds.
    Seconds,
}

impl DelayUnit {
    /// Parse one log line into milliseconds. Lines that are not a value in
    /// this unit yield `None`.
    pub fn parse_line(self, line: &str) -> Option<u64> {
        let line = line.trim();
        match self {
            DelayUnit::Millis => line.parse::<u64>().ok(),
            DelayUnit::Seconds => {
                let secs = line.parse::<f64>().ok()?;
                if !secs.is_finite() || secs < 0.0 {
                    return None;
                }
                Some((secs * 1000.0) as u64)
            }
        }
    }

    /// Parse every value in a log, skipping lines that do not parse.
    pub fn parse_log(self, content: &str) -> Vec<u64> {
        content.lines().filter_map(|l| self.parse_line(l)).collect()
    }
}

impl FromStr for DelayUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ms" | "millis" | "milliseconds" => Ok(DelayUnit::Millis),
            "s" | "sec" | "seconds" => Ok(DelayUnit::Seconds),
            other => Err(Error::DelayLog(format!("unknown delay unit: {other}"))),
        }
    }
}

/// Supplies the per-request delays that belong to a trace.
pub trait DelaySource: Send + Sync {
    /// Delays in milliseconds, or `None` when the trace has no log.
    fn delays_for(&self, trace: &Path) -> Result<Option<Vec<u64>>>;

    /// Largest delay for a trace.
    fn max_delay_for(&self, trace: &Path) -> Result<Option<u64>> {
        Ok(self
            .delays_for(trace)?
            .and_then(|delays| delays.into_iter().max()))
    }
}

/// A log file with a fixed name in the same directory as the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingDelayLog {
    file_name: String,
    unit: DelayUnit,
}

impl SiblingDelayLog {
    pub fn new(file_name: impl Into<String>, unit: DelayUnit) -> Self {
        Self {
            file_name: file_name.into(),
            unit,
        }
    }

    /// Path of the log belonging to a trace.
    pub fn log_path(&self, trace: &Path) -> PathBuf {
        trace
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.file_name)
    }
}

impl DelaySource for SiblingDelayLog {
    fn delays_for(&self, trace: &Path) -> Result<Option<Vec<u64>>> {
        let path = self.log_path(trace);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(log = %path.display(), "no delay log");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::DelayLog(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(Some(self.unit.parse_log(&content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_millis() {
        assert_eq!(DelayUnit::Millis.parse_line("712"), Some(712));
        assert_eq!(DelayUnit::Millis.parse_line(" 15\n"), Some(15));
        assert_eq!(DelayUnit::Millis.parse_line("0.712"), None);
        assert_eq!(DelayUnit::Millis.parse_line("request done"), None);
    }

    #[test]
    fn test_parse_seconds_truncates() {
        assert_eq!(DelayUnit::Seconds.parse_line("0.7129"), Some(712));
        assert_eq!(DelayUnit::Seconds.parse_line("2"), Some(2000));
        assert_eq!(DelayUnit::Seconds.parse_line("-1.0"), None);
        assert_eq!(DelayUnit::Seconds.parse_line("nan"), None);
    }

    #[test]
    fn test_parse_log_skips_noise() {
        let log = "start\n120\n\n340\nbye\n95\n";
        assert_eq!(DelayUnit::Millis.parse_log(log), vec![120, 340, 95]);
    }

    #[test]
    fn test_unit_from_str() {
        assert_eq!("ms".parse::<DelayUnit>().unwrap(), DelayUnit::Millis);
        assert_eq!("Seconds".parse::<DelayUnit>().unwrap(), DelayUnit::Seconds);
        assert!("hours".parse::<DelayUnit>().is_err());
    }

    #[test]
    fn test_sibling_log() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("run_mptcp_client.pcap");
        let source = SiblingDelayLog::new("msg_client.log", DelayUnit::Seconds);

        assert_eq!(source.delays_for(&trace).unwrap(), None);
        assert_eq!(source.max_delay_for(&trace).unwrap(), None);

        std::fs::write(dir.path().join("msg_client.log"), "0.250\n0.7505\nx\n0.5\n").unwrap();
        assert_eq!(
            source.delays_for(&trace).unwrap(),
            Some(vec![250, 750, 500])
        );
        assert_eq!(source.max_delay_for(&trace).unwrap(), Some(750));
    }
}
