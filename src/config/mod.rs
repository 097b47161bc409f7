//! Configuration management for mptrace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delay::{DelayUnit, SiblingDelayLog};
use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Batch analysis configuration.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Side-channel delay log, if the experiments produce one.
    #[serde(default)]
    pub delay_log: Option<DelayLogConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.jobs == 0 {
            return Err(Error::InvalidConfig("analysis.jobs must be at least 1".into()));
        }

        if self.analysis.trace_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "analysis.trace_timeout must be positive".into(),
            ));
        }

        if self.analysis.trace_suffix.is_empty() {
            return Err(Error::InvalidConfig(
                "analysis.trace_suffix must not be empty".into(),
            ));
        }

        if let Some(ref log) = self.delay_log {
            if log.file_name.is_empty() || log.file_name.contains(['/', '\\']) {
                return Err(Error::InvalidConfig(format!(
                    "delay_log.file_name must be a bare file name, got {:?}",
                    log.file_name
                )));
            }
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("org", "mptrace", "mptrace").map_or_else(
            || PathBuf::from("mptrace.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            analysis: AnalysisConfig {
                jobs: 8,
                trace_timeout: Some(Duration::from_secs(120)),
                ..Default::default()
            },
            delay_log: Some(DelayLogConfig {
                file_name: "msg_client.log".into(),
                unit: DelayUnit::Seconds,
            }),
            logging: LoggingConfig {
                level: "info".into(),
                ..Default::default()
            },
        }
    }
}

/// Batch analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Number of traces analysed concurrently.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Time limit for one whole per-trace pass.
    #[serde(default, with = "humantime_serde")]
    pub trace_timeout: Option<Duration>,

    /// File name suffix of traces when a directory is given.
    #[serde(default = "default_trace_suffix")]
    pub trace_suffix: String,
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get())
}
fn default_trace_suffix() -> String {
    "_client.pcap".into()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            trace_timeout: None,
            trace_suffix: default_trace_suffix(),
        }
    }
}

/// Side-channel delay log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayLogConfig {
    /// Log file name, looked up next to each trace.
    pub file_name: String,

    /// Unit of the logged values.
    #[serde(default)]
    pub unit: DelayUnit,
}

impl DelayLogConfig {
    /// Build the delay source this configuration describes.
    pub fn source(&self) -> SiblingDelayLog {
        SiblingDelayLog::new(self.file_name.clone(), self.unit)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "warn".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
///
/// Logs go to stderr so that JSON results on stdout stay machine-readable.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
