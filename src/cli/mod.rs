//! Command line interface for mptrace.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::delay::DelayUnit;

/// mptrace - two-path connection timelines from packet captures
#[derive(Parser, Debug)]
#[command(
    name = "mptrace",
    author,
    version,
    about = "Reconstruct two-path connection timelines from packet captures",
    long_about = r#"
mptrace reads pcap captures of a multipath connection and reports how the
secondary path was used:

  - total connection duration
  - share of payload bytes carried by the secondary path
  - share of the connection during which the secondary path carried data
  - how early in the connection the secondary path joined

EXAMPLES:
  mptrace analyze run_mptcp_client.pcap
  mptrace analyze results/ --jobs 8 --delay-log msg_client.log --delay-unit s
  mptrace inspect run_mptcp_client.pcap
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute path usage metrics for one or more traces
    Analyze(AnalyzeArgs),

    /// Show the reconstructed timeline of a single trace
    Inspect(InspectArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Analyze command arguments
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Capture files, or directories to search for captures
    #[arg(required = true)]
    pub traces: Vec<PathBuf>,

    /// Number of traces analysed concurrently
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Time limit per trace (e.g. 30s, 2m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<std::time::Duration>,

    /// Delay log file name, looked up next to each trace
    #[arg(long)]
    pub delay_log: Option<String>,

    /// Unit of the delay log values
    #[arg(long, default_value = "ms")]
    pub delay_unit: DelayUnitArg,

    /// File name suffix used when searching directories
    #[arg(long)]
    pub suffix: Option<String>,

    /// Exit with an error if any trace needs attention
    #[arg(long)]
    pub strict: bool,
}

/// Inspect command arguments
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Capture file
    pub trace: PathBuf,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Write the example configuration to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Delay log unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DelayUnitArg {
    /// Integer milliseconds
    Ms,
    /// Fractional seconds
    S,
}

impl From<DelayUnitArg> for DelayUnit {
    fn from(arg: DelayUnitArg) -> Self {
        match arg {
            DelayUnitArg::Ms => DelayUnit::Millis,
            DelayUnitArg::S => DelayUnit::Seconds,
        }
    }
}
