//! mptrace CLI - two-path connection timelines from packet captures.

use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use colored::Colorize;
use serde_json::json;

use mptrace::analysis::{inspect_file, ConnectionMetrics, Inspection, TraceOutcome};
use mptrace::batch::{discover_traces, BatchAnalyzer, BatchSummary, TraceReport};
use mptrace::cli::*;
use mptrace::config::{init_logging, Config, DelayLogConfig, LoggingConfig};
use mptrace::error::{Error, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config if specified
    let config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    // Initialize logging; the flag wins over the config file
    let log_config = LoggingConfig {
        level: cli
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        color: !cli.no_color && config.logging.color,
        ..config.logging.clone()
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Analyze(args) => run_analyze(args, config, cli.format).await,
        Commands::Inspect(args) => run_inspect(args, cli.format),
        Commands::Config(args) => run_config(args),
    }
}

/// Analyze traces and print one line per trace.
async fn run_analyze(args: AnalyzeArgs, mut config: Config, format: OutputFormat) -> Result<()> {
    if let Some(jobs) = args.jobs {
        config.analysis.jobs = jobs;
    }
    if args.timeout.is_some() {
        config.analysis.trace_timeout = args.timeout;
    }
    if let Some(suffix) = args.suffix {
        config.analysis.trace_suffix = suffix;
    }
    if let Some(file_name) = args.delay_log {
        config.delay_log = Some(DelayLogConfig {
            file_name,
            unit: args.delay_unit.into(),
        });
    }
    config.validate()?;

    let traces = discover_traces(&args.traces, &config.analysis.trace_suffix)?;
    if traces.is_empty() {
        return Err(Error::Config(format!(
            "no traces matching *{} found",
            config.analysis.trace_suffix
        )));
    }

    let mut analyzer = BatchAnalyzer::from_config(&config.analysis);
    if let Some(ref log) = config.delay_log {
        analyzer = analyzer.with_delays(Arc::new(log.source()));
    }

    let reports = analyzer.run(traces).await?;
    let summary = BatchSummary::from_reports(&reports);

    match format {
        OutputFormat::Json => {
            let out = json!({ "reports": reports, "summary": summary });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).map_err(anyhow::Error::from)?
            );
        }
        OutputFormat::Text => {
            for report in &reports {
                print_report(report);
            }
            println!();
            print_summary(&summary);
        }
    }

    let flagged = reports
        .iter()
        .filter(|r| r.outcome.needs_attention())
        .count();
    if args.strict && flagged > 0 {
        return Err(anyhow!("{flagged} trace(s) need attention").into());
    }

    Ok(())
}

fn print_report(report: &TraceReport) {
    let name = report.trace.display().to_string();
    match &report.outcome {
        TraceOutcome::Metrics(m) => {
            let delay = report
                .max_delay_ms
                .map(|d| format!("  max_delay={d}ms"))
                .unwrap_or_default();
            println!("{} {}", "✓".green(), name.bright_white());
            println!("    {}{}", format_metrics(m), delay);
        }
        TraceOutcome::NoUsableConnection => {
            println!("{} {} {}", "○".dimmed(), name, "no usable connection".dimmed());
        }
        TraceOutcome::TruncatedCapture { detail } => {
            println!("{} {} {}", "⚠".yellow(), name, detail.yellow());
        }
        TraceOutcome::NonPositiveDuration { seconds } => {
            println!(
                "{} {} {}",
                "✗".red(),
                name,
                format!("non-positive duration ({seconds:.6}s)").red()
            );
        }
        TraceOutcome::IoFailure { detail } => {
            println!("{} {} {}", "✗".red(), name, detail.red());
        }
        TraceOutcome::TimedOut => {
            println!("{} {} {}", "✗".red(), name, "timed out".red());
        }
    }
}

fn format_metrics(m: &ConnectionMetrics) -> String {
    format!(
        "duration {:>9.3}s  secondary bytes {:>5.1}%  active {:>5.1}%  joined {:>5.1}%",
        m.total_duration_seconds(),
        m.secondary_byte_percent(),
        m.secondary_active_time_percent(),
        m.secondary_join_latency_percent()
    )
}

fn print_summary(summary: &BatchSummary) {
    println!("{}", "Summary".bright_white().bold());
    println!("{}", "─".repeat(40));
    println!("  {:<24} {}", "traces", summary.total);
    for (kind, count) in &summary.by_kind {
        println!("  {:<24} {}", kind.to_string(), count);
    }
}

/// Print the reconstructed timeline of one trace.
fn run_inspect(args: InspectArgs, format: OutputFormat) -> Result<()> {
    let inspection = inspect_file(&args.trace)?;
    let outcome = TraceOutcome::from(ConnectionMetrics::compute(&inspection.timeline));

    match format {
        OutputFormat::Json => {
            let out = json!({
                "trace": args.trace,
                "inspection": inspection,
                "outcome": outcome,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).map_err(anyhow::Error::from)?
            );
        }
        OutputFormat::Text => print_inspection(&inspection, &outcome),
    }

    Ok(())
}

fn print_inspection(inspection: &Inspection, outcome: &TraceOutcome) {
    println!("{}", "Events".bright_white().bold());
    println!("{}", "─".repeat(60));
    if inspection.events.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for event in &inspection.events {
        println!(
            "  {:<18} {}  {} → {}",
            format!("{:?}", event.kind).cyan(),
            event.timestamp,
            event.src,
            event.dst
        );
    }
    println!();

    let timeline = &inspection.timeline;
    println!("{}", "Paths".bright_white().bold());
    println!("{}", "─".repeat(60));
    let addr = |a: Option<std::net::IpAddr>| a.map_or_else(|| "-".to_string(), |a| a.to_string());
    println!(
        "  primary   {:<40} {} bytes",
        addr(timeline.primary_address),
        timeline.primary_bytes
    );
    println!(
        "  secondary {:<40} {} bytes",
        addr(timeline.secondary_address),
        timeline.secondary_bytes
    );
    println!(
        "  {} segments, {} other records skipped",
        inspection.packets, inspection.skipped
    );
    println!();

    match outcome {
        TraceOutcome::Metrics(m) => println!("{} {}", "✓".green(), format_metrics(m)),
        other => println!("{} {}", "○".yellow(), other.kind()),
    }
}

/// Show example configuration
fn run_config(args: ConfigArgs) -> Result<()> {
    let example = Config::example();
    match args.output {
        Some(path) => {
            example.save(&path)?;
            println!("{} Wrote example configuration to {}", "✓".green(), path.display());
        }
        None => {
            let content = toml::to_string_pretty(&example)
                .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
            println!("{content}");
        }
    }
    Ok(())
}
