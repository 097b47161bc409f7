//! Concurrent analysis of many traces.
//!
//! Traces share no state, so each one runs on its own blocking worker with
//! no locking. A semaphore bounds how many run at once. A timeout applies to
//! a whole per-trace pass: it cancels that pass and only affects that trace.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{analyze_trace_until, OutcomeKind, TraceOutcome};
use crate::config::AnalysisConfig;
use crate::delay::DelaySource;
use crate::error::{Error, Result};

/// Outcome of one trace, with its side-channel delay if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceReport {
    pub trace: PathBuf,
    pub outcome: TraceOutcome,
    /// Largest request delay from the trace's delay log, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

/// Per-kind counts over a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub by_kind: BTreeMap<OutcomeKind, usize>,
}

impl BatchSummary {
    /// Count outcomes over finished reports.
    pub fn from_reports(reports: &[TraceReport]) -> Self {
        let mut by_kind = BTreeMap::new();
        for report in reports {
            *by_kind.entry(report.outcome.kind()).or_insert(0) += 1;
        }
        Self {
            total: reports.len(),
            by_kind,
        }
    }

    /// Get the number of traces with the given outcome kind.
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Number of traces that produced metrics.
    pub fn succeeded(&self) -> usize {
        self.count(OutcomeKind::Metrics)
    }
}

/// Runs trace analyses concurrently.
pub struct BatchAnalyzer {
    jobs: usize,
    trace_timeout: Option<Duration>,
    delays: Option<Arc<dyn DelaySource>>,
}

impl BatchAnalyzer {
    /// Create an analyzer running up to `jobs` traces at once.
    pub fn new(jobs: usize) -> Self {
        Self {
            jobs: jobs.max(1),
            trace_timeout: None,
            delays: None,
        }
    }

    /// Create an analyzer from the `[analysis]` configuration.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.jobs).with_timeout(config.trace_timeout)
    }

    /// Set the time limit for each per-trace pass.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.trace_timeout = timeout;
        self
    }

    /// Attach the source of per-request delays.
    pub fn with_delays(mut self, source: Arc<dyn DelaySource>) -> Self {
        self.delays = Some(source);
        self
    }

    /// Analyse every trace. Reports come back in input order.
    pub async fn run(&self, traces: Vec<PathBuf>) -> Result<Vec<TraceReport>> {
        let permits = Arc::new(Semaphore::new(self.jobs));
        let mut tasks = JoinSet::new();

        info!(traces = traces.len(), jobs = self.jobs, "starting batch");

        for (index, trace) in traces.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let delays = self.delays.clone();
            let timeout = self.trace_timeout;

            tasks.spawn(async move {
                let permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Internal(format!("semaphore closed: {e}")))?;
                let report = analyze_one(trace, timeout, delays, permit).await;
                Ok::<_, Error>((index, report))
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, report) =
                joined.map_err(|e| Error::Internal(format!("analysis task failed: {e}")))??;
            reports.push((index, report));
        }

        reports.sort_by_key(|(index, _)| *index);
        let reports: Vec<_> = reports.into_iter().map(|(_, r)| r).collect();

        let summary = BatchSummary::from_reports(&reports);
        info!(
            total = summary.total,
            succeeded = summary.succeeded(),
            "batch finished"
        );
        Ok(reports)
    }
}

/// Analyse one trace on the blocking pool.
///
/// The permit moves into the blocking pass and is released only when that
/// pass returns, including after a timeout cancelled it.
async fn analyze_one(
    trace: PathBuf,
    timeout: Option<Duration>,
    delays: Option<Arc<dyn DelaySource>>,
    permit: OwnedSemaphorePermit,
) -> TraceReport {
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let worker_trace = trace.clone();
    let mut pass = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        analyze_trace_until(worker_trace, &worker_cancel)
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut pass).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(trace = %trace.display(), ?limit, "trace timed out");
                cancel.cancel();
                // wait for the pass to notice, so it stops using its thread
                let _ = pass.await;
                return TraceReport {
                    trace,
                    outcome: TraceOutcome::TimedOut,
                    max_delay_ms: None,
                };
            }
        },
        None => pass.await,
    };

    let outcome = joined.unwrap_or_else(|e| TraceOutcome::IoFailure {
        detail: format!("analysis worker failed: {e}"),
    });

    let max_delay_ms = match (&outcome, delays) {
        (TraceOutcome::Metrics(_), Some(source)) => match source.max_delay_for(&trace) {
            Ok(max) => max,
            Err(e) => {
                warn!(trace = %trace.display(), "{e}");
                None
            }
        },
        _ => None,
    };

    TraceReport {
        trace,
        outcome,
        max_delay_ms,
    }
}

/// Expand the given paths into trace files.
///
/// Files are taken as given. Directories are walked recursively for files
/// whose name ends with `suffix`; results are sorted for a stable order.
pub fn discover_traces(paths: &[PathBuf], suffix: &str) -> Result<Vec<PathBuf>> {
    let mut traces = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            walk(path, suffix, &mut found)?;
            found.sort();
            debug!(dir = %path.display(), found = found.len(), "discovered traces");
            traces.extend(found);
        } else {
            traces.push(path.clone());
        }
    }
    Ok(traces)
}

fn walk(dir: &Path, suffix: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, suffix, found)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix))
        {
            found.push(path);
        }
    }
    Ok(())
}
