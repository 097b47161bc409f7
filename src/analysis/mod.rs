//! Trace analysis: classification, metrics and outcomes.
//!
//! Analysing one capture is a single sequential pass: the packet source is
//! streamed through the classifier, and the finished timeline is turned into
//! metrics. Memory use does not grow with the number of packets.

mod classifier;
mod metrics;
mod outcome;

pub use classifier::{
    Classification, ClassifierState, ConnectionTimeline, EventKind, FlowClassifier, TimelineEvent,
};
pub use metrics::ConnectionMetrics;
pub use outcome::{OutcomeKind, TraceOutcome};

use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{Packet, PacketSource};
use crate::error::Result;

/// Compute metrics from an already decoded packet sequence.
pub fn analyze_packets<I>(packets: I) -> Result<ConnectionMetrics>
where
    I: IntoIterator<Item = Result<Packet>>,
{
    let timeline = FlowClassifier::classify(packets)?;
    ConnectionMetrics::compute(&timeline)
}

/// Compute metrics from a capture read from any byte stream.
pub fn analyze_reader<R: Read>(input: R) -> Result<ConnectionMetrics> {
    analyze_packets(PacketSource::new(input)?)
}

/// Compute metrics from a capture file.
pub fn analyze_file<P: AsRef<Path>>(path: P) -> Result<ConnectionMetrics> {
    analyze_packets(PacketSource::open(path)?)
}

/// Compute metrics from a capture file, giving up once `cancel` fires.
pub fn analyze_file_until<P: AsRef<Path>>(
    path: P,
    cancel: &CancellationToken,
) -> Result<ConnectionMetrics> {
    let timeline = FlowClassifier::classify_until(PacketSource::open(path)?, cancel)?;
    ConnectionMetrics::compute(&timeline)
}

/// Analyse one capture file and report a typed outcome.
pub fn analyze_trace<P: AsRef<Path>>(path: P) -> TraceOutcome {
    analyze_trace_until(path, &CancellationToken::new())
}

/// Like [`analyze_trace`], but stops reading the capture once `cancel`
/// fires and reports [`TraceOutcome::TimedOut`].
pub fn analyze_trace_until<P: AsRef<Path>>(path: P, cancel: &CancellationToken) -> TraceOutcome {
    let path = path.as_ref();
    debug!(trace = %path.display(), "analysing trace");

    let outcome = TraceOutcome::from(analyze_file_until(path, cancel));
    match &outcome {
        TraceOutcome::Metrics(m) => info!(trace = %path.display(), "{}", m.summary()),
        TraceOutcome::NoUsableConnection => info!(trace = %path.display(), "no usable connection"),
        TraceOutcome::TruncatedCapture { detail } => {
            warn!(trace = %path.display(), "trace with missing data: {detail}");
        }
        TraceOutcome::NonPositiveDuration { seconds } => {
            warn!(trace = %path.display(), seconds, "non-positive connection duration");
        }
        TraceOutcome::IoFailure { detail } => error!(trace = %path.display(), "{detail}"),
        TraceOutcome::TimedOut => warn!(trace = %path.display(), "analysis timed out"),
    }
    outcome
}

/// A capture replayed for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inspection {
    /// TCP segments fed to the classifier.
    pub packets: u64,
    /// Records that were not TCP over IP.
    pub skipped: u64,
    pub events: Vec<TimelineEvent>,
    pub timeline: ConnectionTimeline,
}

/// Replay a capture through the classifier, keeping its recorded events.
pub fn inspect_file<P: AsRef<Path>>(path: P) -> Result<Inspection> {
    let mut source = PacketSource::open(path)?;
    let mut classifier = FlowClassifier::new();
    for packet in source.by_ref() {
        classifier.observe(&packet?);
    }
    let packets = classifier.packets_observed();
    let (timeline, events) = classifier.finish_with_events();
    Ok(Inspection {
        packets,
        skipped: source.records_skipped(),
        events,
        timeline,
    })
}
