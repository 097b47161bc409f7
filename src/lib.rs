//! # mptrace
//!
//! Reconstructs the timeline of a two-path (multipath TCP style) connection
//! from a packet capture and reports how the secondary path was used.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 CLI / BatchAnalyzer (many traces)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │            TraceOutcome  ◄──  ConnectionMetrics                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          FlowClassifier  ──►  ConnectionTimeline                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │     PacketSource (pcap records)  ──►  decode (link/IP/TCP)      │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! Each trace is one sequential pass. Independent traces can be analysed
//! concurrently with [`batch::BatchAnalyzer`].

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Delay logs truncate to whole ms
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]       // Byte counts as f64 for percentages
#![allow(clippy::similar_names)]             // src/dst, primary/secondary
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::redundant_pub_crate)]       // Explicit visibility
#![allow(clippy::match_same_arms)]           // Explicit arm per variant is clearer
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use

pub mod analysis;
pub mod batch;
pub mod capture;
pub mod config;
pub mod delay;
pub mod error;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::analysis::{
        analyze_file, analyze_trace, ConnectionMetrics, ConnectionTimeline, FlowClassifier,
        TraceOutcome,
    };
    pub use crate::batch::{BatchAnalyzer, BatchSummary, TraceReport};
    pub use crate::capture::{Packet, PacketSource};
    pub use crate::config::Config;
    pub use crate::delay::{DelaySource, DelayUnit, SiblingDelayLog};
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
}
