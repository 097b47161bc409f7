//! Connection timeline reconstruction.
//!
//! No segment says "I belong to the secondary path". The classifier infers
//! path identity from handshake ordering and source-address novelty: the
//! first SYN defines the primary initiator, and a SYN from any other address
//! after the first SYN+ACK is taken as the secondary path joining.
//!
//! That heuristic cannot tell a real join apart from a retransmitted primary
//! SYN sent from a different address, or from an unrelated flow sharing the
//! capture. Both are counted as a join.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capture::Packet;
use crate::error::{Error, Result};
use crate::types::{PathRole, Timestamp};

/// Classifier progress through the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierState {
    AwaitingPrimarySyn,
    PrimaryHandshaking,
    AwaitingSecondaryJoin,
    MultipathActive,
    Closing,
    Closed,
}

/// What a single segment was classified as. Variants follow rule priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// First SYN of the connection.
    HandshakeStart,
    /// SYN from a new address after the primary handshake completed.
    SecondaryJoin,
    /// SYN+ACK. Only the first one is recorded.
    HandshakeAck,
    /// First FIN.
    Fin,
    /// RST before any FIN. Only the first one is recorded.
    Rst,
    /// Payload on a path.
    Data(PathRole),
    /// Matched no rule (pure ACKs, retransmitted SYNs, late FINs, ...).
    Control,
}

/// Kind of a recorded timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    HandshakeStart,
    HandshakeAck,
    SecondaryJoin,
    Fin,
    Rst,
}

/// A milestone on the connection timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub kind: EventKind,
    pub timestamp: Timestamp,
    pub src: IpAddr,
    pub dst: IpAddr,
}

/// Per-path timestamps and byte counters for one capture.
///
/// Unobserved milestones stay `None`; they are never defaulted to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTimeline {
    pub handshake_start: Option<Timestamp>,
    pub handshake_ack_time: Option<Timestamp>,
    /// Source address of the first SYN.
    pub primary_address: Option<IpAddr>,
    pub secondary_join_time: Option<Timestamp>,
    pub secondary_address: Option<IpAddr>,
    pub first_secondary_data_time: Option<Timestamp>,
    pub last_secondary_data_time: Option<Timestamp>,
    pub primary_bytes: u64,
    pub secondary_bytes: u64,
    pub fin_time: Option<Timestamp>,
    pub rst_time: Option<Timestamp>,
    /// Timestamp of the last segment processed.
    pub last_seen: Option<Timestamp>,
}

impl ConnectionTimeline {
    /// First FIN, else first RST, else the last segment seen.
    pub fn end_time(&self) -> Option<Timestamp> {
        self.fin_time.or(self.rst_time).or(self.last_seen)
    }

    /// Whether a secondary path join was observed.
    pub fn has_secondary(&self) -> bool {
        self.secondary_join_time.is_some()
    }

    /// Which path an address pair belongs to.
    pub fn path_of(&self, src: IpAddr, dst: IpAddr) -> PathRole {
        match self.secondary_address {
            Some(addr) if addr == src || addr == dst => PathRole::Secondary,
            _ => PathRole::Primary,
        }
    }
}

/// State machine placing each segment on the connection timeline.
#[derive(Debug, Clone)]
pub struct FlowClassifier {
    state: ClassifierState,
    timeline: ConnectionTimeline,
    events: Vec<TimelineEvent>,
    packets: u64,
}

impl Default for FlowClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowClassifier {
    /// Create a classifier waiting for the first SYN.
    pub fn new() -> Self {
        Self {
            state: ClassifierState::AwaitingPrimarySyn,
            timeline: ConnectionTimeline::default(),
            // one slot per EventKind, each recorded at most once
            events: Vec::with_capacity(5),
            packets: 0,
        }
    }

    /// Run the classifier over a packet sequence.
    ///
    /// The first error aborts classification; partial state is dropped.
    pub fn classify<I>(packets: I) -> Result<ConnectionTimeline>
    where
        I: IntoIterator<Item = Result<Packet>>,
    {
        Self::classify_until(packets, &CancellationToken::new())
    }

    /// Run the classifier until the sequence ends or `cancel` fires.
    ///
    /// The token is checked before each packet is pulled, so a cancelled
    /// pass stops reading the capture and fails with `Error::Cancelled`.
    pub fn classify_until<I>(packets: I, cancel: &CancellationToken) -> Result<ConnectionTimeline>
    where
        I: IntoIterator<Item = Result<Packet>>,
    {
        let mut classifier = Self::new();
        let mut packets = packets.into_iter();
        loop {
            if cancel.is_cancelled() {
                debug!(packets = classifier.packets, "classification cancelled");
                return Err(Error::Cancelled);
            }
            let Some(packet) = packets.next() else {
                break;
            };
            classifier.observe(&packet?);
        }
        Ok(classifier.finish())
    }

    /// Get the current state.
    pub fn state(&self) -> ClassifierState {
        self.state
    }

    /// Get the timeline built so far.
    pub fn timeline(&self) -> &ConnectionTimeline {
        &self.timeline
    }

    /// Recorded milestones, in arrival order.
    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Number of segments observed so far.
    pub fn packets_observed(&self) -> u64 {
        self.packets
    }

    /// Close the timeline at end of stream.
    pub fn finish(mut self) -> ConnectionTimeline {
        self.transition(ClassifierState::Closed);
        self.timeline
    }

    /// Close the timeline, keeping the recorded events.
    pub fn finish_with_events(mut self) -> (ConnectionTimeline, Vec<TimelineEvent>) {
        self.transition(ClassifierState::Closed);
        (self.timeline, self.events)
    }

    /// Classify one segment and update the timeline.
    pub fn observe(&mut self, packet: &Packet) -> Classification {
        let ts = packet.timestamp;
        let flags = packet.flags;
        let tl = &mut self.timeline;

        self.packets += 1;
        tl.last_seen = Some(ts);

        let syn_only = flags.syn() && !flags.ack();

        if syn_only && tl.handshake_start.is_none() {
            tl.handshake_start = Some(ts);
            tl.primary_address = Some(packet.src);
            self.record(EventKind::HandshakeStart, packet);
            self.transition(ClassifierState::PrimaryHandshaking);
            return Classification::HandshakeStart;
        }

        if syn_only
            && tl.handshake_ack_time.is_some()
            && tl.primary_address != Some(packet.src)
            && tl.secondary_join_time.is_none()
        {
            tl.secondary_join_time = Some(ts);
            tl.secondary_address = Some(packet.src);
            self.record(EventKind::SecondaryJoin, packet);
            if self.state != ClassifierState::Closing {
                self.transition(ClassifierState::MultipathActive);
            }
            return Classification::SecondaryJoin;
        }

        if flags.syn() && flags.ack() {
            if tl.handshake_ack_time.is_none() {
                tl.handshake_ack_time = Some(ts);
                self.record(EventKind::HandshakeAck, packet);
                if self.state == ClassifierState::PrimaryHandshaking {
                    self.transition(ClassifierState::AwaitingSecondaryJoin);
                }
            }
            return Classification::HandshakeAck;
        }

        if flags.fin() && tl.fin_time.is_none() {
            tl.fin_time = Some(ts);
            self.record(EventKind::Fin, packet);
            self.transition(ClassifierState::Closing);
            return Classification::Fin;
        }

        if flags.rst() && tl.fin_time.is_none() {
            if tl.rst_time.is_none() {
                tl.rst_time = Some(ts);
                self.record(EventKind::Rst, packet);
                self.transition(ClassifierState::Closing);
            }
            return Classification::Rst;
        }

        if packet.payload_len == 0 {
            return Classification::Control;
        }

        let bytes = packet.payload_len as u64;
        match tl.path_of(packet.src, packet.dst) {
            PathRole::Secondary => {
                tl.secondary_bytes += bytes;
                if tl.first_secondary_data_time.is_none() {
                    tl.first_secondary_data_time = Some(ts);
                }
                tl.last_secondary_data_time = Some(ts);
                Classification::Data(PathRole::Secondary)
            }
            PathRole::Primary => {
                tl.primary_bytes += bytes;
                Classification::Data(PathRole::Primary)
            }
        }
    }

    fn record(&mut self, kind: EventKind, packet: &Packet) {
        debug!(
            ?kind,
            ts = %packet.timestamp,
            src = %packet.src,
            dst = %packet.dst,
            "timeline event"
        );
        self.events.push(TimelineEvent {
            kind,
            timestamp: packet.timestamp,
            src: packet.src,
            dst: packet.dst,
        });
    }

    fn transition(&mut self, next: ClassifierState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "classifier transition");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::capture::TcpFlags;
    use crate::error::{CaptureError, Error};

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const CELL: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 1));
    const SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 2, 0, 1));

    fn seg(t: f64, src: IpAddr, dst: IpAddr, flags: u8, payload_len: usize) -> Packet {
        Packet {
            timestamp: Timestamp::from_secs_f64(1000.0 + t),
            src,
            dst,
            src_port: 40000,
            dst_port: 80,
            flags: TcpFlags::new(flags),
            payload_len,
        }
    }

    const SYN: u8 = TcpFlags::SYN;
    const SYNACK: u8 = TcpFlags::SYN | TcpFlags::ACK;
    const ACK: u8 = TcpFlags::ACK;
    const FIN: u8 = TcpFlags::FIN | TcpFlags::ACK;
    const RST: u8 = TcpFlags::RST;

    #[test]
    fn test_state_progression() {
        let mut c = FlowClassifier::new();
        assert_eq!(c.state(), ClassifierState::AwaitingPrimarySyn);

        assert_eq!(c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0)), Classification::HandshakeStart);
        assert_eq!(c.state(), ClassifierState::PrimaryHandshaking);

        assert_eq!(c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0)), Classification::HandshakeAck);
        assert_eq!(c.state(), ClassifierState::AwaitingSecondaryJoin);

        assert_eq!(c.observe(&seg(0.5, CELL, SERVER, SYN, 0)), Classification::SecondaryJoin);
        assert_eq!(c.state(), ClassifierState::MultipathActive);

        assert_eq!(c.observe(&seg(1.0, CLIENT, SERVER, FIN, 0)), Classification::Fin);
        assert_eq!(c.state(), ClassifierState::Closing);

        let (timeline, events) = c.finish_with_events();
        assert_eq!(timeline.primary_address, Some(CLIENT));
        assert_eq!(timeline.secondary_address, Some(CELL));
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::HandshakeStart,
                EventKind::HandshakeAck,
                EventKind::SecondaryJoin,
                EventKind::Fin
            ]
        );
    }

    #[test]
    fn test_syn_before_synack_is_not_a_join() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        // a SYN from another address before the handshake completed
        assert_eq!(c.observe(&seg(0.01, CELL, SERVER, SYN, 0)), Classification::Control);
        assert!(c.timeline().secondary_join_time.is_none());
    }

    #[test]
    fn test_primary_syn_retransmit_is_not_a_join() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0));
        assert_eq!(c.observe(&seg(1.0, CLIENT, SERVER, SYN, 0)), Classification::Control);
        assert!(!c.timeline().has_secondary());
    }

    #[test]
    fn test_only_first_join_recorded() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0));
        c.observe(&seg(0.3, CELL, SERVER, SYN, 0));
        let other = IpAddr::V4(Ipv4Addr::new(192, 168, 9, 9));
        assert_eq!(c.observe(&seg(0.4, other, SERVER, SYN, 0)), Classification::Control);

        let tl = c.finish();
        assert_eq!(tl.secondary_address, Some(CELL));
        assert_eq!(tl.secondary_join_time, Some(Timestamp::from_secs_f64(1000.3)));
    }

    #[test]
    fn test_only_first_synack_recorded() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0));
        assert_eq!(c.observe(&seg(0.6, SERVER, CELL, SYNACK, 0)), Classification::HandshakeAck);
        assert_eq!(
            c.timeline().handshake_ack_time,
            Some(Timestamp::from_secs_f64(1000.02))
        );
    }

    #[test]
    fn test_bytes_split_by_path() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0));
        c.observe(&seg(0.1, CLIENT, SERVER, ACK, 400));
        c.observe(&seg(0.5, CELL, SERVER, SYN, 0));
        assert_eq!(
            c.observe(&seg(0.6, SERVER, CELL, ACK, 300)),
            Classification::Data(PathRole::Secondary)
        );
        assert_eq!(
            c.observe(&seg(0.7, CLIENT, SERVER, ACK, 100)),
            Classification::Data(PathRole::Primary)
        );
        c.observe(&seg(0.9, CELL, SERVER, ACK, 200));
        c.observe(&seg(0.95, SERVER, CELL, ACK, 0));

        let tl = c.finish();
        assert_eq!(tl.primary_bytes, 500);
        assert_eq!(tl.secondary_bytes, 500);
        assert_eq!(tl.first_secondary_data_time, Some(Timestamp::from_secs_f64(1000.6)));
        assert_eq!(tl.last_secondary_data_time, Some(Timestamp::from_secs_f64(1000.9)));
    }

    #[test]
    fn test_data_on_fin_or_rst_not_counted() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0));
        c.observe(&seg(0.5, CLIENT, SERVER, FIN, 50));
        // second FIN falls through to the payload rules
        c.observe(&seg(0.6, SERVER, CLIENT, FIN, 70));
        let tl = c.finish();
        assert_eq!(tl.primary_bytes, 70);
    }

    #[test]
    fn test_end_time_priority() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0));
        c.observe(&seg(0.4, SERVER, CLIENT, RST, 0));
        c.observe(&seg(0.5, SERVER, CLIENT, RST, 0));
        c.observe(&seg(2.0, CLIENT, SERVER, ACK, 0));
        let tl = c.timeline().clone();
        assert_eq!(tl.end_time(), Some(Timestamp::from_secs_f64(1000.4)));

        c.observe(&seg(3.0, CLIENT, SERVER, FIN, 0));
        c.observe(&seg(4.0, CLIENT, SERVER, FIN, 0));
        let tl = c.finish();
        assert_eq!(tl.end_time(), Some(Timestamp::from_secs_f64(1003.0)));
        assert_eq!(tl.last_seen, Some(Timestamp::from_secs_f64(1004.0)));
    }

    #[test]
    fn test_end_time_falls_back_to_last_seen() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.02, SERVER, CLIENT, SYNACK, 0));
        c.observe(&seg(1.5, CLIENT, SERVER, ACK, 10));
        let tl = c.finish();
        assert_eq!(tl.end_time(), Some(Timestamp::from_secs_f64(1001.5)));
    }

    #[test]
    fn test_classify_aborts_on_error() {
        let packets: Vec<Result<Packet>> = vec![
            Ok(seg(0.0, CLIENT, SERVER, SYN, 0)),
            Err(Error::Capture(CaptureError::UnexpectedEof { record: 2 })),
            Ok(seg(0.02, SERVER, CLIENT, SYNACK, 0)),
        ];
        let err = FlowClassifier::classify(packets).unwrap_err();
        assert!(err.is_truncated_capture());
    }

    #[test]
    fn test_cancelled_classification_stops_pulling() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut pulled = 0;
        let packets = (0..100).map(|i| {
            pulled += 1;
            if i == 9 {
                trigger.cancel();
            }
            Ok(seg(f64::from(i) * 0.01, CLIENT, SERVER, ACK, 10))
        });

        let err = FlowClassifier::classify_until(packets, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(pulled, 10);
    }

    #[test]
    fn test_uncancelled_classification_completes() {
        let packets = vec![
            Ok(seg(0.0, CLIENT, SERVER, SYN, 0)),
            Ok(seg(0.02, SERVER, CLIENT, SYNACK, 0)),
        ];
        let tl = FlowClassifier::classify_until(packets, &CancellationToken::new()).unwrap();
        assert!(tl.handshake_ack_time.is_some());
    }

    #[test]
    fn test_packets_observed_counts_every_segment() {
        let mut c = FlowClassifier::new();
        c.observe(&seg(0.0, CLIENT, SERVER, SYN, 0));
        c.observe(&seg(0.01, SERVER, CLIENT, SYNACK, 0));
        c.observe(&seg(0.02, CLIENT, SERVER, ACK, 0));
        assert_eq!(c.packets_observed(), 3);
    }
}
