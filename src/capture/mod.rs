//! Capture file reading and header decoding.
//!
//! This module provides:
//! - A streaming pcap reader yielding decoded TCP segments
//! - Link-layer dispatch (Ethernet, Linux cooked capture, raw IP)
//! - The IPv4/IPv6 header union and TCP flag extraction

mod decode;
mod source;

pub use decode::{
    decode_link, decode_packet, IpHeader, Ipv4Header, Ipv6Header, LinkType, NetworkFrame, Packet,
    TcpFlags, TcpHeader,
};
pub use source::PacketSource;
