//! Builders for synthetic pcap captures.

#![allow(dead_code)]

use std::net::IpAddr;
use std::path::Path;

pub const SYN: u8 = 0x02;
pub const FIN: u8 = 0x01;
pub const RST: u8 = 0x04;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;
pub const LINKTYPE_LINUX_SLL: u32 = 113;

/// Writes a classic little-endian, microsecond pcap in memory.
pub struct CaptureBuilder {
    linktype: u32,
    bytes: Vec<u8>,
}

impl CaptureBuilder {
    pub fn new(linktype: u32) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&65535u32.to_le_bytes());
        bytes.extend_from_slice(&linktype.to_le_bytes());
        Self { linktype, bytes }
    }

    pub fn ethernet() -> Self {
        Self::new(LINKTYPE_ETHERNET)
    }

    /// Append one TCP segment at `t_ms` milliseconds after the epoch.
    pub fn tcp(self, t_ms: u64, src: IpAddr, dst: IpAddr, flags: u8, payload: usize) -> Self {
        let ip = ip_packet(src, dst, &tcp_segment(flags, payload));
        let frame = self.frame(&ip, src.is_ipv6());
        self.record(t_ms, &frame)
    }

    /// Append a record with the given link-layer bytes.
    pub fn record(mut self, t_ms: u64, data: &[u8]) -> Self {
        let ts_sec = (t_ms / 1000) as u32;
        let ts_usec = ((t_ms % 1000) * 1000) as u32;
        self.bytes.extend_from_slice(&ts_sec.to_le_bytes());
        self.bytes.extend_from_slice(&ts_usec.to_le_bytes());
        self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(data);
        self
    }

    /// Wrap a network-layer packet in this capture's link header.
    pub fn frame(&self, ip: &[u8], v6: bool) -> Vec<u8> {
        let ethertype: u16 = if v6 { 0x86dd } else { 0x0800 };
        let mut out = Vec::new();
        match self.linktype {
            LINKTYPE_ETHERNET => {
                out.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
                out.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
                out.extend_from_slice(&ethertype.to_be_bytes());
            }
            LINKTYPE_LINUX_SLL => {
                out.extend_from_slice(&4u16.to_be_bytes()); // sent by us
                out.extend_from_slice(&1u16.to_be_bytes()); // ARPHRD_ETHER
                out.extend_from_slice(&6u16.to_be_bytes());
                out.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01, 0, 0]);
                out.extend_from_slice(&ethertype.to_be_bytes());
            }
            _ => {}
        }
        out.extend_from_slice(ip);
        out
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_to(self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }
}

/// A 20-byte TCP header followed by `payload` zero bytes.
pub fn tcp_segment(flags: u8, payload: usize) -> Vec<u8> {
    let mut tcp = vec![0u8; 20 + payload];
    tcp[0..2].copy_from_slice(&40000u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&443u16.to_be_bytes());
    tcp[12] = 0x50;
    tcp[13] = flags;
    tcp
}

/// Wrap a transport segment in an IPv4 or IPv6 header.
pub fn ip_packet(src: IpAddr, dst: IpAddr, segment: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            let total = (20 + segment.len()) as u16;
            out.extend_from_slice(&[0x45, 0x00]);
            out.extend_from_slice(&total.to_be_bytes());
            out.extend_from_slice(&[0, 0, 0x40, 0x00, 64, 6, 0, 0]);
            out.extend_from_slice(&s.octets());
            out.extend_from_slice(&d.octets());
        }
        (IpAddr::V6(s), IpAddr::V6(d)) => {
            out.extend_from_slice(&[0x60, 0, 0, 0]);
            out.extend_from_slice(&(segment.len() as u16).to_be_bytes());
            out.extend_from_slice(&[6, 64]);
            out.extend_from_slice(&s.octets());
            out.extend_from_slice(&d.octets());
        }
        _ => panic!("mixed address families"),
    }
    out.extend_from_slice(segment);
    out
}
