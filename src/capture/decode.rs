//! Link, network and TCP header decoding.
//!
//! Only the fields needed to place a segment on the connection timeline are
//! decoded: addresses, ports, the SYN/ACK/FIN/RST bits and the payload
//! length. The payload length is derived from the IP length fields, so
//! captures taken with a short snapshot length still count every byte.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::types::Timestamp;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const ETHERTYPE_QINQ_LEGACY: u16 = 0x9100;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;

const IPPROTO_TCP: u8 = 6;

/// Link-layer encapsulation declared in the capture's global header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// DLT_EN10MB.
    Ethernet,
    /// Linux cooked capture (`any` interface), v1.
    LinuxSll,
    /// Linux cooked capture, v2.
    LinuxSll2,
    /// Raw IP, version taken from the first nibble.
    Raw,
    /// Raw IPv4 only.
    Ipv4,
    /// Raw IPv6 only.
    Ipv6,
}

impl LinkType {
    /// Map a pcap LINKTYPE_ value to a supported encapsulation.
    pub fn from_linktype(value: i32) -> Result<Self, CaptureError> {
        match value {
            1 => Ok(LinkType::Ethernet),
            113 => Ok(LinkType::LinuxSll),
            276 => Ok(LinkType::LinuxSll2),
            101 | 12 | 14 => Ok(LinkType::Raw),
            228 => Ok(LinkType::Ipv4),
            229 => Ok(LinkType::Ipv6),
            other => Err(CaptureError::UnsupportedLinkType(other)),
        }
    }

    /// The canonical pcap LINKTYPE_ value.
    pub fn linktype(self) -> i32 {
        match self {
            LinkType::Ethernet => 1,
            LinkType::LinuxSll => 113,
            LinkType::LinuxSll2 => 276,
            LinkType::Raw => 101,
            LinkType::Ipv4 => 228,
            LinkType::Ipv6 => 229,
        }
    }
}

/// Network-layer content of a link-layer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFrame<'a> {
    Ipv4(&'a [u8]),
    Ipv6(&'a [u8]),
    /// Anything else (ARP, LLDP, ...), identified by its ethertype.
    Other(u16),
}

fn truncated(layer: &'static str, needed: usize, available: usize) -> CaptureError {
    CaptureError::Truncated {
        record: 0,
        layer,
        needed,
        available,
    }
}

fn malformed(reason: impl Into<String>) -> CaptureError {
    CaptureError::Malformed {
        record: 0,
        reason: reason.into(),
    }
}

fn frame_for_ethertype(ethertype: u16, payload: &[u8]) -> NetworkFrame<'_> {
    match ethertype {
        ETHERTYPE_IPV4 => NetworkFrame::Ipv4(payload),
        ETHERTYPE_IPV6 => NetworkFrame::Ipv6(payload),
        other => NetworkFrame::Other(other),
    }
}

/// Strip the link-layer header and locate the network-layer frame.
pub fn decode_link(link: LinkType, data: &[u8]) -> Result<NetworkFrame<'_>, CaptureError> {
    match link {
        LinkType::Ethernet => decode_ethernet(data),
        LinkType::LinuxSll => {
            if data.len() < SLL_HEADER_LEN {
                return Err(truncated("linux cooked", SLL_HEADER_LEN, data.len()));
            }
            let protocol = BigEndian::read_u16(&data[14..16]);
            Ok(frame_for_ethertype(protocol, &data[SLL_HEADER_LEN..]))
        }
        LinkType::LinuxSll2 => {
            if data.len() < SLL2_HEADER_LEN {
                return Err(truncated("linux cooked v2", SLL2_HEADER_LEN, data.len()));
            }
            let protocol = BigEndian::read_u16(&data[0..2]);
            Ok(frame_for_ethertype(protocol, &data[SLL2_HEADER_LEN..]))
        }
        LinkType::Raw => match data.first().map(|b| b >> 4) {
            Some(4) => Ok(NetworkFrame::Ipv4(data)),
            Some(6) => Ok(NetworkFrame::Ipv6(data)),
            Some(v) => Err(malformed(format!("raw frame with IP version {v}"))),
            None => Err(truncated("raw ip", 1, 0)),
        },
        LinkType::Ipv4 => Ok(NetworkFrame::Ipv4(data)),
        LinkType::Ipv6 => Ok(NetworkFrame::Ipv6(data)),
    }
}

fn decode_ethernet(data: &[u8]) -> Result<NetworkFrame<'_>, CaptureError> {
    if data.len() < ETHERNET_HEADER_LEN {
        return Err(truncated("ethernet", ETHERNET_HEADER_LEN, data.len()));
    }

    let mut ethertype = BigEndian::read_u16(&data[12..14]);
    let mut offset = ETHERNET_HEADER_LEN;

    // 802.1Q / 802.1ad tags, possibly stacked
    while matches!(
        ethertype,
        ETHERTYPE_VLAN | ETHERTYPE_QINQ | ETHERTYPE_QINQ_LEGACY
    ) {
        if data.len() < offset + VLAN_TAG_LEN {
            return Err(truncated("vlan tag", offset + VLAN_TAG_LEN, data.len()));
        }
        ethertype = BigEndian::read_u16(&data[offset + 2..offset + 4]);
        offset += VLAN_TAG_LEN;
    }

    Ok(frame_for_ethertype(ethertype, &data[offset..]))
}

/// Decoded IPv4 header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub header_len: usize,
    pub total_len: usize,
    pub protocol: u8,
    pub fragment_offset: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn parse(data: &[u8]) -> Result<Self, CaptureError> {
        if data.len() < IPV4_MIN_HEADER_LEN {
            return Err(truncated("ipv4", IPV4_MIN_HEADER_LEN, data.len()));
        }

        let version = data[0] >> 4;
        if version != 4 {
            return Err(malformed(format!("ipv4 frame with version {version}")));
        }

        let header_len = usize::from(data[0] & 0x0f) * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(malformed(format!("ipv4 header length {header_len}")));
        }
        if data.len() < header_len {
            return Err(truncated("ipv4 options", header_len, data.len()));
        }

        let total_len = usize::from(BigEndian::read_u16(&data[2..4]));
        if total_len < header_len {
            return Err(malformed(format!(
                "ipv4 total length {total_len} shorter than header {header_len}"
            )));
        }

        Ok(Self {
            header_len,
            total_len,
            protocol: data[9],
            fragment_offset: BigEndian::read_u16(&data[6..8]) & 0x1fff,
            src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }
}

/// Decoded IPv6 header fields, with extension headers already walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Header {
    /// Fixed header plus extension headers.
    pub header_len: usize,
    pub payload_len: usize,
    /// Upper-layer protocol after the extension chain.
    pub next_header: u8,
    /// False for a non-initial fragment, which carries no upper-layer header.
    pub first_fragment: bool,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    pub fn parse(data: &[u8]) -> Result<Self, CaptureError> {
        if data.len() < IPV6_HEADER_LEN {
            return Err(truncated("ipv6", IPV6_HEADER_LEN, data.len()));
        }

        let version = data[0] >> 4;
        if version != 6 {
            return Err(malformed(format!("ipv6 frame with version {version}")));
        }

        let payload_len = usize::from(BigEndian::read_u16(&data[4..6]));

        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src.copy_from_slice(&data[8..24]);
        dst.copy_from_slice(&data[24..40]);

        let (next_header, header_len, first_fragment) =
            Self::skip_extension_headers(data, data[6], IPV6_HEADER_LEN)?;

        if header_len > IPV6_HEADER_LEN + payload_len {
            return Err(malformed(format!(
                "ipv6 extension headers ({header_len} bytes) exceed payload length {payload_len}"
            )));
        }

        Ok(Self {
            header_len,
            payload_len,
            next_header,
            first_fragment,
            src: Ipv6Addr::from(src),
            dst: Ipv6Addr::from(dst),
        })
    }

    fn skip_extension_headers(
        data: &[u8],
        next_header: u8,
        mut offset: usize,
    ) -> Result<(u8, usize, bool), CaptureError> {
        const HOP_BY_HOP: u8 = 0;
        const ROUTING: u8 = 43;
        const FRAGMENT: u8 = 44;
        const AUTH: u8 = 51;
        const DESTINATION: u8 = 60;

        let mut current = next_header;
        let mut first_fragment = true;

        loop {
            match current {
                HOP_BY_HOP | ROUTING | DESTINATION => {
                    if data.len() < offset + 2 {
                        return Err(truncated("ipv6 extension", offset + 2, data.len()));
                    }
                    current = data[offset];
                    offset += (usize::from(data[offset + 1]) + 1) * 8;
                }
                AUTH => {
                    if data.len() < offset + 2 {
                        return Err(truncated("ipv6 extension", offset + 2, data.len()));
                    }
                    current = data[offset];
                    offset += (usize::from(data[offset + 1]) + 2) * 4;
                }
                FRAGMENT => {
                    if data.len() < offset + 8 {
                        return Err(truncated("ipv6 fragment", offset + 8, data.len()));
                    }
                    current = data[offset];
                    let frag = BigEndian::read_u16(&data[offset + 2..offset + 4]) >> 3;
                    first_fragment = frag == 0;
                    offset += 8;
                }
                _ => return Ok((current, offset, first_fragment)),
            }
        }
    }
}

/// IPv4/IPv6 union, resolved once per packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

impl IpHeader {
    /// Parse the network header of a located frame. Returns `None` for
    /// frames that are not IP.
    pub fn from_frame(frame: NetworkFrame<'_>) -> Result<Option<(Self, &[u8])>, CaptureError> {
        match frame {
            NetworkFrame::Ipv4(data) => Ok(Some((IpHeader::V4(Ipv4Header::parse(data)?), data))),
            NetworkFrame::Ipv6(data) => Ok(Some((IpHeader::V6(Ipv6Header::parse(data)?), data))),
            NetworkFrame::Other(_) => Ok(None),
        }
    }

    pub fn src(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.src),
            IpHeader::V6(h) => IpAddr::V6(h.src),
        }
    }

    pub fn dst(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.dst),
            IpHeader::V6(h) => IpAddr::V6(h.dst),
        }
    }

    pub fn header_len(&self) -> usize {
        match self {
            IpHeader::V4(h) => h.header_len,
            IpHeader::V6(h) => h.header_len,
        }
    }

    /// Length of the datagram as declared by the header.
    pub fn total_len(&self) -> usize {
        match self {
            IpHeader::V4(h) => h.total_len,
            IpHeader::V6(h) => IPV6_HEADER_LEN + h.payload_len,
        }
    }

    pub fn protocol(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.protocol,
            IpHeader::V6(h) => h.next_header,
        }
    }

    /// Whether the upper-layer header starts in this datagram.
    pub fn carries_transport_header(&self) -> bool {
        match self {
            IpHeader::V4(h) => h.fragment_offset == 0,
            IpHeader::V6(h) => h.first_fragment,
        }
    }
}

/// TCP control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn syn(self) -> bool {
        self.has(Self::SYN)
    }

    pub fn ack(self) -> bool {
        self.has(Self::ACK)
    }

    pub fn fin(self) -> bool {
        self.has(Self::FIN)
    }

    pub fn rst(self) -> bool {
        self.has(Self::RST)
    }

    /// Get the raw flag byte.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Serialize for TcpFlags {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for TcpFlags {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(u8::deserialize(deserializer)?))
    }
}

/// Decoded fixed TCP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Header length including options, in bytes.
    pub data_offset: usize,
    pub flags: TcpFlags,
}

impl TcpHeader {
    /// Parse the fixed part of a TCP header. Options may be clipped by the
    /// snapshot length; only the data offset is needed from them.
    pub fn parse(data: &[u8]) -> Result<Self, CaptureError> {
        if data.len() < TCP_MIN_HEADER_LEN {
            return Err(truncated("tcp", TCP_MIN_HEADER_LEN, data.len()));
        }

        let data_offset = usize::from(data[12] >> 4) * 4;
        if data_offset < TCP_MIN_HEADER_LEN {
            return Err(malformed(format!("tcp data offset {data_offset}")));
        }

        Ok(Self {
            src_port: BigEndian::read_u16(&data[0..2]),
            dst_port: BigEndian::read_u16(&data[2..4]),
            data_offset,
            flags: TcpFlags::new(data[13]),
        })
    }
}

/// One decoded TCP segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub timestamp: Timestamp,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
    /// IP length minus IP and TCP header lengths.
    pub payload_len: usize,
}

/// Decode one captured frame into a TCP segment.
///
/// Returns `Ok(None)` for frames that are not TCP over IP, and for
/// non-initial IP fragments.
pub fn decode_packet(
    link: LinkType,
    timestamp: Timestamp,
    data: &[u8],
) -> Result<Option<Packet>, CaptureError> {
    let frame = decode_link(link, data)?;
    let Some((ip, ip_data)) = IpHeader::from_frame(frame)? else {
        return Ok(None);
    };

    if ip.protocol() != IPPROTO_TCP || !ip.carries_transport_header() {
        return Ok(None);
    }

    let tcp = TcpHeader::parse(&ip_data[ip.header_len().min(ip_data.len())..])?;

    let headers = ip.header_len() + tcp.data_offset;
    let payload_len = ip.total_len().checked_sub(headers).ok_or_else(|| {
        malformed(format!(
            "ip length {} shorter than ip+tcp headers {headers}",
            ip.total_len()
        ))
    })?;

    Ok(Some(Packet {
        timestamp,
        src: ip.src(),
        dst: ip.dst(),
        src_port: tcp.src_port,
        dst_port: tcp.dst_port,
        flags: tcp.flags,
        payload_len,
    }))
}
