use std::net::IpAddr;

use etherparse::{NetHeaders, PacketHeaders, TransportHeader};
use thiserror::Error;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Linux cooked capture v1 header (DLT_LINUX_SLL): pkttype(2) hatype(2)
/// halen(2) addr(8) protocol(2).
const SLL_HEADER_LEN: usize = 16;
const SLL_PROTOCOL_OFFSET: usize = 14;

/// Linux cooked capture v2 header (DLT_LINUX_SLL2): protocol(2) reserved(2)
/// ifindex(4) hatype(2) pkttype(1) halen(1) addr(8).
const SLL2_HEADER_LEN: usize = 20;

/// BSD null/loopback pseudo-header: a 4-byte address-family word.
const NULL_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Link-layer framing of the capture source, derived from the datalink type
/// libpcap reports for the open handle. Capturing on the "any" pseudo-device
/// on Linux yields cooked headers, not Ethernet, so this selection is
/// load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    LinuxSll,
    LinuxSll2,
    /// BSD null/loopback encapsulation
    Null,
    /// No link header; the frame starts at the IP layer
    RawIp,
}

impl LinkLayer {
    pub fn from_datalink(linktype: pcap::Linktype) -> Result<Self, DecodeError> {
        match linktype.0 {
            1 => Ok(LinkLayer::Ethernet),
            113 => Ok(LinkLayer::LinuxSll),
            276 => Ok(LinkLayer::LinuxSll2),
            0 | 108 => Ok(LinkLayer::Null),
            101 | 228 | 229 => Ok(LinkLayer::RawIp),
            other => Err(DecodeError::UnsupportedDatalink(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported datalink type {0}")]
    UnsupportedDatalink(i32),
    #[error("frame truncated below header length")]
    Truncated,
    #[error("unsupported network layer")]
    UnsupportedNetwork,
    #[error("unsupported transport protocol")]
    UnsupportedTransport,
    #[error("malformed packet headers")]
    Malformed,
}

/// A decoded transport segment: the 4-tuple plus the transport payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSegment {
    pub protocol: Transport,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

/// Strip link, network, and transport headers from a captured frame.
///
/// Only UDP and TCP segments over IPv4/IPv6 come out the other side; IPv6
/// extension headers are skipped on the way to the transport header.
/// Everything else is a reject, which the pipeline counts as `invalid`.
pub fn decode(link: LinkLayer, data: &[u8]) -> Result<TransportSegment, DecodeError> {
    let headers = match link {
        LinkLayer::Ethernet => {
            PacketHeaders::from_ethernet_slice(data).map_err(|_| DecodeError::Malformed)?
        }
        LinkLayer::LinuxSll => {
            let inner = strip_cooked(data, SLL_HEADER_LEN, Some(SLL_PROTOCOL_OFFSET))?;
            PacketHeaders::from_ip_slice(inner).map_err(|_| DecodeError::Malformed)?
        }
        LinkLayer::LinuxSll2 => {
            let inner = strip_cooked(data, SLL2_HEADER_LEN, Some(0))?;
            PacketHeaders::from_ip_slice(inner).map_err(|_| DecodeError::Malformed)?
        }
        LinkLayer::Null => {
            // The 4-byte family word is host-endian; the IP version nibble
            // disambiguates v4/v6 regardless, so it is skipped unread.
            let inner = strip_cooked(data, NULL_HEADER_LEN, None)?;
            PacketHeaders::from_ip_slice(inner).map_err(|_| DecodeError::Malformed)?
        }
        LinkLayer::RawIp => {
            PacketHeaders::from_ip_slice(data).map_err(|_| DecodeError::Malformed)?
        }
    };

    let (src_ip, dst_ip) = match headers.net {
        Some(NetHeaders::Ipv4(ipv4, _)) => (
            IpAddr::V4(ipv4.source.into()),
            IpAddr::V4(ipv4.destination.into()),
        ),
        Some(NetHeaders::Ipv6(ipv6, _)) => (
            IpAddr::V6(ipv6.source.into()),
            IpAddr::V6(ipv6.destination.into()),
        ),
        _ => return Err(DecodeError::UnsupportedNetwork),
    };

    let (protocol, src_port, dst_port) = match headers.transport {
        Some(TransportHeader::Udp(udp)) => {
            (Transport::Udp, udp.source_port, udp.destination_port)
        }
        Some(TransportHeader::Tcp(tcp)) => {
            (Transport::Tcp, tcp.source_port, tcp.destination_port)
        }
        _ => return Err(DecodeError::UnsupportedTransport),
    };

    Ok(TransportSegment {
        protocol,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        payload: headers.payload.slice().to_vec(),
    })
}

/// Strip a fixed-size cooked/loopback header, optionally checking the
/// embedded ethertype so non-IP traffic (e.g. ARP on the "any" device) is
/// rejected before the IP parse.
fn strip_cooked(
    data: &[u8],
    header_len: usize,
    ethertype_offset: Option<usize>,
) -> Result<&[u8], DecodeError> {
    if data.len() < header_len {
        return Err(DecodeError::Truncated);
    }
    if let Some(off) = ethertype_offset {
        let ethertype = u16::from_be_bytes([data[off], data[off + 1]]);
        if ethertype != ETHERTYPE_IPV4 && ethertype != ETHERTYPE_IPV6 {
            return Err(DecodeError::UnsupportedNetwork);
        }
    }
    Ok(&data[header_len..])
}
