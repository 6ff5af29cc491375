//! Captured packet record and link-layer decoding.
//!
//! A [`CapturedPacket`] is an owned, fixed-capacity copy of one frame
//! handed out by the capture device. [`dns_payload`] walks the
//! Ethernet / IP / transport headers to find the DNS message inside it.

use std::fmt;
use std::time::Duration;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;

/// Maximum number of frame bytes kept in a [`CapturedPacket`].
///
/// Ethernet (14) + IPv6 (40) + UDP (8) + a 1232-byte EDNS payload fits
/// comfortably; longer frames are truncated.
pub const MAX_PACKET_SIZE: usize = 2048;

/// Well-known DNS port.
pub const DNS_PORT: u16 = 53;

/// Ethernet header size in bytes.
const ETHERNET_HEADER_SIZE: usize = 14;
/// IPv4 header size in bytes (without options).
const IPV4_HEADER_SIZE: usize = 20;
/// IPv6 header size in bytes.
const IPV6_HEADER_SIZE: usize = 40;
/// UDP header size in bytes.
const UDP_HEADER_SIZE: usize = 8;
/// DNS over TCP prefixes every message with a 2-byte length.
const TCP_LENGTH_PREFIX: usize = 2;

/// Per-frame metadata reported by the capture device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    /// Capture time, relative to the Unix epoch.
    pub timestamp: Duration,
    /// Number of bytes actually captured.
    pub captured_len: u32,
    /// Length of the frame on the wire.
    pub original_len: u32,
}

/// A frame borrowed from the capture device for the duration of one callback.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame<'a> {
    pub header: FrameHeader,
    pub data: &'a [u8],
}

/// One link-layer frame, copied out of the capture device.
///
/// Never mutated after construction.
#[derive(Clone)]
pub struct CapturedPacket {
    header: FrameHeader,
    length: usize,
    data: [u8; MAX_PACKET_SIZE],
}

impl CapturedPacket {
    /// Copy a frame into a new record.
    ///
    /// The copied byte count is the smallest of [`MAX_PACKET_SIZE`], the
    /// reported capture length and the bytes actually supplied.
    pub fn new(header: &FrameHeader, frame: &[u8]) -> Self {
        let captured = usize::try_from(header.captured_len).unwrap_or(usize::MAX);
        let length = MAX_PACKET_SIZE.min(captured).min(frame.len());

        let mut data = [0u8; MAX_PACKET_SIZE];
        data[..length].copy_from_slice(&frame[..length]);

        Self {
            header: *header,
            length,
            data,
        }
    }

    /// The copied frame bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    #[inline]
    pub const fn timestamp(&self) -> Duration {
        self.header.timestamp
    }

    #[inline]
    pub const fn captured_len(&self) -> u32 {
        self.header.captured_len
    }

    #[inline]
    pub const fn original_len(&self) -> u32 {
        self.header.original_len
    }

    /// Check if the frame was cut short, either by the snapshot length or by this record's capacity.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        !u32::try_from(self.length).is_ok_and(|len| len >= self.header.original_len)
    }
}

impl fmt::Debug for CapturedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedPacket")
            .field("header", &self.header)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Locate the DNS message inside an Ethernet frame.
///
/// Returns None if:
/// - The frame is not IPv4 or IPv6
/// - The transport is neither UDP nor TCP
/// - Neither port is 53 (DNS)
/// - The frame is an IPv4 fragment other than the first
/// - Any header is truncated
pub fn dns_payload(frame: &[u8]) -> Option<&[u8]> {
    let ethernet = EthernetPacket::new(frame)?;
    let network = frame.get(ETHERNET_HEADER_SIZE..)?;

    let (protocol, header_len) = match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::new(network)?;
            let header_len = usize::from(ipv4.get_header_length()) * 4;
            // Later fragments carry no transport header.
            if header_len < IPV4_HEADER_SIZE || ipv4.get_fragment_offset() != 0 {
                return None;
            }
            (ipv4.get_next_level_protocol(), header_len)
        }
        EtherTypes::Ipv6 => {
            let ipv6 = Ipv6Packet::new(network)?;
            (ipv6.get_next_header(), IPV6_HEADER_SIZE)
        }
        _ => return None,
    };

    transport_payload(protocol, network.get(header_len..)?)
}

fn transport_payload(protocol: IpNextHeaderProtocol, segment: &[u8]) -> Option<&[u8]> {
    match protocol {
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(segment)?;
            if !is_dns(udp.get_source(), udp.get_destination()) {
                return None;
            }
            segment.get(UDP_HEADER_SIZE..)
        }
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(segment)?;
            if !is_dns(tcp.get_source(), tcp.get_destination()) {
                return None;
            }
            let data_offset = usize::from(tcp.get_data_offset()) * 4;
            let payload = segment.get(data_offset..)?;
            // Segments without data (handshakes, bare ACKs) carry no message.
            if payload.len() <= TCP_LENGTH_PREFIX {
                return None;
            }
            payload.get(TCP_LENGTH_PREFIX..)
        }
        _ => None,
    }
}

#[inline]
const fn is_dns(source: u16, destination: u16) -> bool {
    source == DNS_PORT || destination == DNS_PORT
}
