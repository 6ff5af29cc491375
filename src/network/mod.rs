//! Network-related modules for packet capture and link-layer decoding.

mod capture;
mod packet;

pub use capture::{
    BUFFER_SIZE_DECREMENT, CaptureDevice, CaptureStats, CaptureStopper, DNS_FILTER,
    MIN_BUFFER_SIZE, PacketSniffer, PcapDevice, READ_TIMEOUT, SNAPSHOT_LENGTH,
};
pub use packet::{CapturedPacket, DNS_PORT, FrameHeader, MAX_PACKET_SIZE, RawFrame, dns_payload};

#[cfg(test)]
pub(crate) use packet::tests::udp_ipv4_frame;
