//! Packet filter stage: captured frames in, DNS responses out.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DnsInfo, parse_dns_response};
use crate::metrics;
use crate::network::{CapturedPacket, dns_payload};
use crate::queue::{BoundedQueue, QueueFull};

/// Drains captured packets and forwards parsed DNS responses.
pub struct PacketFilter {
    packets: BoundedQueue<CapturedPacket>,
    responses: BoundedQueue<DnsInfo>,
    poll_interval: Duration,
}

impl PacketFilter {
    pub fn new(
        packets: BoundedQueue<CapturedPacket>,
        responses: BoundedQueue<DnsInfo>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            packets,
            responses,
            poll_interval,
        }
    }

    /// Run until `token` is cancelled.
    ///
    /// Packets still queued at cancellation are left unprocessed.
    pub fn run(&self, token: &CancellationToken) {
        info!("packet filter started");
        while !token.is_cancelled() {
            if let Some(packet) = self.packets.pop_timeout(self.poll_interval) {
                self.process(&packet);
            }
        }
        info!("packet filter stopped");
    }

    /// Parse one packet and forward it if it is a DNS response.
    ///
    /// Returns `true` when a record was pushed onto the output queue.
    pub fn process(&self, packet: &CapturedPacket) -> bool {
        let Some(info) = dns_payload(packet.payload()).and_then(parse_dns_response) else {
            if packet.is_truncated() {
                debug!(
                    captured = packet.captured_len(),
                    original = packet.original_len(),
                    "truncated frame skipped"
                );
            }
            return false;
        };

        metrics::dns_response();
        match self.responses.try_push(info) {
            Ok(()) => true,
            Err(QueueFull(info)) => {
                debug!(domains = info.domains().len(), "dns queue full, dropping record");
                metrics::dns_record_dropped();
                false
            }
        }
    }
}
