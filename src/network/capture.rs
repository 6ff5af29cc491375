//! Packet capture stage.
//!
//! Provides a trait-based abstraction over the native capture handle to enable:
//! - Testing without real network interfaces
//! - Enforcing the open / configure / activate / filter ordering in one place
//!
//! [`PacketSniffer`] owns exactly one [`CaptureDevice`]. Construction either
//! returns a fully activated and filtered sniffer or an error; dropping the
//! sniffer reports statistics and closes the handle.

use std::mem;
use std::time::Duration;

use pcap::{Active, Capture, Inactive};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::packet::{CapturedPacket, FrameHeader, RawFrame};
use crate::error::CaptureError;
use crate::metrics;
use crate::queue::{BoundedQueue, QueueFull};

/// Kernel filter selecting DNS over UDP and TCP.
pub const DNS_FILTER: &str = "port 53";

/// Snapshot length covering a full link MTU.
pub const SNAPSHOT_LENGTH: u32 = 65_535;

/// Smallest kernel buffer size accepted during negotiation.
pub const MIN_BUFFER_SIZE: u32 = 1024 * 1024;

/// Step by which a rejected kernel buffer size is reduced.
pub const BUFFER_SIZE_DECREMENT: u32 = 5 * 1024 * 1024;

/// Read timeout bounding how long the capture loop takes to notice a stop request.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Counters reported by the capture facility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames received by the filter.
    pub received: u32,
    /// Frames dropped because the kernel buffer was full.
    pub dropped: u32,
    /// Frames dropped by the interface or its driver.
    pub if_dropped: u32,
}

/// Trait for capture handle implementations.
///
/// Every `set_*` method except [`set_filter`](Self::set_filter) must be
/// called before [`activate`](Self::activate); implementations return
/// [`CaptureError::AlreadyActivated`] otherwise.
pub trait CaptureDevice: Send {
    fn set_buffer_size(&mut self, bytes: u32) -> Result<(), CaptureError>;

    fn set_snaplen(&mut self, bytes: u32) -> Result<(), CaptureError>;

    fn set_promisc(&mut self, enabled: bool) -> Result<(), CaptureError>;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), CaptureError>;

    /// Deliver each frame as soon as it arrives instead of batching in the kernel.
    fn set_immediate_mode(&mut self, enabled: bool) -> Result<(), CaptureError>;

    fn activate(&mut self) -> Result<(), CaptureError>;

    /// Compile and install a filter expression on the active handle.
    fn set_filter(&mut self, expression: &str) -> Result<(), CaptureError>;

    /// Wait up to the read timeout for the next frame.
    ///
    /// Returns `Ok(None)` when the timeout expires without traffic.
    fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError>;

    fn stats(&mut self) -> Result<CaptureStats, CaptureError>;
}

enum Handle {
    Inactive(Capture<Inactive>),
    Active(Capture<Active>),
    Closed,
}

/// Production capture handle backed by libpcap.
pub struct PcapDevice {
    handle: Handle,
}

impl PcapDevice {
    /// Open an inactive handle on the named interface.
    pub fn open(device: &str) -> Result<Self, CaptureError> {
        let capture = Capture::from_device(device).map_err(|e| CaptureError::Open {
            device: device.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            handle: Handle::Inactive(capture),
        })
    }

    fn configure(
        &mut self,
        step: &'static str,
        apply: impl FnOnce(Capture<Inactive>) -> Capture<Inactive>,
    ) -> Result<(), CaptureError> {
        match mem::replace(&mut self.handle, Handle::Closed) {
            Handle::Inactive(capture) => {
                self.handle = Handle::Inactive(apply(capture));
                Ok(())
            }
            other => {
                self.handle = other;
                Err(CaptureError::AlreadyActivated { step })
            }
        }
    }

    fn active(&mut self, step: &'static str) -> Result<&mut Capture<Active>, CaptureError> {
        match &mut self.handle {
            Handle::Active(capture) => Ok(capture),
            _ => Err(CaptureError::NotActivated { step }),
        }
    }
}

impl CaptureDevice for PcapDevice {
    fn set_buffer_size(&mut self, bytes: u32) -> Result<(), CaptureError> {
        let bytes = i32::try_from(bytes)
            .map_err(|_| CaptureError::Rejected(format!("buffer size {bytes} out of range")))?;
        self.configure("set buffer size", |capture| capture.buffer_size(bytes))
    }

    fn set_snaplen(&mut self, bytes: u32) -> Result<(), CaptureError> {
        let bytes = i32::try_from(bytes)
            .map_err(|_| CaptureError::Rejected(format!("snapshot length {bytes} out of range")))?;
        self.configure("set snapshot length", |capture| capture.snaplen(bytes))
    }

    fn set_promisc(&mut self, enabled: bool) -> Result<(), CaptureError> {
        self.configure("set promiscuous mode", |capture| capture.promisc(enabled))
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let millis = i32::try_from(timeout.as_millis())
            .map_err(|_| CaptureError::Rejected(format!("read timeout {timeout:?} out of range")))?;
        self.configure("set read timeout", |capture| capture.timeout(millis))
    }

    fn set_immediate_mode(&mut self, enabled: bool) -> Result<(), CaptureError> {
        self.configure("set immediate mode", |capture| capture.immediate_mode(enabled))
    }

    fn activate(&mut self) -> Result<(), CaptureError> {
        match mem::replace(&mut self.handle, Handle::Closed) {
            Handle::Inactive(capture) => {
                let active = capture
                    .open()
                    .map_err(|e| CaptureError::Activate(e.to_string()))?;
                self.handle = Handle::Active(active);
                Ok(())
            }
            other => {
                self.handle = other;
                Err(CaptureError::AlreadyActivated { step: "activate" })
            }
        }
    }

    fn set_filter(&mut self, expression: &str) -> Result<(), CaptureError> {
        self.active("install filter")?
            .filter(expression, true)
            .map_err(|e| CaptureError::Filter {
                expression: expression.to_owned(),
                reason: e.to_string(),
            })
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError> {
        match self.active("read packets")?.next_packet() {
            Ok(packet) => {
                let header = FrameHeader {
                    timestamp: timestamp(
                        i64::from(packet.header.ts.tv_sec),
                        i64::from(packet.header.ts.tv_usec),
                    ),
                    captured_len: packet.header.caplen,
                    original_len: packet.header.len,
                };
                Ok(Some(RawFrame {
                    header,
                    data: packet.data,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(CaptureError::Read(e.to_string())),
        }
    }

    fn stats(&mut self) -> Result<CaptureStats, CaptureError> {
        let stat = self
            .active("read statistics")?
            .stats()
            .map_err(|e| CaptureError::Stats(e.to_string()))?;

        Ok(CaptureStats {
            received: stat.received,
            dropped: stat.dropped,
            if_dropped: stat.if_dropped,
        })
    }
}

fn timestamp(seconds: i64, micros: i64) -> Duration {
    let seconds = u64::try_from(seconds).unwrap_or_default();
    let micros = u64::try_from(micros).unwrap_or_default();
    Duration::from_secs(seconds) + Duration::from_micros(micros)
}

/// Handle used to stop a running [`PacketSniffer`] from another thread.
#[derive(Clone, Debug)]
pub struct CaptureStopper {
    token: CancellationToken,
}

impl CaptureStopper {
    /// Request the capture loop to return. Never blocks.
    pub fn stop_capture(&self) {
        self.token.cancel();
    }
}

/// The packet capture stage.
pub struct PacketSniffer<D: CaptureDevice = PcapDevice> {
    device: D,
    buffer_size: u32,
    stop: CancellationToken,
}

impl PacketSniffer<PcapDevice> {
    /// Open, configure and activate a capture on `interface`.
    ///
    /// # Errors
    ///
    /// Every failure is fatal; see [`PacketSniffer::with_device`].
    pub fn open(interface: &str, buffer_size: u32) -> Result<Self, CaptureError> {
        let device = PcapDevice::open(interface)?;
        Self::with_device(device, buffer_size)
    }
}

impl<D: CaptureDevice> PacketSniffer<D> {
    /// Configure and activate an already opened device.
    ///
    /// The kernel buffer is negotiated starting at `buffer_size` and reduced by
    /// [`BUFFER_SIZE_DECREMENT`] on each rejection. Immediate mode is the only
    /// best-effort step.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::BufferSize`] if no size down to
    /// [`MIN_BUFFER_SIZE`] is accepted, or the device error of any other step.
    pub fn with_device(mut device: D, buffer_size: u32) -> Result<Self, CaptureError> {
        let buffer_size = negotiate_buffer_size(&mut device, buffer_size)?;
        device.set_snaplen(SNAPSHOT_LENGTH)?;
        device.set_promisc(true)?;
        device.set_timeout(READ_TIMEOUT)?;
        if let Err(e) = device.set_immediate_mode(true) {
            warn!(error = %e, "immediate mode not supported, continuing without it");
        }
        device.activate()?;
        device.set_filter(DNS_FILTER)?;

        info!(buffer_size, filter = DNS_FILTER, "capture handle activated");

        Ok(Self {
            device,
            buffer_size,
            stop: CancellationToken::new(),
        })
    }

    /// Replace the stop token, e.g. with a child of a pipeline-wide token.
    #[must_use]
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    /// Kernel buffer size accepted during negotiation.
    #[must_use]
    pub const fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    #[must_use]
    pub fn stopper(&self) -> CaptureStopper {
        CaptureStopper {
            token: self.stop.clone(),
        }
    }

    /// Run the capture loop, calling `on_frame` for every frame that passes the filter.
    ///
    /// Blocks until [`CaptureStopper::stop_capture`] is called or the device fails.
    pub fn start_capture<F>(&mut self, mut on_frame: F) -> Result<(), CaptureError>
    where
        F: FnMut(RawFrame<'_>),
    {
        debug!("capture loop started");
        while !self.stop.is_cancelled() {
            if let Some(frame) = self.device.next_frame()? {
                on_frame(frame);
            }
        }
        debug!("capture loop stopped");
        Ok(())
    }

    /// Run the capture loop, pushing a [`CapturedPacket`] per frame onto `queue`.
    ///
    /// Frames arriving while the queue is full are dropped and counted.
    pub fn capture_into(&mut self, queue: &BoundedQueue<CapturedPacket>) -> Result<(), CaptureError> {
        self.start_capture(|frame| {
            let packet = CapturedPacket::new(&frame.header, frame.data);
            match queue.try_push(packet) {
                Ok(()) => metrics::packet_captured(),
                Err(QueueFull(_)) => {
                    debug!("packet queue full, dropping frame");
                    metrics::packet_dropped();
                }
            }
        })
    }

    pub fn stats(&mut self) -> Result<CaptureStats, CaptureError> {
        self.device.stats()
    }
}

impl<D: CaptureDevice> Drop for PacketSniffer<D> {
    fn drop(&mut self) {
        match self.device.stats() {
            Ok(stats) => {
                info!(
                    received = stats.received,
                    dropped = stats.dropped,
                    if_dropped = stats.if_dropped,
                    "capture closed"
                );
                metrics::capture_stats(&stats);
            }
            Err(e) => debug!(error = %e, "capture statistics unavailable"),
        }
    }
}

fn negotiate_buffer_size<D: CaptureDevice>(
    device: &mut D,
    requested: u32,
) -> Result<u32, CaptureError> {
    let mut size = requested;
    loop {
        if size < MIN_BUFFER_SIZE {
            return Err(CaptureError::BufferSize {
                floor: MIN_BUFFER_SIZE,
            });
        }
        match device.set_buffer_size(size) {
            Ok(()) => return Ok(size),
            Err(e @ CaptureError::AlreadyActivated { .. }) => return Err(e),
            Err(e) => {
                debug!(size, error = %e, "buffer size rejected, retrying smaller");
                size = size.saturating_sub(BUFFER_SIZE_DECREMENT);
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Scripted capture device recording configuration calls.
    #[derive(Default)]
    pub struct MockDevice {
        pub max_buffer_size: Option<u32>,
        pub buffer_attempts: Vec<u32>,
        pub calls: Vec<&'static str>,
        pub activated: bool,
        pub fail_activate: bool,
        pub fail_filter: bool,
        pub fail_immediate: bool,
        pub filter: Option<String>,
        pub frames: VecDeque<Vec<u8>>,
        pub reads: Arc<AtomicUsize>,
        current: Vec<u8>,
    }

    impl MockDevice {
        fn pre_activation(&mut self, step: &'static str) -> Result<(), CaptureError> {
            if self.activated {
                return Err(CaptureError::AlreadyActivated { step });
            }
            self.calls.push(step);
            Ok(())
        }
    }

    impl CaptureDevice for MockDevice {
        fn set_buffer_size(&mut self, bytes: u32) -> Result<(), CaptureError> {
            self.pre_activation("set buffer size")?;
            self.buffer_attempts.push(bytes);
            match self.max_buffer_size {
                Some(max) if bytes > max => Err(CaptureError::Rejected("too large".into())),
                _ => Ok(()),
            }
        }

        fn set_snaplen(&mut self, _bytes: u32) -> Result<(), CaptureError> {
            self.pre_activation("set snapshot length")
        }

        fn set_promisc(&mut self, _enabled: bool) -> Result<(), CaptureError> {
            self.pre_activation("set promiscuous mode")
        }

        fn set_timeout(&mut self, _timeout: Duration) -> Result<(), CaptureError> {
            self.pre_activation("set read timeout")
        }

        fn set_immediate_mode(&mut self, _enabled: bool) -> Result<(), CaptureError> {
            self.pre_activation("set immediate mode")?;
            if self.fail_immediate {
                return Err(CaptureError::Rejected("unsupported".into()));
            }
            Ok(())
        }

        fn activate(&mut self) -> Result<(), CaptureError> {
            self.pre_activation("activate")?;
            if self.fail_activate {
                return Err(CaptureError::Activate("permission denied".into()));
            }
            self.activated = true;
            Ok(())
        }

        fn set_filter(&mut self, expression: &str) -> Result<(), CaptureError> {
            if !self.activated {
                return Err(CaptureError::NotActivated {
                    step: "install filter",
                });
            }
            if self.fail_filter {
                return Err(CaptureError::Filter {
                    expression: expression.to_owned(),
                    reason: "syntax error".into(),
                });
            }
            self.calls.push("install filter");
            self.filter = Some(expression.to_owned());
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.frames.pop_front() {
                Some(frame) => {
                    self.current = frame;
                    let len = u32::try_from(self.current.len()).unwrap();
                    Ok(Some(RawFrame {
                        header: FrameHeader {
                            timestamp: Duration::from_secs(1_700_000_000),
                            captured_len: len,
                            original_len: len,
                        },
                        data: &self.current,
                    }))
                }
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
            }
        }

        fn stats(&mut self) -> Result<CaptureStats, CaptureError> {
            if !self.activated {
                return Err(CaptureError::NotActivated {
                    step: "read statistics",
                });
            }
            Ok(CaptureStats {
                received: 3,
                dropped: 1,
                if_dropped: 0,
            })
        }
    }

    #[test]
    fn should_configure_in_order_and_install_dns_filter() {
        let sniffer = PacketSniffer::with_device(MockDevice::default(), 8 * 1024 * 1024).unwrap();

        assert_eq!(
            sniffer.device.calls,
            vec![
                "set buffer size",
                "set snapshot length",
                "set promiscuous mode",
                "set read timeout",
                "set immediate mode",
                "activate",
                "install filter",
            ]
        );
        assert_eq!(sniffer.device.filter.as_deref(), Some(DNS_FILTER));
        assert_eq!(sniffer.buffer_size(), 8 * 1024 * 1024);
    }

    #[test]
    fn should_degrade_buffer_size_until_accepted() {
        let device = MockDevice {
            max_buffer_size: Some(12 * 1024 * 1024),
            ..Default::default()
        };
        let sniffer = PacketSniffer::with_device(device, 20 * 1024 * 1024).unwrap();

        assert_eq!(
            sniffer.device.buffer_attempts,
            vec![20 * 1024 * 1024, 15 * 1024 * 1024, 10 * 1024 * 1024]
        );
        assert_eq!(sniffer.buffer_size(), 10 * 1024 * 1024);
    }

    #[test]
    fn should_fail_when_floor_is_rejected() {
        let device = MockDevice {
            max_buffer_size: Some(MIN_BUFFER_SIZE - 1),
            ..Default::default()
        };
        let result = PacketSniffer::with_device(device, 11 * 1024 * 1024);

        assert!(matches!(
            result,
            Err(CaptureError::BufferSize {
                floor: MIN_BUFFER_SIZE
            })
        ));
    }

    #[test]
    fn should_fail_when_requested_size_below_floor() {
        let result = PacketSniffer::with_device(MockDevice::default(), 4096);
        assert!(matches!(result, Err(CaptureError::BufferSize { .. })));
    }

    #[test]
    fn should_continue_without_immediate_mode() {
        let device = MockDevice {
            fail_immediate: true,
            ..Default::default()
        };
        let sniffer = PacketSniffer::with_device(device, MIN_BUFFER_SIZE).unwrap();
        assert!(sniffer.device.activated);
    }

    #[test]
    fn should_fail_on_activation_error() {
        let device = MockDevice {
            fail_activate: true,
            ..Default::default()
        };
        let result = PacketSniffer::with_device(device, MIN_BUFFER_SIZE);
        assert!(matches!(result, Err(CaptureError::Activate(_))));
    }

    #[test]
    fn should_fail_on_filter_error() {
        let device = MockDevice {
            fail_filter: true,
            ..Default::default()
        };
        let result = PacketSniffer::with_device(device, MIN_BUFFER_SIZE);
        assert!(matches!(result, Err(CaptureError::Filter { .. })));
    }

    #[test]
    fn should_reject_configuration_after_activation() {
        let mut sniffer = PacketSniffer::with_device(MockDevice::default(), MIN_BUFFER_SIZE).unwrap();

        let result = sniffer.device.set_snaplen(1500);
        assert!(matches!(
            result,
            Err(CaptureError::AlreadyActivated {
                step: "set snapshot length"
            })
        ));
        assert!(matches!(
            negotiate_buffer_size(&mut sniffer.device, 64 * 1024 * 1024),
            Err(CaptureError::AlreadyActivated { .. })
        ));
    }

    #[test]
    fn should_push_frames_until_stopped() {
        let reads = Arc::new(AtomicUsize::new(0));
        let device = MockDevice {
            frames: VecDeque::from(vec![vec![1, 2, 3], vec![4, 5]]),
            reads: Arc::clone(&reads),
            ..Default::default()
        };
        let mut sniffer = PacketSniffer::with_device(device, MIN_BUFFER_SIZE).unwrap();
        let stopper = sniffer.stopper();
        let queue = BoundedQueue::new(8);
        let consumer = queue.clone();

        let handle = thread::spawn(move || {
            sniffer.capture_into(&queue).unwrap();
            sniffer.stats().unwrap()
        });

        let first = consumer.pop_timeout(Duration::from_secs(2)).unwrap();
        let second = consumer.pop_timeout(Duration::from_secs(2)).unwrap();
        stopper.stop_capture();
        let stats = handle.join().unwrap();

        assert_eq!(first.payload(), &[1, 2, 3]);
        assert_eq!(second.payload(), &[4, 5]);
        assert_eq!(stats.received, 3);
        assert!(reads.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn should_drop_frames_when_queue_is_full() {
        let device = MockDevice {
            frames: VecDeque::from(vec![vec![1], vec![2], vec![3]]),
            ..Default::default()
        };
        let mut sniffer = PacketSniffer::with_device(device, MIN_BUFFER_SIZE).unwrap();
        let stopper = sniffer.stopper();
        let queue = BoundedQueue::new(1);
        let consumer = queue.clone();

        let handle = thread::spawn(move || sniffer.capture_into(&queue));
        thread::sleep(Duration::from_millis(50));
        stopper.stop_capture();
        handle.join().unwrap().unwrap();

        assert_eq!(consumer.try_pop().map(|p| p.payload().to_vec()), Some(vec![1]));
        assert!(consumer.try_pop().is_none());
    }

    #[test]
    fn should_return_immediately_when_already_stopped() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sniffer = PacketSniffer::with_device(MockDevice::default(), MIN_BUFFER_SIZE)
            .unwrap()
            .with_stop_token(token);

        let mut frames = 0;
        sniffer.start_capture(|_| frames += 1).unwrap();
        assert_eq!(frames, 0);
    }

    #[test]
    fn should_convert_timeval_to_duration() {
        assert_eq!(timestamp(5, 250_000), Duration::from_millis(5250));
        assert_eq!(timestamp(-1, 0), Duration::ZERO);
    }
}
