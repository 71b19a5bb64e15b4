//! The bus facade: transport, receiver loop, and frame buffer behind one
//! handle.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, trace};

use crate::buffer::FrameBuffer;
use crate::receiver::ReceiverLoop;
use crate::{CanFrame, Result, TimestampedFrame, Transport};

#[cfg(target_os = "linux")]
use crate::socket::RawCanSocket;

/// Pause between open attempts while waiting for the interface to appear.
const RETRY_DELAY: Duration = Duration::from_micros(500);

/// A connected CAN bus: write frames out, drain received frames.
///
/// Owns the transport, the single receiver loop feeding the buffer, and the
/// buffer itself. Shutdown stops the loop before the transport closes, so
/// the loop never polls a dead descriptor.
pub struct CanBus<T: Transport> {
    transport: Arc<T>,
    buffer: Arc<FrameBuffer>,
    receiver: Option<ReceiverLoop>,
}

#[cfg(target_os = "linux")]
impl CanBus<RawCanSocket> {
    /// Connect to `interface`, retrying until the device is available.
    ///
    /// There is no retry limit: in deployments where the interface comes up
    /// after the process, this blocks until the bus appears. Use
    /// [`connect_deadline`](CanBus::connect_deadline) when the wait must be
    /// bounded.
    pub fn connect(interface: &str) -> Result<Self> {
        let socket = loop {
            match RawCanSocket::open(interface) {
                Ok(socket) => break socket,
                Err(err) => {
                    trace!(interface, %err, "open failed, retrying");
                    thread::sleep(RETRY_DELAY);
                }
            }
        };
        info!(interface, "connected");
        Self::with_transport(socket)
    }

    /// Connect with a bounded wait, giving up with the last open error once
    /// `deadline` has elapsed.
    pub fn connect_deadline(interface: &str, deadline: Duration) -> Result<Self> {
        let give_up = Instant::now() + deadline;
        let socket = loop {
            match RawCanSocket::open(interface) {
                Ok(socket) => break socket,
                Err(err) if Instant::now() >= give_up => return Err(err),
                Err(err) => {
                    trace!(interface, %err, "open failed, retrying");
                    thread::sleep(RETRY_DELAY);
                }
            }
        };
        info!(interface, "connected");
        Self::with_transport(socket)
    }
}

impl<T: Transport> CanBus<T> {
    /// Build a bus over an already-open transport and start its receiver.
    ///
    /// The transport is owned exclusively from here on, which is what
    /// guarantees a single receiver loop per transport.
    pub fn with_transport(transport: T) -> Result<Self> {
        let transport = Arc::new(transport);
        let buffer = Arc::new(FrameBuffer::new());
        let receiver = ReceiverLoop::spawn(Arc::clone(&transport), Arc::clone(&buffer))?;
        Ok(Self {
            transport,
            buffer,
            receiver: Some(receiver),
        })
    }

    /// Send one frame; best-effort, non-retrying. A full transmit queue or a
    /// closed transport is reported to the caller, who owns retry policy.
    pub fn write(&self, frame: &CanFrame) -> Result<()> {
        self.transport.send(frame)
    }

    /// Take every frame received since the previous drain, oldest first.
    pub fn drain(&self) -> Vec<TimestampedFrame> {
        self.buffer.drain()
    }

    /// True while the underlying transport is open.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Stop the receiver, then close the transport. Idempotent.
    ///
    /// The receiver is joined before the descriptor is closed; the order is
    /// load-bearing.
    pub fn shutdown(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
        }
        self.transport.close();
    }
}

impl<T: Transport> Drop for CanBus<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::{CanId, MockOp, MockTransport, TransportError};

    fn frame(id11: u16, data: &[u8]) -> CanFrame {
        let id = CanId::standard(id11).expect("valid id");
        CanFrame::new(id, data).expect("valid frame")
    }

    fn drain_until<T: Transport>(bus: &CanBus<T>, count: usize) -> Vec<TimestampedFrame> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            seen.extend(bus.drain());
            thread::yield_now();
        }
        seen
    }

    #[test]
    fn written_frame_comes_back_in_exactly_one_drain() {
        let bus = CanBus::with_transport(MockTransport::new()).expect("bus");
        let sent = frame(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let before = Instant::now();
        bus.write(&sent).expect("write succeeds");

        let seen = drain_until(&bus, 1);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].frame, sent);
        assert!(seen[0].stamp >= before);

        // Nothing new: the next drain is empty.
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let bus = CanBus::with_transport(MockTransport::new()).expect("bus");
        for tag in 0..20u8 {
            bus.write(&frame(0x200, &[tag])).expect("write succeeds");
        }
        let seen = drain_until(&bus, 20);
        let tags: Vec<u8> = seen.iter().map(|t| t.frame.data[0]).collect();
        assert_eq!(tags, (0..20u8).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_writers_never_corrupt_frames() {
        let bus = Arc::new(CanBus::with_transport(MockTransport::new()).expect("bus"));
        let writers: Vec<_> = (0..4u16)
            .map(|writer| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for tag in 0..25u8 {
                        bus.write(&frame(0x300 + writer, &[writer as u8, tag]))
                            .expect("write succeeds");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread panicked");
        }

        let seen = drain_until(&bus, 100);
        assert_eq!(seen.len(), 100);
        for stamped in &seen {
            // Each drained frame matches one written frame byte for byte.
            let writer = stamped.frame.data[0] as u16;
            assert_eq!(stamped.frame.id.raw(), (0x300 + writer) as u32);
            assert_eq!(stamped.frame.len, 2);
        }
    }

    #[test]
    fn shutdown_stops_the_receiver_before_closing() {
        let mut bus = CanBus::with_transport(MockTransport::new()).expect("bus");
        bus.write(&frame(0x10, &[9])).expect("write succeeds");
        drain_until(&bus, 1);

        bus.shutdown();
        assert!(!bus.is_open());

        let ops = bus.transport().ops();
        // Exactly one close, and it is the final operation: nothing touched
        // the transport afterwards.
        assert_eq!(ops.iter().filter(|op| **op == MockOp::Close).count(), 1);
        assert_eq!(ops.last(), Some(&MockOp::Close));

        // Shutdown twice is a no-op.
        bus.shutdown();
        assert_eq!(bus.transport().ops().last(), Some(&MockOp::Close));
    }

    #[test]
    fn rapid_start_write_stop_cycles_do_not_deadlock() {
        for cycle in 0..5u8 {
            let mut bus = CanBus::with_transport(MockTransport::new()).expect("bus");
            bus.write(&frame(0x77, &[cycle])).expect("write succeeds");
            bus.shutdown();
            assert_eq!(bus.transport().ops().last(), Some(&MockOp::Close));
        }
    }

    #[test]
    fn write_after_shutdown_reports_not_open() {
        let mut bus = CanBus::with_transport(MockTransport::new()).expect("bus");
        bus.shutdown();
        assert!(matches!(
            bus.write(&frame(0x1, &[])),
            Err(TransportError::NotOpen)
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn connect_deadline_gives_up_on_a_missing_interface() {
        let start = Instant::now();
        let result = CanBus::connect_deadline("can-does-not-exist0", Duration::from_millis(50));
        let err = match result {
            Err(err) => err,
            Ok(_) => panic!("connected to a missing interface"),
        };
        assert!(err.is_setup(), "unexpected error: {err}");
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
