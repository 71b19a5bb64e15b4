//! Background reception loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::{FrameSink, Transport, TransportError};

/// How long one poll waits before the loop re-checks its stop flag. Bounds
/// shutdown latency on a silent bus without interrupting the socket.
pub(crate) const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Flags shared between the loop thread and the handle that stops it.
#[derive(Default)]
struct ReceptionState {
    stop: AtomicBool,
    running: AtomicBool,
}

/// Handle to the single background receiver of one transport.
///
/// The loop polls the transport with a bounded timeout, reads exactly one
/// frame per readable wakeup, stamps it, and hands it synchronously to the
/// sink (see [`FrameSink`] for the back-pressure contract). At most one loop
/// may exist per transport; the bus facade enforces this by owning both.
pub struct ReceiverLoop {
    state: Arc<ReceptionState>,
    thread: Option<JoinHandle<()>>,
}

impl ReceiverLoop {
    /// Spawn the receiver thread over `transport`, feeding `sink`.
    pub fn spawn<T, S>(transport: Arc<T>, sink: Arc<S>) -> crate::Result<Self>
    where
        T: Transport,
        S: FrameSink,
    {
        let state = Arc::new(ReceptionState::default());
        let loop_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("can-receiver".into())
            .spawn(move || run(transport, sink, loop_state))
            .map_err(TransportError::Io)?;
        Ok(Self {
            state,
            thread: Some(thread),
        })
    }

    /// True between the thread's startup and its exit.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Request termination and block until the loop has fully exited.
    ///
    /// Joining the thread replaces a flag-polling spin: the call returns only
    /// once the loop is out of its poll/read cycle, bounded by one poll
    /// timeout plus whatever the sink is currently doing. After `stop`
    /// returns it is safe to close the transport.
    pub fn stop(&mut self) {
        self.state.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("receiver thread panicked before exit");
            }
        }
    }
}

impl Drop for ReceiverLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<T: Transport, S: FrameSink>(transport: Arc<T>, sink: Arc<S>, state: Arc<ReceptionState>) {
    state.running.store(true, Ordering::Release);
    debug!("receiver loop running");
    while !state.stop.load(Ordering::Acquire) {
        match transport.poll_readable(POLL_TIMEOUT) {
            Ok(true) => match transport.try_recv() {
                Ok(Some(frame)) => {
                    let stamp = Instant::now();
                    trace!(id = %frame.id, len = frame.len, "frame received");
                    sink.accept(frame, stamp);
                }
                // Readable but nothing usable (short or would-block read):
                // transient, keep polling.
                Ok(None) => {}
                Err(err) => warn!(%err, "receive failed"),
            },
            // Timeout tick; loop around and re-check the stop flag.
            Ok(false) => {}
            Err(TransportError::NotOpen) => {
                warn!("transport closed underneath the receiver, stopping");
                break;
            }
            Err(err) => {
                warn!(%err, "poll failed");
                thread::sleep(POLL_TIMEOUT);
            }
        }
    }
    state.running.store(false, Ordering::Release);
    debug!("receiver loop stopped");
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::{CanFrame, CanId, FrameBuffer, MockTransport};

    fn frame(tag: u8) -> CanFrame {
        let id = CanId::standard(0x321).expect("valid id");
        CanFrame::new(id, &[tag]).expect("valid frame")
    }

    fn drain_until(buffer: &FrameBuffer, count: usize) -> Vec<crate::TimestampedFrame> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            seen.extend(buffer.drain());
            thread::yield_now();
        }
        seen
    }

    #[test]
    fn received_frames_reach_the_sink_in_order() {
        let transport = Arc::new(MockTransport::new());
        let buffer = Arc::new(FrameBuffer::new());
        let mut receiver =
            ReceiverLoop::spawn(Arc::clone(&transport), Arc::clone(&buffer)).expect("spawn");

        for tag in 0..10u8 {
            transport.inject(frame(tag));
        }
        let seen = drain_until(&buffer, 10);
        let tags: Vec<u8> = seen.iter().map(|t| t.frame.data[0]).collect();
        assert_eq!(tags, (0..10u8).collect::<Vec<_>>());

        receiver.stop();
        assert!(!receiver.is_running());
    }

    #[test]
    fn stop_returns_within_one_poll_timeout_on_a_silent_bus() {
        let transport = Arc::new(MockTransport::new());
        let buffer = Arc::new(FrameBuffer::new());
        let mut receiver =
            ReceiverLoop::spawn(Arc::clone(&transport), Arc::clone(&buffer)).expect("spawn");

        let start = Instant::now();
        receiver.stop();
        assert!(start.elapsed() < POLL_TIMEOUT + Duration::from_secs(1));
        assert!(!receiver.is_running());
    }

    #[test]
    fn stop_twice_is_harmless() {
        let transport = Arc::new(MockTransport::new());
        let buffer = Arc::new(FrameBuffer::new());
        let mut receiver =
            ReceiverLoop::spawn(transport, buffer).expect("spawn");
        receiver.stop();
        receiver.stop();
    }

    #[test]
    fn closed_transport_terminates_the_loop() {
        let transport = Arc::new(MockTransport::new());
        let buffer = Arc::new(FrameBuffer::new());
        let mut receiver =
            ReceiverLoop::spawn(Arc::clone(&transport), buffer).expect("spawn");

        // Closing wakes the poll; the loop must exit on its own.
        transport.close();
        let deadline = Instant::now() + Duration::from_secs(5);
        while receiver.is_running() {
            assert!(Instant::now() < deadline, "loop did not observe the close");
            thread::yield_now();
        }
        receiver.stop();
    }
}
