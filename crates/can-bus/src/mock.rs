//! In-process loopback transport for tests and hardware-free development.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::{CanFrame, Result, Transport, TransportError};

/// Operations the mock records, in call order. Used by shutdown-sequence
/// tests to prove nothing touches the transport after `Close`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MockOp {
    Send,
    Recv,
    Close,
}

#[derive(Default)]
struct Shared {
    queue: VecDeque<CanFrame>,
    closed: bool,
    ops: Vec<MockOp>,
}

/// Loopback transport: every frame sent (or injected) is queued on the
/// receive side of the same instance.
#[derive(Default)]
pub struct MockTransport {
    shared: Mutex<Shared>,
    readable: Condvar,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame on the receive side without going through `send`.
    pub fn inject(&self, frame: CanFrame) {
        let mut shared = self.lock();
        shared.queue.push_back(frame);
        self.readable.notify_all();
    }

    /// Calls recorded so far, in order.
    pub fn ops(&self) -> Vec<MockOp> {
        self.lock().ops.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        !self.lock().closed
    }

    fn send(&self, frame: &CanFrame) -> Result<()> {
        let mut shared = self.lock();
        if shared.closed {
            return Err(TransportError::NotOpen);
        }
        shared.ops.push(MockOp::Send);
        shared.queue.push_back(*frame);
        self.readable.notify_all();
        Ok(())
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.lock();
        loop {
            if shared.closed {
                return Err(TransportError::NotOpen);
            }
            if !shared.queue.is_empty() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .readable
                .wait_timeout(shared, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            shared = guard;
        }
    }

    fn try_recv(&self) -> Result<Option<CanFrame>> {
        let mut shared = self.lock();
        if shared.closed {
            return Err(TransportError::NotOpen);
        }
        let frame = shared.queue.pop_front();
        if frame.is_some() {
            shared.ops.push(MockOp::Recv);
        }
        Ok(frame)
    }

    fn close(&self) {
        let mut shared = self.lock();
        if !shared.closed {
            shared.closed = true;
            shared.ops.push(MockOp::Close);
        }
        // Wake anyone parked in poll_readable so they observe the close.
        self.readable.notify_all();
    }
}
