use std::time::{Duration, Instant};

use crate::{CanFrame, Result};

/// A minimal CAN transport bound to one interface, exchanging whole frames.
///
/// One instance is shared between foreground senders and the single
/// background receiver, so every method takes `&self`.
pub trait Transport: Send + Sync + 'static {
    /// True while the underlying device is open.
    fn is_open(&self) -> bool;

    /// Send exactly one frame without blocking or retrying. A full transmit
    /// queue is reported, not waited out; the caller owns retry policy.
    fn send(&self, frame: &CanFrame) -> Result<()>;

    /// Wait up to `timeout` for the receive side to become readable.
    /// Returns `Ok(false)` on timeout.
    fn poll_readable(&self, timeout: Duration) -> Result<bool>;

    /// Read exactly one frame if one is available right now. Short or
    /// would-block reads yield `Ok(None)`.
    fn try_recv(&self) -> Result<Option<CanFrame>>;

    /// Close the underlying device. Idempotent.
    fn close(&self);
}

/// Destination for frames read by the receiver loop.
///
/// The hand-off is synchronous: the loop does not poll for the next frame
/// until `accept` returns, so a slow sink back-pressures reception directly.
/// Implementations must keep their critical section short.
pub trait FrameSink: Send + Sync + 'static {
    fn accept(&self, frame: CanFrame, stamp: Instant);
}
