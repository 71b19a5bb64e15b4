//! can-bus: raw SocketCAN transport with background reception
//!
//! This crate opens a raw CAN socket bound to a named interface, transmits
//! frames without blocking, and collects received frames on a dedicated
//! background thread, each paired with a monotonic arrival timestamp, for
//! later draining by application code. Payloads are carried opaquely; no
//! protocol semantics live here.
//!
//! The default build enables a `mock` loopback backend so the full
//! write/receive/drain path runs on hosts without CAN hardware.

mod types;
pub use types::{CanFrame, CanId, TimestampedFrame};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{FrameSink, Transport};

pub mod wire;

#[cfg(target_os = "linux")]
mod socket;
#[cfg(target_os = "linux")]
pub use socket::RawCanSocket;

mod buffer;
pub use buffer::FrameBuffer;

mod receiver;
pub use receiver::ReceiverLoop;

mod bus;
pub use bus::CanBus;

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockOp, MockTransport};
