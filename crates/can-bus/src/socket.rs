//! Raw SocketCAN transport bound to one named interface.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::wire;
use crate::{CanFrame, Result, Transport, TransportError};

/// Descriptor sentinel for a closed socket.
const CLOSED: i32 = -1;

/// A raw CAN socket bound to a single named interface (e.g. `"can0"`).
///
/// The descriptor is shared between foreground senders and the background
/// receiver. `close` swaps in a sentinel, so closing twice is a no-op; the
/// bus facade guarantees the receiver has stopped before the descriptor is
/// actually closed.
pub struct RawCanSocket {
    fd: AtomicI32,
    interface: String,
}

impl RawCanSocket {
    /// Open a raw CAN socket and bind it to `interface`.
    ///
    /// Creates the socket, resolves the interface name to its kernel index,
    /// binds, and switches the descriptor to non-blocking mode. Any step
    /// failing closes whatever was partially created and returns the error;
    /// the caller decides whether to retry.
    pub fn open(interface: &str) -> Result<Self> {
        let fd = unsafe { libc::socket(libc::PF_CAN, libc::SOCK_RAW, libc::CAN_RAW) };
        if fd < 0 {
            return Err(TransportError::SocketCreate(io::Error::last_os_error()));
        }

        let index = match interface_index(fd, interface) {
            Ok(index) => index,
            Err(err) => {
                unsafe { libc::close(fd) };
                return Err(err);
            }
        };

        let mut addr: libc::sockaddr_can = unsafe { std::mem::zeroed() };
        addr.can_family = libc::AF_CAN as libc::sa_family_t;
        addr.can_ifindex = index;
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let source = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Bind {
                interface: interface.to_string(),
                source,
            });
        }

        if let Err(err) = set_nonblocking(fd) {
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        debug!(interface, fd, "bound raw CAN socket");
        Ok(Self {
            fd: AtomicI32::new(fd),
            interface: interface.to_string(),
        })
    }

    /// Name of the interface this socket is bound to.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn fd(&self) -> Option<RawFd> {
        let fd = self.fd.load(Ordering::Acquire);
        (fd != CLOSED).then_some(fd)
    }
}

impl Transport for RawCanSocket {
    fn is_open(&self) -> bool {
        self.fd.load(Ordering::Acquire) != CLOSED
    }

    fn send(&self, frame: &CanFrame) -> Result<()> {
        let Some(fd) = self.fd() else {
            warn!(interface = %self.interface, "unable to write: socket not open");
            return Err(TransportError::NotOpen);
        };
        let record = wire::encode(frame);
        let n = unsafe { libc::write(fd, record.as_ptr() as *const libc::c_void, record.len()) };
        if n == record.len() as isize {
            trace!(id = %frame.id, len = frame.len, "frame sent");
            return Ok(());
        }
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::ENOBUFS) => {
                    warn!(interface = %self.interface, "transmit queue full, frame dropped");
                    Err(TransportError::TxQueueFull)
                }
                _ => Err(TransportError::Io(err)),
            };
        }
        // The kernel sends raw CAN records whole; anything else is an error.
        Err(TransportError::Io(io::Error::new(
            io::ErrorKind::WriteZero,
            "partial frame write",
        )))
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        let Some(fd) = self.fd() else {
            return Err(TransportError::NotOpen);
        };
        let mut fds = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        loop {
            let rc = unsafe { libc::poll(&mut fds, 1, millis) };
            if rc > 0 {
                return Ok(fds.revents != 0);
            }
            if rc == 0 {
                return Ok(false);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Io(err));
        }
    }

    fn try_recv(&self) -> Result<Option<CanFrame>> {
        let Some(fd) = self.fd() else {
            return Err(TransportError::NotOpen);
        };
        let mut record = [0u8; wire::RECORD_LEN];
        let n = unsafe { libc::read(fd, record.as_mut_ptr() as *mut libc::c_void, record.len()) };
        if n == wire::RECORD_LEN as isize {
            return wire::decode(&record).map(Some);
        }
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(TransportError::Io(err));
        }
        // Short read: transient, drop the bytes and carry on.
        warn!(interface = %self.interface, n, "short read on CAN socket");
        Ok(None)
    }

    fn close(&self) {
        let fd = self.fd.swap(CLOSED, Ordering::AcqRel);
        if fd == CLOSED {
            return;
        }
        unsafe { libc::close(fd) };
        debug!(interface = %self.interface, "CAN socket closed");
    }
}

impl Drop for RawCanSocket {
    fn drop(&mut self) {
        self.close();
    }
}

fn interface_index(fd: RawFd, interface: &str) -> Result<libc::c_int> {
    if interface.is_empty() || interface.len() >= libc::IFNAMSIZ {
        return Err(TransportError::InterfaceNotFound {
            interface: interface.to_string(),
            source: io::Error::from(io::ErrorKind::InvalidInput),
        });
    }
    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(interface.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    let rc = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut req) };
    if rc < 0 {
        return Err(TransportError::InterfaceNotFound {
            interface: interface.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(unsafe { req.ifr_ifru.ifru_ifindex })
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
