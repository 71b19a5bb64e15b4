use std::io;
use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to create a CAN socket: {0}")]
    SocketCreate(#[source] io::Error),
    #[error("unable to select CAN interface {interface}: {source}")]
    InterfaceNotFound {
        interface: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind socket to {interface}: {source}")]
    Bind {
        interface: String,
        #[source]
        source: io::Error,
    },
    #[error("socket not open")]
    NotOpen,
    #[error("transmit queue full")]
    TxQueueFull,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
}

impl TransportError {
    /// Setup failures are recoverable by retrying `open`.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::SocketCreate(_) | Self::InterfaceNotFound { .. } | Self::Bind { .. }
        )
    }

    /// Transient conditions leave the transport in its previous state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TxQueueFull | Self::InvalidFrame(_))
    }
}
