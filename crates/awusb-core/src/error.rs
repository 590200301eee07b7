//! Error kinds surfaced by sessions, transfers and commands.

use thiserror::Error;

use crate::transport::TransportError;
use crate::usermem::BoundaryFault;

#[derive(Error, Debug)]
pub enum AwError {
    #[error("Device busy: session already open or device not present")]
    Busy,

    #[error("No device")]
    NoDevice,

    #[error("Could not find both bulk-in and bulk-out endpoints")]
    EndpointsUnavailable,

    #[error("Invalid length {length}: capacity is {capacity}")]
    InvalidArgument { length: i64, capacity: usize },

    #[error(transparent)]
    BoundaryFault(#[from] BoundaryFault),

    #[error("Timeout: {stalls} consecutive stalls")]
    Timeout { stalls: u32 },

    #[error("USB I/O error: {0}")]
    Io(#[source] TransportError),

    #[error("Interrupted")]
    Interrupted,

    #[error("Operation not supported")]
    Unsupported,

    #[error("Unknown command request 0x{0:08X}")]
    UnknownCommand(u32),

    #[error("Not enough memory for the {size}-byte {which} buffer")]
    OutOfMemory { which: &'static str, size: usize },
}

impl AwError {
    /// Linux errno equivalent, for character-device shims.
    pub fn errno(&self) -> i32 {
        match self {
            AwError::Busy => 16, // EBUSY
            AwError::NoDevice => 19, // ENODEV
            AwError::EndpointsUnavailable => 32, // EPIPE
            AwError::InvalidArgument { .. } => 22, // EINVAL
            AwError::BoundaryFault(_) => 14, // EFAULT
            AwError::Timeout { .. } => 62, // ETIME
            AwError::Io(_) => 5, // EIO
            AwError::Interrupted => 4, // EINTR
            AwError::Unsupported => 95, // EOPNOTSUPP
            AwError::UnknownCommand(_) => 25, // ENOTTY
            AwError::OutOfMemory { .. } => 12, // ENOMEM
        }
    }
}

pub type Result<T> = std::result::Result<T, AwError>;
