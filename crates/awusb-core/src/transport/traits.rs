//! USB Transport layer abstraction.
//!
//! Defines the `BulkTransport` and `EndpointProvider` traits the session
//! needs from an attached device, allowing different implementations
//! (nusb, mock, etc.).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Failed to claim endpoint 0x{address:02X}: {message}")]
    ClaimEndpointFailed { address: u8, message: String },

    #[error("Endpoint stalled")]
    Stall,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("No more data")]
    EndOfStream,

    #[error("Device status {0}")]
    Status(u32),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Transfer failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Transient "not ready" conditions that warrant a bounded retry.
    pub fn is_stall(&self) -> bool {
        matches!(self, TransportError::Stall | TransportError::Timeout { .. })
    }
}

/// Bulk endpoint addresses of an attached device.
///
/// An address of `0` means the endpoint was not found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointInfo {
    pub bulk_in: u8,
    pub bulk_out: u8,
    /// Preferred upper bound for one bulk-in request; `0` means no preference.
    pub in_capacity_hint: usize,
}

impl EndpointInfo {
    pub fn is_complete(&self) -> bool {
        self.bulk_in != 0 && self.bulk_out != 0
    }
}

/// Locates the bulk endpoints of an attached device.
pub trait EndpointProvider: Send + Sync {
    fn discover_endpoints(&self) -> Result<EndpointInfo, TransportError>;
}

/// Raw bulk transfers against an attached device.
///
/// Every call is a single bounded attempt; retry policy belongs to the caller.
pub trait BulkTransport: Send + Sync {
    /// Send `data` to `endpoint`. Returns the number of bytes the device
    /// accepted, which may be fewer than `data.len()`.
    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// Receive up to `buf.len()` bytes from `endpoint` into `buf`.
    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration)
    -> Result<usize, TransportError>;
}

/// A device handle: something that can both locate and drive bulk endpoints.
pub trait UsbHandle: BulkTransport + EndpointProvider {}

impl<T: BulkTransport + EndpointProvider> UsbHandle for T {}
