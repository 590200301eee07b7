//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockStep, MockTransport};
pub use nusb::NusbTransport;
pub use traits::{BulkTransport, EndpointInfo, EndpointProvider, TransportError, UsbHandle};
