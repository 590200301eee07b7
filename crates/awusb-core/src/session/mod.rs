//! Device sessions - attach/detach lifecycle and the single open session.

mod buffers;
mod device;
mod registry;

use std::fmt;

pub use buffers::TransferBuffers;
pub use device::{Device, OpenEndpoints, Session};
pub use registry::DeviceRegistry;

/// Bus identity of an attached device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
