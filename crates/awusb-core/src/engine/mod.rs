//! Transfer engine - chunked, stall-tolerant bulk streams.
//!
//! Both directions run entirely under the session lock: the caller hands in
//! a [`Link`] built from the locked device state plus the buffer to stage
//! through, and gets back the number of bytes that actually crossed the bus.

mod read;
mod retry;
mod write;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::EngineConfig;
use crate::error::{AwError, Result};
use crate::events::{TransferEvent, TransferObserver};
use crate::session::OpenEndpoints;
use crate::transport::{TransportError, UsbHandle};

pub(crate) use read::read_stream;
pub use retry::{Attempt, Next, RetryPolicy, RetryState};
pub(crate) use write::write_stream;

/// Everything a transfer borrows from the locked device.
pub(crate) struct Link<'a> {
    pub handle: &'a dyn UsbHandle,
    pub endpoints: &'a OpenEndpoints,
    pub present: &'a AtomicBool,
    pub config: &'a EngineConfig,
    pub observer: &'a dyn TransferObserver,
}

impl Link<'_> {
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: TransferEvent) {
        self.observer.on_event(&event);
    }
}

/// Map an unrecoverable transport failure onto the caller-visible kind.
pub(crate) fn fatal(err: TransportError) -> AwError {
    match err {
        TransportError::Disconnected => AwError::NoDevice,
        other => AwError::Io(other),
    }
}

/// Outcome of an interrupted transfer: the bytes already moved, if any.
pub(crate) fn interrupted(done: usize) -> Result<usize> {
    if done > 0 {
        Ok(done)
    } else {
        Err(AwError::Interrupted)
    }
}
