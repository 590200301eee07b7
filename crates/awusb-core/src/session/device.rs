//! One physical device: presence, buffers and the exclusive session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument, warn};

use super::DeviceId;
use super::buffers::TransferBuffers;
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::dispatch::{Command, Reply, dispatch};
use crate::engine::{Link, read_stream, write_stream};
use crate::error::{AwError, Result};
use crate::events::{TransferEvent, TransferObserver};
use crate::protocol::ParamBlock;
use crate::transport::UsbHandle;
use crate::usermem::{BoundaryFault, UserSink, UserSource};

/// Endpoints fixed for the lifetime of an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenEndpoints {
    pub bulk_in: u8,
    pub bulk_out: u8,
    /// Largest single bulk-in request.
    pub in_limit: usize,
}

#[derive(Default)]
struct DeviceState {
    handle: Option<Arc<dyn UsbHandle>>,
    endpoints: Option<OpenEndpoints>,
    buffers: Option<TransferBuffers>,
    params: ParamBlock,
}

/// A device known to the host.
///
/// `present` and `open` are readable without the lock so that removal can be
/// noticed while a transfer holds it; both only change with the lock held.
/// The buffers live exactly as long as the device is present or open.
pub struct Device {
    id: DeviceId,
    config: EngineConfig,
    present: AtomicBool,
    open: AtomicBool,
    state: Mutex<DeviceState>,
    observer: Arc<dyn TransferObserver>,
}

impl Device {
    /// Create a device record with nothing attached yet.
    pub fn new(id: DeviceId, config: EngineConfig, observer: Arc<dyn TransferObserver>) -> Arc<Self> {
        Arc::new(Self {
            id,
            config,
            present: AtomicBool::new(false),
            open: AtomicBool::new(false),
            state: Mutex::new(DeviceState::default()),
            observer,
        })
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Neither attached nor held by a session; nothing can use it again.
    pub fn is_retired(&self) -> bool {
        !self.is_present() && !self.is_open()
    }

    /// Whether the transfer buffers are currently allocated.
    pub fn has_buffers(&self) -> bool {
        self.lock().buffers.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransferEvent) {
        self.observer.on_event(&event);
    }

    /// The device showed up on the bus: allocate buffers and mark it present.
    ///
    /// A record that is present, or whose session outlived a removal, cannot
    /// be attached again; the returning device needs a fresh record.
    #[instrument(skip(self, handle), fields(device = %self.id))]
    pub fn on_attach(&self, handle: Arc<dyn UsbHandle>) -> Result<()> {
        let mut state = self.lock();
        if self.is_present() || self.is_open() {
            return Err(AwError::Busy);
        }
        state.buffers = Some(TransferBuffers::allocate(
            self.config.out_buffer_size,
            self.config.in_buffer_size,
        )?);
        state.handle = Some(handle);
        self.present.store(true, Ordering::SeqCst);
        drop(state);

        self.emit(TransferEvent::Attached {
            id: self.id.clone(),
        });
        Ok(())
    }

    /// The device left the bus.
    ///
    /// In-flight transfers notice through the presence flag before their next
    /// attempt. Buffers are released now unless a session is still open, in
    /// which case [`Session`] drop releases them. Returns `true` if released.
    #[instrument(skip(self), fields(device = %self.id))]
    pub fn on_detach(&self) -> bool {
        self.present.store(false, Ordering::SeqCst);

        let mut state = self.lock();
        state.handle = None;
        let deferred = self.is_open();
        if !deferred {
            state.buffers = None;
        }
        drop(state);

        self.emit(TransferEvent::Detached {
            id: self.id.clone(),
            deferred,
        });
        !deferred
    }

    /// Open the one allowed session on this device.
    #[instrument(skip(self), fields(device = %self.id))]
    pub fn open(self: &Arc<Self>) -> Result<Session> {
        let mut state = self.lock();
        if self.is_open() || !self.is_present() {
            return Err(AwError::Busy);
        }
        let (Some(handle), Some(buffers)) = (state.handle.as_ref(), state.buffers.as_ref()) else {
            return Err(AwError::NoDevice);
        };

        let info = handle.discover_endpoints().map_err(|e| {
            warn!(error = %e, "Endpoint discovery failed");
            AwError::EndpointsUnavailable
        })?;
        if !info.is_complete() {
            warn!(?info, "Could not find both bulk-in and bulk-out endpoints");
            return Err(AwError::EndpointsUnavailable);
        }

        let in_capacity = buffers.in_capacity();
        let in_limit = match info.in_capacity_hint {
            0 => in_capacity,
            hint => hint.min(in_capacity),
        };
        let endpoints = OpenEndpoints {
            bulk_in: info.bulk_in,
            bulk_out: info.bulk_out,
            in_limit,
        };
        debug!(?endpoints, "Endpoints discovered");

        state.endpoints = Some(endpoints);
        self.open.store(true, Ordering::SeqCst);
        drop(state);

        self.emit(TransferEvent::Opened {
            bulk_in: endpoints.bulk_in,
            bulk_out: endpoints.bulk_out,
        });
        Ok(Session {
            device: Arc::clone(self),
        })
    }

    fn close(&self) {
        let mut state = self.lock();
        self.open.store(false, Ordering::SeqCst);
        state.endpoints = None;
        let released = !self.is_present() && state.buffers.take().is_some();
        drop(state);

        if released {
            info!(device = %self.id, "Released buffers of removed device");
        }
        self.emit(TransferEvent::Closed { released });
    }

    /// Run `op` with the device locked and its I/O resources borrowed.
    fn with_link<R>(
        &self,
        op: impl FnOnce(&Link<'_>, &mut TransferBuffers, &mut ParamBlock) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.lock();
        if !self.is_present() {
            return Err(AwError::NoDevice);
        }
        let state = &mut *guard;
        let (Some(handle), Some(endpoints), Some(buffers)) = (
            state.handle.as_deref(),
            state.endpoints.as_ref(),
            state.buffers.as_mut(),
        ) else {
            return Err(AwError::NoDevice);
        };

        let link = Link {
            handle,
            endpoints,
            present: &self.present,
            config: &self.config,
            observer: self.observer.as_ref(),
        };
        op(&link, buffers, &mut state.params)
    }
}

/// The exclusive open session on a [`Device`].
///
/// All operations serialize on the device lock for their full duration.
/// Dropping the session closes it.
pub struct Session {
    device: Arc<Device>,
}

impl Session {
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Endpoints discovered at open.
    pub fn endpoints(&self) -> Option<OpenEndpoints> {
        self.device.lock().endpoints
    }

    /// Write all of `src` to the bulk-out endpoint.
    ///
    /// Returns the number of bytes the device accepted. If `cancel` fires,
    /// returns what was confirmed so far, or `Interrupted` if nothing was.
    #[instrument(skip(self, src, cancel), fields(device = %self.device.id, len = src.len()))]
    pub fn write<S: UserSource + ?Sized>(&self, src: &S, cancel: &CancelToken) -> Result<usize> {
        if cancel.is_cancelled() {
            return Err(AwError::Interrupted);
        }
        self.device
            .with_link(|link, buffers, _| write_stream(link, buffers.out_mut(), src, cancel))
    }

    /// Read up to `dst.len()` bytes from the bulk-in endpoint.
    #[instrument(skip(self, dst, cancel), fields(device = %self.device.id, max_len = dst.len()))]
    pub fn read<K: UserSink + ?Sized>(&self, dst: &mut K, cancel: &CancelToken) -> Result<usize> {
        if cancel.is_cancelled() {
            return Err(AwError::Interrupted);
        }
        self.device
            .with_link(|link, buffers, _| read_stream(link, buffers.in_mut(), dst, cancel))
    }

    /// Execute one control command.
    #[instrument(skip(self, command), fields(device = %self.device.id, code = %command.code()))]
    pub fn command(&self, command: Command<'_>) -> Result<Reply> {
        self.device
            .with_link(|link, buffers, params| dispatch(link, buffers, params, command))
    }

    /// Execute a raw request number with its encoded argument block.
    ///
    /// GET writes the 16-byte parameter block back into `arg`. Returns the
    /// byte count for SEND and RECV, zero otherwise.
    pub fn ioctl(&self, request: u32, arg: &mut [u8], data: &mut Vec<u8>) -> Result<usize> {
        let command = Command::from_raw(request, arg, data)?;
        match self.command(command)? {
            Reply::Parameters(block) => {
                let bytes = block.to_bytes();
                let len = bytes.len();
                arg.get_mut(..len)
                    .ok_or(BoundaryFault { offset: 0, len })?
                    .copy_from_slice(&bytes);
                Ok(0)
            }
            Reply::Sent(n) | Reply::Received(n) => Ok(n),
            Reply::Done => Ok(0),
        }
    }

    /// Close the session. Same as dropping it.
    pub fn close(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        self.device.close();
    }
}
