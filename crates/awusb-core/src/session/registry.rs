//! Devices keyed by bus identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, instrument};

use super::DeviceId;
use super::device::{Device, Session};
use crate::config::EngineConfig;
use crate::error::{AwError, Result};
use crate::events::{TracingObserver, TransferObserver};
use crate::transport::UsbHandle;

/// All devices the host currently knows about.
///
/// A device record stays registered while it is present or still held by a
/// session; once both are gone it is dropped on the next registry call.
/// Re-attaching an identity whose previous record is only kept alive by an
/// open session starts a fresh record; the old session keeps failing with
/// `NoDevice` until it is closed.
pub struct DeviceRegistry {
    config: EngineConfig,
    observer: Arc<dyn TransferObserver>,
    devices: Mutex<HashMap<DeviceId, Arc<Device>>>,
}

impl DeviceRegistry {
    /// Create a registry with the default tracing observer.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    pub fn with_observer(config: EngineConfig, observer: Arc<dyn TransferObserver>) -> Self {
        Self {
            config,
            observer,
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<DeviceId, Arc<Device>>> {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        devices.retain(|_, device| !device.is_retired());
        devices
    }

    /// Register a newly recognised device.
    #[instrument(skip(self, handle), fields(device = %id))]
    pub fn attach(&self, id: DeviceId, handle: Arc<dyn UsbHandle>) -> Result<Arc<Device>> {
        let mut devices = self.devices();
        if devices.get(&id).is_some_and(|device| device.is_present()) {
            return Err(AwError::Busy);
        }

        let device = Device::new(id.clone(), self.config.clone(), Arc::clone(&self.observer));
        device.on_attach(handle)?;
        devices.insert(id, Arc::clone(&device));
        Ok(device)
    }

    /// Report removal of a device. Unknown identities are ignored.
    #[instrument(skip(self), fields(device = %id))]
    pub fn detach(&self, id: &DeviceId) {
        // Release the map before touching the device: its lock may be held
        // by a stalled transfer.
        let device = self.devices().get(id).cloned();
        match device {
            Some(device) => {
                device.on_detach();
            }
            None => debug!("Detach of unknown device"),
        }
    }

    /// Open the session on a registered device.
    pub fn open(&self, id: &DeviceId) -> Result<Session> {
        let device = self.get(id).ok_or(AwError::NoDevice)?;
        device.open()
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices().get(id).cloned()
    }

    /// Identities of all registered devices.
    pub fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.devices().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
