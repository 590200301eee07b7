//! nusb-based USB transport implementation.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, Completion, In, Out, TransferError};
use nusb::{Endpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{BulkTransport, EndpointInfo, EndpointProvider, TransportError};
use crate::protocol::constants::{AW_PRODUCT_ID, AW_VENDOR_ID, IN_BUFFER_SIZE};
use crate::session::DeviceId;

/// nusb-based USB transport.
///
/// Endpoints are claimed lazily on first use and kept until the transport is
/// dropped or a different address is requested.
pub struct NusbTransport {
    device: nusb::Device,
    interface: Interface,
    id: DeviceId,
    out_ep: Mutex<Option<(u8, Endpoint<Bulk, Out>)>>,
    in_ep: Mutex<Option<(u8, Endpoint<Bulk, In>)>>,
}

impl NusbTransport {
    /// Open the first AW download-mode device.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        Self::open_with_ids(AW_VENDOR_ID, AW_PRODUCT_ID)
    }

    /// Open a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        let id = DeviceId::new(format!(
            "{}-{}",
            device_info.bus_id(),
            device_info.device_address()
        ));

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            device = %id,
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        Ok(Self {
            device,
            interface,
            id,
            out_ep: Mutex::new(None),
            in_ep: Mutex::new(None),
        })
    }

    /// Bus identity of the opened device.
    pub fn id(&self) -> &DeviceId {
        &self.id
    }
}

/// Fold a completion into a byte count.
///
/// A transfer that hit its deadline after moving some bytes counts as a
/// partial success so the caller does not resend what the device already has.
fn complete(completion: Completion, timeout: Duration) -> Result<usize, TransportError> {
    match completion.status {
        Ok(()) => Ok(completion.actual_len),
        Err(TransferError::Cancelled) if completion.actual_len > 0 => Ok(completion.actual_len),
        Err(TransferError::Cancelled) => Err(TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(TransferError::Stall) => Err(TransportError::Stall),
        Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
        Err(TransferError::Unknown(code)) => Err(TransportError::Status(code)),
        Err(e) => Err(TransportError::Failed(e.to_string())),
    }
}

impl BulkTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut slot = self.out_ep.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|(addr, _)| *addr) != Some(endpoint) {
            let ep = self
                .interface
                .endpoint::<Bulk, Out>(endpoint)
                .map_err(|e| TransportError::ClaimEndpointFailed {
                    address: endpoint,
                    message: e.to_string(),
                })?;
            *slot = Some((endpoint, ep));
        }
        let Some((_, ep)) = slot.as_mut() else {
            return Err(TransportError::Disconnected);
        };

        let completion = ep.transfer_blocking(Buffer::from(data.to_vec()), timeout);
        let n = complete(completion, timeout)?;
        debug!(bytes_written = n, "Write complete");
        Ok(n)
    }

    #[instrument(skip(self, buf), fields(max_len = buf.len()))]
    fn bulk_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut slot = self.in_ep.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|(addr, _)| *addr) != Some(endpoint) {
            let ep = self
                .interface
                .endpoint::<Bulk, In>(endpoint)
                .map_err(|e| TransportError::ClaimEndpointFailed {
                    address: endpoint,
                    message: e.to_string(),
                })?;
            *slot = Some((endpoint, ep));
        }
        let Some((_, ep)) = slot.as_mut() else {
            return Err(TransportError::Disconnected);
        };

        // nusb wants IN requests in whole packets; anything past buf.len() is dropped.
        let max_packet = ep.max_packet_size().max(1);
        let requested = buf.len().div_ceil(max_packet) * max_packet;
        let mut transfer = Buffer::new(requested);
        transfer.set_requested_len(requested);

        let completion = ep.transfer_blocking(transfer, timeout);
        let received = completion.buffer.len().min(completion.actual_len);
        let data = completion.buffer[..received].to_vec();
        let n = complete(completion, timeout)?;
        if n == 0 {
            return Err(TransportError::EndOfStream);
        }

        let n = n.min(buf.len()).min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        debug!(bytes_read = n, "Read complete");
        Ok(n)
    }
}

impl EndpointProvider for NusbTransport {
    fn discover_endpoints(&self) -> Result<EndpointInfo, TransportError> {
        let mut info = EndpointInfo {
            in_capacity_hint: IN_BUFFER_SIZE,
            ..Default::default()
        };

        // First bulk endpoint in each direction wins.
        for config in self.device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != 0 {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() != nusb::descriptors::TransferType::Bulk {
                            continue;
                        }
                        if ep.direction() == nusb::transfer::Direction::In {
                            if info.bulk_in == 0 {
                                info.bulk_in = ep.address();
                                debug!(address = ep.address(), "bulk_in_endpointAddr");
                            }
                        } else if info.bulk_out == 0 {
                            info.bulk_out = ep.address();
                            debug!(address = ep.address(), "bulk_out_endpointAddr");
                        }
                    }
                }
            }
        }

        Ok(info)
    }
}
