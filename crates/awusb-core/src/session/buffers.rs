//! Transfer buffers owned by a device.

use crate::error::{AwError, Result};

/// The output and input staging buffers of one device.
///
/// Allocated when the device is recognised; freed by dropping, which the
/// owning [`Device`](super::Device) does once it is neither present nor open.
pub struct TransferBuffers {
    out: Box<[u8]>,
    input: Box<[u8]>,
}

impl std::fmt::Debug for TransferBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferBuffers")
            .field("out", &self.out.len())
            .field("input", &self.input.len())
            .finish()
    }
}

fn alloc_zeroed(which: &'static str, size: usize) -> Result<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| AwError::OutOfMemory { which, size })?;
    buf.resize(size, 0);
    Ok(buf.into_boxed_slice())
}

impl TransferBuffers {
    /// Allocate both buffers. If the second allocation fails the first is
    /// released before returning.
    pub fn allocate(out_size: usize, in_size: usize) -> Result<Self> {
        let out = alloc_zeroed("output", out_size)?;
        let input = alloc_zeroed("input", in_size)?;
        Ok(Self { out, input })
    }

    pub fn out_capacity(&self) -> usize {
        self.out.len()
    }

    pub fn in_capacity(&self) -> usize {
        self.input.len()
    }

    pub fn out_mut(&mut self) -> &mut [u8] {
        &mut self.out
    }

    pub fn in_mut(&mut self) -> &mut [u8] {
        &mut self.input
    }
}
