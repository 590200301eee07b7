//! Caller-owned memory at the session boundary.
//!
//! The engine and dispatcher never index caller memory directly; they copy
//! through [`UserSource`] and [`UserSink`] so that a front end can back them
//! with whatever mapping it has (a slice, a file-backed window, a foreign
//! process). A failed copy surfaces as [`BoundaryFault`].

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Bad address: {len} bytes at offset {offset} are outside the caller buffer")]
pub struct BoundaryFault {
    pub offset: usize,
    pub len: usize,
}

/// Caller memory the link reads from (write path, SEND).
pub trait UserSource {
    /// Number of bytes the caller offers.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Result<(), BoundaryFault>;
}

/// Caller memory the link writes into (read path, RECV).
pub trait UserSink {
    /// Number of bytes the caller can take.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `src` into the caller buffer starting at `offset`.
    fn copy_in(&mut self, offset: usize, src: &[u8]) -> Result<(), BoundaryFault>;
}

fn window(offset: usize, len: usize, limit: usize) -> Result<std::ops::Range<usize>, BoundaryFault> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(offset..end),
        _ => Err(BoundaryFault { offset, len }),
    }
}

impl UserSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Result<(), BoundaryFault> {
        let range = window(offset, dst.len(), <[u8]>::len(self))?;
        dst.copy_from_slice(&self[range]);
        Ok(())
    }
}

impl UserSource for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Result<(), BoundaryFault> {
        self.as_slice().copy_out(offset, dst)
    }
}

impl<const N: usize> UserSource for [u8; N] {
    fn len(&self) -> usize {
        N
    }

    fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Result<(), BoundaryFault> {
        self.as_slice().copy_out(offset, dst)
    }
}

impl UserSink for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_in(&mut self, offset: usize, src: &[u8]) -> Result<(), BoundaryFault> {
        let range = window(offset, src.len(), <[u8]>::len(self))?;
        self[range].copy_from_slice(src);
        Ok(())
    }
}

impl UserSink for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn copy_in(&mut self, offset: usize, src: &[u8]) -> Result<(), BoundaryFault> {
        self.as_mut_slice().copy_in(offset, src)
    }
}

impl<const N: usize> UserSink for [u8; N] {
    fn len(&self) -> usize {
        N
    }

    fn copy_in(&mut self, offset: usize, src: &[u8]) -> Result<(), BoundaryFault> {
        self.as_mut_slice().copy_in(offset, src)
    }
}
