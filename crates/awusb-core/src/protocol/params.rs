//! Parameter block exchanged by the SET/GET control codes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::PARAM_BLOCK_SIZE;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameter block (16 bytes / 0x10)
///
/// Four little-endian counters. The device never sees it; SET stores it on
/// the session and GET answers with fixed diagnostic values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ParamBlock {
    pub test_num: u32,
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
}

impl ParamBlock {
    pub const SIZE: usize = PARAM_BLOCK_SIZE;

    pub fn new(test_num: u32, p1: u32, p2: u32, p3: u32) -> Self {
        Self {
            test_num,
            p1,
            p2,
            p3,
        }
    }

    /// Values answered by GET.
    pub const fn diagnostic() -> Self {
        Self {
            test_num: 3,
            p1: 4,
            p2: 5,
            p3: 6,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        for field in [self.test_num, self.p1, self.p2, self.p3] {
            // Writing into a Vec cannot fail.
            let _ = buf.write_u32::<LittleEndian>(field);
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, BlockError> {
        if data.len() < Self::SIZE {
            return Err(BlockError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            test_num: cursor.read_u32::<LittleEndian>()?,
            p1: cursor.read_u32::<LittleEndian>()?,
            p2: cursor.read_u32::<LittleEndian>()?,
            p3: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_block_layout() {
        let block = ParamBlock::new(1, 0x0203_0405, 7, 0xFFFF_FFFF);
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), ParamBlock::SIZE);
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0x05, 0x04, 0x03, 0x02]);
        assert_eq!(&bytes[12..16], &[0xFF; 4]);
        assert_eq!(ParamBlock::from_bytes(&bytes).unwrap(), block);
    }

    #[test]
    fn test_param_block_too_small() {
        let err = ParamBlock::from_bytes(&[0u8; 12]).unwrap_err();
        assert!(matches!(
            err,
            BlockError::BufferTooSmall {
                expected: 16,
                actual: 12
            }
        ));
    }

    #[test]
    fn test_diagnostic_values() {
        assert_eq!(ParamBlock::diagnostic(), ParamBlock::new(3, 4, 5, 6));
    }
}
