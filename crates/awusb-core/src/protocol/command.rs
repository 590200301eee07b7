//! Control codes and the command header they carry.

use std::fmt;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::constants::*;
use super::params::BlockError;
use crate::error::AwError;

/// The fixed set of control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Reset,
    SetParameters,
    GetParameters,
    Send,
    Receive,
    SendThenReceive,
}

impl CommandCode {
    pub const ALL: [CommandCode; 6] = [
        CommandCode::Reset,
        CommandCode::SetParameters,
        CommandCode::GetParameters,
        CommandCode::Send,
        CommandCode::Receive,
        CommandCode::SendThenReceive,
    ];

    /// Linux ioctl request number for this code.
    pub const fn request(self) -> u32 {
        match self {
            CommandCode::Reset => AWUSB_IOCRESET,
            CommandCode::SetParameters => AWUSB_IOCSET,
            CommandCode::GetParameters => AWUSB_IOCGET,
            CommandCode::Send => AWUSB_IOCSEND,
            CommandCode::Receive => AWUSB_IOCRECV,
            CommandCode::SendThenReceive => AWUSB_IOCSEND_RECV,
        }
    }

    /// Decode a raw request number.
    pub fn from_request(request: u32) -> Result<Self, AwError> {
        Self::ALL
            .into_iter()
            .find(|code| code.request() == request)
            .ok_or(AwError::UnknownCommand(request))
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCode::Reset => write!(f, "RESET"),
            CommandCode::SetParameters => write!(f, "SET"),
            CommandCode::GetParameters => write!(f, "GET"),
            CommandCode::Send => write!(f, "SEND"),
            CommandCode::Receive => write!(f, "RECV"),
            CommandCode::SendThenReceive => write!(f, "SEND_RECV"),
        }
    }
}

/// Scalar part of a SEND/RECV request. The buffer travels separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandHeader {
    pub value: i32,
    pub length: i32,
}

impl CommandHeader {
    /// Encoded size without the buffer pointer.
    pub const SIZE: usize = 8;

    pub fn new(value: i32, length: i32) -> Self {
        Self { value, length }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        let _ = buf.write_i32::<LittleEndian>(self.value);
        let _ = buf.write_i32::<LittleEndian>(self.length);
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
            value: cursor.read_i32::<LittleEndian>()?,
            length: cursor.read_i32::<LittleEndian>()?,
        })
    }
}
