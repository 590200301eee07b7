//! Command dispatcher - single-shot control operations.
//!
//! Commands share the session buffers and lock with the stream engine but
//! never retry: one bulk transfer, and whatever it reports is the answer.

use tracing::{debug, error, info};

use crate::engine::Link;
use crate::error::{AwError, Result};
use crate::events::TransferEvent;
use crate::protocol::params::BlockError;
use crate::protocol::{CommandCode, CommandHeader, ParamBlock};
use crate::session::TransferBuffers;
use crate::usermem::{BoundaryFault, UserSink, UserSource};

/// A control request. Caller buffers are borrowed for the call only.
pub enum Command<'a> {
    /// Placeholder for a future device reset.
    Reset,
    SetParameters(ParamBlock),
    GetParameters,
    /// Send `header.length` bytes of `buffer` in one bulk-out transfer.
    Send {
        header: CommandHeader,
        buffer: &'a dyn UserSource,
    },
    /// Receive `header.length` bytes into `buffer` in one bulk-in transfer.
    Receive {
        header: CommandHeader,
        buffer: &'a mut dyn UserSink,
    },
    /// Declared by the interface; not implemented.
    SendThenReceive,
}

/// A short argument block reads past what the caller handed in.
fn arg_fault(err: BlockError) -> AwError {
    let len = match err {
        BlockError::BufferTooSmall { expected, .. } => expected,
        BlockError::Io(_) => 0,
    };
    AwError::BoundaryFault(BoundaryFault { offset: 0, len })
}

impl<'a> Command<'a> {
    /// Decode a raw request number and its argument block.
    ///
    /// `arg` carries the parameter block for SET and the command header for
    /// SEND/RECV. `data` is the command buffer: read for SEND, filled for
    /// RECV.
    pub fn from_raw(request: u32, arg: &[u8], data: &'a mut Vec<u8>) -> Result<Self> {
        let command = match CommandCode::from_request(request)? {
            CommandCode::Reset => Command::Reset,
            CommandCode::SetParameters => {
                Command::SetParameters(ParamBlock::from_bytes(arg).map_err(arg_fault)?)
            }
            CommandCode::GetParameters => Command::GetParameters,
            CommandCode::Send => {
                let buffer: &'a Vec<u8> = data;
                Command::Send {
                    header: CommandHeader::from_bytes(arg).map_err(arg_fault)?,
                    buffer,
                }
            }
            CommandCode::Receive => Command::Receive {
                header: CommandHeader::from_bytes(arg).map_err(arg_fault)?,
                buffer: data,
            },
            CommandCode::SendThenReceive => Command::SendThenReceive,
        };
        Ok(command)
    }
}

impl Command<'_> {
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Reset => CommandCode::Reset,
            Command::SetParameters(_) => CommandCode::SetParameters,
            Command::GetParameters => CommandCode::GetParameters,
            Command::Send { .. } => CommandCode::Send,
            Command::Receive { .. } => CommandCode::Receive,
            Command::SendThenReceive => CommandCode::SendThenReceive,
        }
    }
}

/// Result of a successful command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    Parameters(ParamBlock),
    /// Bytes the device accepted.
    Sent(usize),
    /// Bytes the device delivered; the caller buffer is zero-padded to the
    /// requested length.
    Received(usize),
}

/// Validate a caller length against a buffer capacity.
fn checked_len(length: i32, capacity: usize) -> Result<usize> {
    match usize::try_from(length) {
        Ok(len) if len <= capacity => Ok(len),
        _ => Err(AwError::InvalidArgument {
            length: i64::from(length),
            capacity,
        }),
    }
}

pub(crate) fn dispatch(
    link: &Link<'_>,
    buffers: &mut TransferBuffers,
    params: &mut ParamBlock,
    command: Command<'_>,
) -> Result<Reply> {
    link.emit(TransferEvent::Command {
        code: command.code(),
    });
    let timeout = link.config.transfer_timeout();

    match command {
        Command::Reset => {
            debug!("ioctl_aw--AWUSB_IOCRESET");
            Ok(Reply::Done)
        }
        Command::SetParameters(block) => {
            info!(
                test_num = block.test_num,
                p1 = block.p1,
                p2 = block.p2,
                p3 = block.p3,
                "Parameters set"
            );
            *params = block;
            Ok(Reply::Done)
        }
        Command::GetParameters => Ok(Reply::Parameters(ParamBlock::diagnostic())),
        Command::Send { header, buffer } => {
            let len = checked_len(header.length, buffers.out_capacity())?;
            let obuf = &mut buffers.out_mut()[..len];
            buffer.copy_out(0, obuf)?;

            let sent = link
                .handle
                .bulk_out(link.endpoints.bulk_out, obuf, timeout)
                .map_err(|e| {
                    error!(error = %e, pipe = link.endpoints.bulk_out, "Write Whoops");
                    AwError::Io(e)
                })?;
            debug!(value = header.value, len, sent, "Command sent");
            Ok(Reply::Sent(sent))
        }
        Command::Receive { header, buffer } => {
            let len = checked_len(header.length, link.endpoints.in_limit)?;
            if len == 0 {
                return Ok(Reply::Received(0));
            }
            let ibuf = buffers.in_mut();
            ibuf.fill(0);

            let received = link
                .handle
                .bulk_in(link.endpoints.bulk_in, &mut ibuf[..len], timeout)
                .map_err(|e| {
                    error!(error = %e, pipe = link.endpoints.bulk_in, "Read Whoops");
                    AwError::Io(e)
                })?;
            buffer.copy_in(0, &ibuf[..len])?;
            debug!(value = header.value, len, received, "Command received");
            Ok(Reply::Received(received.min(len)))
        }
        Command::SendThenReceive => {
            debug!("ioctl_aw--AWUSB_IOCSEND_RECV");
            Err(AwError::Unsupported)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineConfig;
    use crate::events::NullObserver;
    use crate::session::{Device, Session};
    use crate::transport::{MockStep, MockTransport, TransportError};

    fn open(mock: &MockTransport) -> Session {
        let config = EngineConfig {
            out_buffer_size: 32,
            in_buffer_size: 16,
            nak_backoff_ms: 1,
            ..Default::default()
        };
        let device = Device::new("2-1".into(), config, Arc::new(NullObserver));
        device.on_attach(Arc::new(mock.clone())).unwrap();
        device.open().unwrap()
    }

    fn send<'a>(length: i32, buffer: &'a dyn UserSource) -> Command<'a> {
        Command::Send {
            header: CommandHeader::new(0, length),
            buffer,
        }
    }

    #[test]
    fn test_reset_and_parameters() {
        let mock = MockTransport::new();
        let session = open(&mock);

        assert_eq!(session.command(Command::Reset).unwrap(), Reply::Done);
        assert_eq!(
            session
                .command(Command::SetParameters(ParamBlock::new(9, 9, 9, 9)))
                .unwrap(),
            Reply::Done
        );
        assert_eq!(
            session.command(Command::GetParameters).unwrap(),
            Reply::Parameters(ParamBlock::new(3, 4, 5, 6))
        );
        assert_eq!(mock.out_calls() + mock.in_calls(), 0);
    }

    #[test]
    fn test_send_at_capacity() {
        let mock = MockTransport::new();
        let session = open(&mock);
        let payload = [0xA5u8; 32];

        let reply = session.command(send(32, &payload)).unwrap();
        assert_eq!(reply, Reply::Sent(32));
        assert_eq!(mock.get_writes(), vec![payload.to_vec()]);
    }

    #[test]
    fn test_send_over_capacity_does_no_io() {
        let mock = MockTransport::new();
        let session = open(&mock);
        let payload = [0u8; 33];

        let err = session.command(send(33, &payload)).unwrap_err();
        assert!(matches!(
            err,
            AwError::InvalidArgument {
                length: 33,
                capacity: 32
            }
        ));
        assert_eq!(mock.out_calls(), 0);
    }

    #[test]
    fn test_send_does_not_retry() {
        let mock = MockTransport::new();
        mock.queue_out(MockStep::Timeout);
        let session = open(&mock);

        let err = session.command(send(4, b"ping")).unwrap_err();
        assert!(matches!(err, AwError::Io(TransportError::Timeout { .. })));
        assert_eq!(mock.out_calls(), 1);
    }

    #[test]
    fn test_send_short_caller_buffer_faults() {
        let mock = MockTransport::new();
        let session = open(&mock);

        let err = session.command(send(8, b"abc")).unwrap_err();
        assert!(matches!(err, AwError::BoundaryFault(_)));
        assert_eq!(mock.out_calls(), 0);
    }

    #[test]
    fn test_receive_rejects_negative_and_oversized() {
        let mock = MockTransport::new();
        let session = open(&mock);
        let mut buf = [0u8; 32];

        for length in [-1, 17] {
            let err = session
                .command(Command::Receive {
                    header: CommandHeader::new(0, length),
                    buffer: &mut buf,
                })
                .unwrap_err();
            assert!(matches!(err, AwError::InvalidArgument { .. }));
        }
        assert_eq!(mock.in_calls(), 0);
    }

    #[test]
    fn test_receive_zero_length_does_no_io() {
        let mock = MockTransport::new();
        let session = open(&mock);
        let mut empty: Vec<u8> = Vec::new();

        let reply = session
            .command(Command::Receive {
                header: CommandHeader::new(0, 0),
                buffer: &mut empty,
            })
            .unwrap();
        assert_eq!(reply, Reply::Received(0));
        assert_eq!(mock.in_calls(), 0);
    }

    #[test]
    fn test_send_then_receive_round_trip() {
        let mock = MockTransport::new();
        let session = open(&mock);
        let payload = b"efex-cmd".to_vec();

        session.command(send(8, &payload)).unwrap();

        let mut back = vec![0xFFu8; 8];
        let reply = session
            .command(Command::Receive {
                header: CommandHeader::new(0, 8),
                buffer: &mut back,
            })
            .unwrap();
        assert_eq!(reply, Reply::Received(8));
        assert_eq!(back, payload);
    }

    #[test]
    fn test_receive_short_is_zero_padded() {
        let mock = MockTransport::new();
        mock.queue_in(MockStep::Data(vec![1, 2]));
        let session = open(&mock);

        let mut back = vec![0xFFu8; 6];
        let reply = session
            .command(Command::Receive {
                header: CommandHeader::new(0, 6),
                buffer: &mut back,
            })
            .unwrap();
        assert_eq!(reply, Reply::Received(2));
        assert_eq!(back, [1, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn test_send_then_receive_is_unsupported() {
        let mock = MockTransport::new();
        let session = open(&mock);
        assert!(matches!(
            session.command(Command::SendThenReceive),
            Err(AwError::Unsupported)
        ));
    }

    #[test]
    fn test_commands_need_present_device() {
        let mock = MockTransport::new();
        let session = open(&mock);
        session.device().on_detach();

        assert!(matches!(
            session.command(Command::GetParameters),
            Err(AwError::NoDevice)
        ));
    }
}
