//! Adaptive bulk-in stream.

use tracing::{debug, error};

use super::retry::{Attempt, Next, RetryPolicy, RetryState};
use super::{Link, fatal, interrupted};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{AwError, Result};
use crate::events::{Direction, TransferEvent};
use crate::transport::TransportError;
use crate::usermem::UserSink;

/// Whether the device reported it has nothing more to offer.
fn is_end_of_stream(result: &std::result::Result<usize, TransportError>) -> bool {
    matches!(result, Ok(0) | Err(TransportError::EndOfStream))
}

fn classify(result: std::result::Result<usize, TransportError>, config: &EngineConfig) -> Attempt {
    match result {
        Ok(n) => Attempt::Progress(n),
        Err(e) if e.is_stall() => Attempt::Stall,
        Err(TransportError::Status(code)) if config.is_stall_status(code) => Attempt::Stall,
        Err(e) => Attempt::Fatal(e),
    }
}

/// Fill `dst` from the bulk-in endpoint through `ibuf`.
///
/// Each request asks for at most the input limit. A short transfer means the
/// device has handed over everything it had, so the read ends there; an
/// end-of-stream report ends it too. Either way the bytes gathered so far
/// are a successful, possibly empty, result.
pub(crate) fn read_stream<K: UserSink + ?Sized>(
    link: &Link<'_>,
    ibuf: &mut [u8],
    dst: &mut K,
    cancel: &CancelToken,
) -> Result<usize> {
    let total = dst.len();
    let limit = link.endpoints.in_limit.min(ibuf.len());
    let timeout = link.config.transfer_timeout();
    let policy = RetryPolicy::new(link.config.read_max_stalls, link.config.nak_backoff());
    let mut retry = RetryState::new(policy);
    let mut read = 0usize;

    while read < total {
        if cancel.is_cancelled() {
            return interrupted(read);
        }
        if !link.is_present() {
            return Err(AwError::NoDevice);
        }

        let this_read = limit.min(total - read);
        let result = link
            .handle
            .bulk_in(link.endpoints.bulk_in, &mut ibuf[..this_read], timeout);
        debug!(result = ?result, this_read, "read stats");
        if is_end_of_stream(&result) {
            break;
        }

        match classify(result, link.config) {
            Attempt::Progress(n) => {
                let n = n.min(this_read);
                dst.copy_in(read, &ibuf[..n])?;
                link.emit(TransferEvent::Chunk {
                    direction: Direction::In,
                    offset: read,
                    length: n,
                });
                read += n;
                retry.on_progress();
                if n < this_read {
                    break;
                }
            }
            Attempt::Stall => match retry.on_stall() {
                Next::Exhausted { stalls } => {
                    error!(stalls, read, "read: maxretry timeout");
                    return Err(AwError::Timeout { stalls });
                }
                Next::Backoff(wait) => {
                    link.emit(TransferEvent::Stall {
                        direction: Direction::In,
                        attempt: retry.stalls(),
                        max: retry.max_stalls(),
                    });
                    if cancel.wait_timeout(wait) {
                        return interrupted(read);
                    }
                }
            },
            Attempt::Fatal(e) => {
                error!(error = %e, read, this_read, "Read Whoops");
                return Err(fatal(e));
            }
        }
    }

    Ok(read)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::engine::testing::{fast_config, link};
    use crate::transport::{MockStep, MockTransport};

    #[test]
    fn test_read_collects_full_chunks() {
        let mock = MockTransport::new();
        let data: Vec<u8> = (0..20).collect();
        mock.preload(&data);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 20];

        let n = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(n, 20);
        assert_eq!(out, data);
        assert_eq!(mock.read_requests(), vec![8, 8, 4]);
    }

    #[test]
    fn test_read_adapts_to_short_transfer() {
        let mock = MockTransport::new();
        mock.queue_in(MockStep::Data(vec![1, 2, 3]));
        mock.preload(&[9; 16]);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 32];

        let n = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(mock.in_calls(), 1);
    }

    #[test]
    fn test_read_end_of_stream_is_success() {
        let mock = MockTransport::new();
        mock.queue_in(MockStep::EndOfStream);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 8];

        let n = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_read_end_of_stream_keeps_accumulated() {
        let mock = MockTransport::new();
        mock.preload(&[5; 8]);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 24];

        // One full chunk from the FIFO, then the FIFO runs dry.
        let n = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(n, 8);
        assert_eq!(mock.in_calls(), 2);
    }

    #[test]
    fn test_read_gives_up_after_max_stalls() {
        let mock = MockTransport::new();
        mock.queue_in_repeated(MockStep::Timeout, 20);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 8];

        let err = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::Timeout { stalls: 10 }));
        assert_eq!(mock.in_calls(), 10);
    }

    #[test]
    fn test_read_quirk_status_is_retried() {
        let mock = MockTransport::new();
        mock.queue_in(MockStep::Status(15));
        mock.queue_in(MockStep::Data(vec![7; 4]));
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 4];

        let n = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(n, 4);
        assert_eq!(mock.in_calls(), 2);
    }

    #[test]
    fn test_read_quirk_status_can_be_disabled() {
        let mock = MockTransport::new();
        mock.queue_in(MockStep::Status(15));
        let present = AtomicBool::new(true);
        let config = EngineConfig {
            stall_status_codes: Vec::new(),
            ..fast_config()
        };
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 4];

        let err = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AwError::Io(TransportError::Status(15))));
    }

    #[test]
    fn test_read_cancelled_during_backoff() {
        let mock = MockTransport::new();
        mock.queue_in(MockStep::Data(vec![1; 8]));
        mock.queue_in_repeated(MockStep::Stall, 5);
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        mock.set_transfer_hook(move |_, call| {
            if call == 1 {
                remote.cancel();
            }
        });
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 16];

        let n = read_stream(&link(&mock, &present, &config), &mut ibuf, &mut out, &cancel)
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(mock.in_calls(), 2);
    }

    #[test]
    fn test_read_stops_when_device_leaves() {
        let mock = MockTransport::new();
        mock.preload(&[7; 20]);
        let present = Arc::new(AtomicBool::new(true));
        let flag = present.clone();
        mock.set_transfer_hook(move |_, _| flag.store(false, Ordering::SeqCst));
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 20];

        let err = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::NoDevice));
        assert_eq!(mock.in_calls(), 1);
    }

    #[test]
    fn test_read_disconnect_is_no_device() {
        let mock = MockTransport::new();
        mock.preload(&[7; 20]);
        mock.queue_in(MockStep::Accept);
        mock.queue_in(MockStep::Disconnect);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];
        let mut out = vec![0u8; 20];

        let err = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut out,
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::NoDevice));
        assert_eq!(mock.in_calls(), 2);
    }

    #[test]
    fn test_read_boundary_fault() {
        struct Faulty;
        impl UserSink for Faulty {
            fn len(&self) -> usize {
                4
            }
            fn copy_in(
                &mut self,
                offset: usize,
                src: &[u8],
            ) -> std::result::Result<(), crate::usermem::BoundaryFault> {
                Err(crate::usermem::BoundaryFault {
                    offset,
                    len: src.len(),
                })
            }
        }

        let mock = MockTransport::new();
        mock.preload(&[1; 4]);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut ibuf = [0u8; 8];

        let err = read_stream(
            &link(&mock, &present, &config),
            &mut ibuf,
            &mut Faulty,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AwError::BoundaryFault(_)));
    }
}
