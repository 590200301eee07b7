//! Chunked bulk-out stream.

use tracing::{debug, error};

use super::retry::{Attempt, Next, RetryPolicy, RetryState};
use super::{Link, fatal, interrupted};
use crate::cancel::CancelToken;
use crate::error::{AwError, Result};
use crate::events::{Direction, TransferEvent};
use crate::transport::TransportError;
use crate::usermem::UserSource;

fn classify(result: std::result::Result<usize, TransportError>) -> Attempt {
    match result {
        // A zero-byte acceptance is the device saying "not now".
        Ok(0) => Attempt::Stall,
        Ok(n) => Attempt::Progress(n),
        Err(e) if e.is_stall() => Attempt::Stall,
        Err(e) => Attempt::Fatal(e),
    }
}

/// Write all of `src` through `obuf`, one chunk of at most `obuf.len()`
/// bytes at a time.
///
/// Returns the number of bytes the device accepted. Bytes go out in order;
/// on cancellation the count confirmed so far is returned.
pub(crate) fn write_stream<S: UserSource + ?Sized>(
    link: &Link<'_>,
    obuf: &mut [u8],
    src: &S,
    cancel: &CancelToken,
) -> Result<usize> {
    let total = src.len();
    let capacity = obuf.len();
    let timeout = link.config.transfer_timeout();
    let policy = RetryPolicy::new(link.config.write_max_stalls, link.config.nak_backoff());
    let mut written = 0usize;

    while written < total {
        let chunk_len = capacity.min(total - written);
        let chunk = &mut obuf[..chunk_len];
        src.copy_out(written, chunk)?;

        let mut offset = 0usize;
        let mut retry = RetryState::new(policy);
        while offset < chunk_len {
            if !link.is_present() {
                return Err(AwError::NoDevice);
            }
            if cancel.is_cancelled() {
                return interrupted(written + offset);
            }

            let result = link
                .handle
                .bulk_out(link.endpoints.bulk_out, &chunk[offset..], timeout);
            debug!(result = ?result, thistime = chunk_len - offset, "write stats");

            match classify(result) {
                Attempt::Progress(n) => {
                    offset += n.min(chunk_len - offset);
                    retry.on_progress();
                }
                Attempt::Stall => match retry.on_stall() {
                    Next::Exhausted { stalls } => {
                        error!(stalls, written = written + offset, "write: maxretry timeout");
                        return Err(AwError::Timeout { stalls });
                    }
                    Next::Backoff(wait) => {
                        link.emit(TransferEvent::Stall {
                            direction: Direction::Out,
                            attempt: retry.stalls(),
                            max: retry.max_stalls(),
                        });
                        if cancel.wait_timeout(wait) {
                            return interrupted(written + offset);
                        }
                    }
                },
                Attempt::Fatal(e) => {
                    error!(error = %e, "Write Whoops");
                    return Err(fatal(e));
                }
            }
        }

        link.emit(TransferEvent::Chunk {
            direction: Direction::Out,
            offset: written,
            length: chunk_len,
        });
        written += chunk_len;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::engine::testing::{fast_config, link};
    use crate::transport::{MockStep, MockTransport};

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn test_write_splits_into_chunks() {
        let mock = MockTransport::new();
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];
        let data = payload(20);

        let n = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            data.as_slice(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(n, 20);
        let writes = mock.get_writes();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|w| w.len() <= 8));
        assert_eq!(writes.iter().map(Vec::len).sum::<usize>(), n);
        assert_eq!(mock.written_bytes(), data);
    }

    #[test]
    fn test_write_resumes_after_partial() {
        let mock = MockTransport::new();
        mock.queue_out(MockStep::Partial(3));
        mock.queue_out(MockStep::Partial(1));
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];
        let data = payload(8);

        let n = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            data.as_slice(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(n, 8);
        assert_eq!(mock.out_calls(), 3);
        assert_eq!(mock.written_bytes(), data);
    }

    #[test]
    fn test_write_gives_up_after_max_stalls() {
        let mock = MockTransport::new();
        mock.queue_out_repeated(MockStep::Timeout, 10);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let err = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(4).as_slice(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::Timeout { stalls: 5 }));
        assert_eq!(mock.out_calls(), 5);
    }

    #[test]
    fn test_write_recovers_from_stalls() {
        let mock = MockTransport::new();
        mock.queue_out_repeated(MockStep::Stall, 4);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let n = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(4).as_slice(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(n, 4);
        assert_eq!(mock.out_calls(), 5);
    }

    #[test]
    fn test_write_other_error_is_io() {
        let mock = MockTransport::new();
        mock.queue_out(MockStep::Fail("babble".into()));
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let err = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(4).as_slice(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::Io(TransportError::Failed(_))));
    }

    #[test]
    fn test_write_end_of_stream_is_io() {
        let mock = MockTransport::new();
        mock.queue_out(MockStep::EndOfStream);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let err = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(4).as_slice(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::Io(TransportError::EndOfStream)));
        assert_eq!(mock.out_calls(), 1);
    }

    #[test]
    fn test_write_disconnect_is_no_device() {
        let mock = MockTransport::new();
        mock.queue_out(MockStep::Accept);
        mock.queue_out(MockStep::Disconnect);
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let err = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(16).as_slice(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::NoDevice));
    }

    #[test]
    fn test_write_stops_when_device_leaves() {
        let mock = MockTransport::new();
        let present = Arc::new(AtomicBool::new(true));
        // The device drops off the bus while the first chunk is on the wire.
        let flag = present.clone();
        mock.set_transfer_hook(move |_, _| flag.store(false, Ordering::SeqCst));
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let err = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(16).as_slice(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, AwError::NoDevice));
        assert_eq!(mock.out_calls(), 1);
    }

    #[test]
    fn test_write_cancelled_returns_confirmed_bytes() {
        let mock = MockTransport::new();
        mock.queue_out(MockStep::Accept);
        mock.queue_out_repeated(MockStep::Stall, 3);
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        mock.set_transfer_hook(move |_, call| {
            if call == 1 {
                remote.cancel();
            }
        });
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let n = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(16).as_slice(),
            &cancel,
        )
        .unwrap();

        assert_eq!(n, 8);
        assert_eq!(mock.out_calls(), 2);
    }

    #[test]
    fn test_write_cancelled_before_any_byte() {
        let mock = MockTransport::new();
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            payload(4).as_slice(),
            &cancel,
        )
        .unwrap_err();

        assert!(matches!(err, AwError::Interrupted));
        assert_eq!(mock.out_calls(), 0);
    }

    #[test]
    fn test_write_empty_is_noop() {
        let mock = MockTransport::new();
        let present = AtomicBool::new(true);
        let config = fast_config();
        let mut obuf = [0u8; 8];

        let n = write_stream(
            &link(&mock, &present, &config),
            &mut obuf,
            &[0u8; 0][..],
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(n, 0);
        assert_eq!(mock.out_calls(), 0);
    }
}
