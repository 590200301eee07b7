//! Mock USB transport for testing.
//!
//! Each direction replays a script of [`MockStep`]s; once a script runs dry
//! the mock behaves like a loopback device: OUT transfers are accepted in
//! full and appended to a FIFO that IN transfers drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{BulkTransport, EndpointInfo, EndpointProvider, TransportError};
use crate::events::Direction;
use crate::protocol::constants::IN_BUFFER_SIZE;

/// Scripted outcome of one transfer call.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// OUT: accept everything. IN: drain the loopback FIFO.
    Accept,
    /// Accept / deliver at most this many bytes.
    Partial(usize),
    /// IN: deliver these bytes instead of FIFO contents.
    Data(Vec<u8>),
    Stall,
    Timeout,
    Status(u32),
    EndOfStream,
    /// Drop off the bus; every later call fails too.
    Disconnect,
    Fail(String),
}

type TransferHook = Arc<dyn Fn(Direction, usize) + Send + Sync>;

/// Mock transport for unit testing session and engine logic.
#[derive(Clone)]
pub struct MockTransport {
    out_script: Arc<Mutex<VecDeque<MockStep>>>,
    in_script: Arc<Mutex<VecDeque<MockStep>>>,
    /// Bytes accepted on OUT and not yet read back.
    fifo: Arc<Mutex<VecDeque<u8>>>,
    /// Captured writes, one entry per accepted OUT transfer.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Requested lengths of IN transfers.
    read_requests: Arc<Mutex<Vec<usize>>>,
    out_calls: Arc<AtomicUsize>,
    in_calls: Arc<AtomicUsize>,
    endpoints: Arc<Mutex<EndpointInfo>>,
    connected: Arc<AtomicBool>,
    hook: Arc<Mutex<Option<TransferHook>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            out_script: Arc::new(Mutex::new(VecDeque::new())),
            in_script: Arc::new(Mutex::new(VecDeque::new())),
            fifo: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            read_requests: Arc::new(Mutex::new(Vec::new())),
            out_calls: Arc::new(AtomicUsize::new(0)),
            in_calls: Arc::new(AtomicUsize::new(0)),
            endpoints: Arc::new(Mutex::new(EndpointInfo {
                bulk_in: 0x81,
                bulk_out: 0x01,
                in_capacity_hint: IN_BUFFER_SIZE,
            })),
            connected: Arc::new(AtomicBool::new(true)),
            hook: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue the outcome of a future OUT transfer.
    pub fn queue_out(&self, step: MockStep) {
        self.out_script.lock().unwrap().push_back(step);
    }

    /// Queue the outcome of a future IN transfer.
    pub fn queue_in(&self, step: MockStep) {
        self.in_script.lock().unwrap().push_back(step);
    }

    /// Queue the same OUT outcome `count` times.
    pub fn queue_out_repeated(&self, step: MockStep, count: usize) {
        let mut script = self.out_script.lock().unwrap();
        script.extend(std::iter::repeat_n(step, count));
    }

    /// Queue the same IN outcome `count` times.
    pub fn queue_in_repeated(&self, step: MockStep, count: usize) {
        let mut script = self.in_script.lock().unwrap();
        script.extend(std::iter::repeat_n(step, count));
    }

    /// Preload bytes the device will offer on IN.
    pub fn preload(&self, data: &[u8]) {
        self.fifo.lock().unwrap().extend(data.iter().copied());
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// All captured writes, concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.write_log.lock().unwrap().concat()
    }

    pub fn read_requests(&self) -> Vec<usize> {
        self.read_requests.lock().unwrap().clone()
    }

    pub fn out_calls(&self) -> usize {
        self.out_calls.load(Ordering::SeqCst)
    }

    pub fn in_calls(&self) -> usize {
        self.in_calls.load(Ordering::SeqCst)
    }

    pub fn set_endpoints(&self, endpoints: EndpointInfo) {
        *self.endpoints.lock().unwrap() = endpoints;
    }

    /// Run `hook` at the start of every transfer with its direction and the
    /// zero-based call index for that direction.
    pub fn set_transfer_hook<F>(&self, hook: F)
    where
        F: Fn(Direction, usize) + Send + Sync + 'static,
    {
        *self.hook.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn enter(&self, direction: Direction) -> Result<MockStep, TransportError> {
        let (counter, script) = match direction {
            Direction::Out => (&self.out_calls, &self.out_script),
            Direction::In => (&self.in_calls, &self.in_script),
        };
        let call = counter.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(direction, call);
        }
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        Ok(script.lock().unwrap().pop_front().unwrap_or(MockStep::Accept))
    }

    fn accept(&self, data: &[u8]) -> usize {
        self.write_log.lock().unwrap().push(data.to_vec());
        self.fifo.lock().unwrap().extend(data.iter().copied());
        data.len()
    }

    fn drain(&self, buf: &mut [u8], limit: usize) -> Result<usize, TransportError> {
        let mut fifo = self.fifo.lock().unwrap();
        let n = limit.min(buf.len()).min(fifo.len());
        if n == 0 {
            return Err(TransportError::EndOfStream);
        }
        for (slot, byte) in buf.iter_mut().zip(fifo.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn failure(step: MockStep, timeout: Duration) -> TransportError {
    match step {
        MockStep::Stall => TransportError::Stall,
        MockStep::Timeout => TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        },
        MockStep::Status(code) => TransportError::Status(code),
        MockStep::EndOfStream => TransportError::EndOfStream,
        MockStep::Disconnect => TransportError::Disconnected,
        MockStep::Fail(message) => TransportError::Failed(message),
        other => TransportError::Failed(format!("unexpected step {other:?}")),
    }
}

impl BulkTransport for MockTransport {
    fn bulk_out(
        &self,
        _endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        match self.enter(Direction::Out)? {
            MockStep::Accept | MockStep::Data(_) => Ok(self.accept(data)),
            MockStep::Partial(n) => Ok(self.accept(&data[..n.min(data.len())])),
            MockStep::Disconnect => {
                self.disconnect();
                Err(TransportError::Disconnected)
            }
            step => Err(failure(step, timeout)),
        }
    }

    fn bulk_in(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let step = self.enter(Direction::In)?;
        self.read_requests.lock().unwrap().push(buf.len());
        match step {
            MockStep::Accept => self.drain(buf, usize::MAX),
            MockStep::Partial(n) => self.drain(buf, n),
            MockStep::Data(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            MockStep::Disconnect => {
                self.disconnect();
                Err(TransportError::Disconnected)
            }
            step => Err(failure(step, timeout)),
        }
    }
}

impl EndpointProvider for MockTransport {
    fn discover_endpoints(&self) -> Result<EndpointInfo, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        Ok(*self.endpoints.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_loopback() {
        let mock = MockTransport::new();
        assert_eq!(mock.bulk_out(0x01, b"Hello", T).unwrap(), 5);
        assert_eq!(mock.bulk_out(0x01, b"World", T).unwrap(), 5);

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");

        let mut buf = [0u8; 8];
        assert_eq!(mock.bulk_in(0x81, &mut buf, T).unwrap(), 8);
        assert_eq!(&buf, b"HelloWor");
        assert_eq!(mock.bulk_in(0x81, &mut buf, T).unwrap(), 2);
        assert!(matches!(
            mock.bulk_in(0x81, &mut buf, T),
            Err(TransportError::EndOfStream)
        ));
    }

    #[test]
    fn test_mock_script_order() {
        let mock = MockTransport::new();
        mock.queue_out(MockStep::Stall);
        mock.queue_out(MockStep::Partial(2));

        assert!(matches!(
            mock.bulk_out(0x01, b"abcd", T),
            Err(TransportError::Stall)
        ));
        assert_eq!(mock.bulk_out(0x01, b"abcd", T).unwrap(), 2);
        assert_eq!(mock.bulk_out(0x01, b"cd", T).unwrap(), 2);
        assert_eq!(mock.written_bytes(), b"abcd");
        assert_eq!(mock.out_calls(), 3);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.bulk_out(0x01, b"test", T).is_err());
        assert!(mock.discover_endpoints().is_err());
    }
}
