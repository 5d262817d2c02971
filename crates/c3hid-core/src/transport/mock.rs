//! Scripted host bus for testing framing logic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::traits::{BusError, HostBus};

/// One completed write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub address: u8,
    pub bytes: Vec<u8>,
    pub stop: bool,
}

#[derive(Debug, Default)]
struct MockState {
    /// Queued read responses, one per `request_read`.
    responses: VecDeque<Vec<u8>>,
    /// Captured write transactions.
    writes: Vec<MockWrite>,
    /// Transaction being assembled.
    open: Option<(u8, Vec<u8>)>,
    /// Bytes of the current read.
    rx: VecDeque<u8>,
    data_ready: bool,
    nack: bool,
    /// Transmit buffer size; `write` accepts at most this many bytes per transaction.
    write_limit: Option<usize>,
}

/// Mock bus for unit testing the framer.
///
/// Clones share state, so a test can keep a handle after moving the bus into
/// a framer.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the bytes returned by the next `request_read`.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.lock().responses.push_back(bytes.to_vec());
    }

    /// Number of queued responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    /// Get the payload of every captured write.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.iter().map(|w| w.bytes.clone()).collect()
    }

    /// Get every captured write with its address and stop flag.
    pub fn write_records(&self) -> Vec<MockWrite> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn set_data_ready(&self, asserted: bool) {
        self.lock().data_ready = asserted;
    }

    /// Cap the bytes accepted per write transaction, like a small transmit buffer.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.lock().write_limit = limit;
    }

    /// Make every transfer fail with a NACK.
    pub fn set_nack(&self, nack: bool) {
        self.lock().nack = nack;
    }
}

impl HostBus for MockBus {
    fn begin_transmission(&mut self, address: u8) {
        self.lock().open = Some((address, Vec::new()));
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        let mut state = self.lock();
        let limit = state.write_limit;
        let (_, buf) = state.open.as_mut().ok_or(BusError::NotStarted)?;
        let room = limit.map_or(bytes.len(), |l| l.saturating_sub(buf.len()));
        let accepted = bytes.len().min(room);
        buf.extend_from_slice(&bytes[..accepted]);
        Ok(accepted)
    }

    fn end_transmission(&mut self, send_stop: bool) -> Result<(), BusError> {
        let mut state = self.lock();
        let (address, bytes) = state.open.take().ok_or(BusError::NotStarted)?;
        if state.nack {
            return Err(BusError::Nack { address });
        }
        state.writes.push(MockWrite {
            address,
            bytes,
            stop: send_stop,
        });
        Ok(())
    }

    fn request_read(
        &mut self,
        address: u8,
        count: usize,
        _send_stop: bool,
    ) -> Result<usize, BusError> {
        let mut state = self.lock();
        if state.nack {
            return Err(BusError::Nack { address });
        }
        let mut response = state
            .responses
            .pop_front()
            .ok_or(BusError::NoResponse { address })?;
        response.truncate(count);
        let available = response.len();
        state.rx = response.into();
        Ok(available)
    }

    fn read(&mut self) -> Result<u8, BusError> {
        self.lock().rx.pop_front().ok_or(BusError::Underflow)
    }

    fn data_ready_asserted(&mut self) -> bool {
        self.lock().data_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_response_queue() {
        let mut mock = MockBus::new();
        mock.queue_response(&[1, 2, 3]);
        mock.queue_response(&[4]);

        assert_eq!(mock.request_read(0x2C, 2, true).unwrap(), 2);
        assert_eq!(mock.read().unwrap(), 1);
        assert_eq!(mock.read().unwrap(), 2);
        assert_eq!(mock.read(), Err(BusError::Underflow));

        assert_eq!(mock.request_read(0x2C, 8, true).unwrap(), 1);
        assert_eq!(mock.read().unwrap(), 4);

        // Queue is empty now
        assert!(mock.request_read(0x2C, 1, true).is_err());
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockBus::new();
        let handle = mock.clone();

        mock.begin_transmission(0x2C);
        mock.write(b"Hello").unwrap();
        mock.write(b"World").unwrap();
        mock.end_transmission(false).unwrap();

        let writes = handle.write_records();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].bytes, b"HelloWorld");
        assert_eq!(writes[0].address, 0x2C);
        assert!(!writes[0].stop);
    }

    #[test]
    fn test_mock_nack() {
        let mut mock = MockBus::new();
        mock.set_nack(true);
        mock.begin_transmission(0x2C);
        mock.write(b"test").unwrap();
        assert_eq!(
            mock.end_transmission(true),
            Err(BusError::Nack { address: 0x2C })
        );
    }

    #[test]
    fn test_mock_write_limit() {
        let mut mock = MockBus::new();
        mock.set_write_limit(Some(6));
        mock.begin_transmission(0x2C);
        assert_eq!(mock.write(b"Hell").unwrap(), 4);
        assert_eq!(mock.write(b"oWorld").unwrap(), 2);
        mock.end_transmission(true).unwrap();
        assert_eq!(mock.get_writes(), vec![b"HelloW".to_vec()]);
    }

    #[test]
    fn test_write_without_begin_fails() {
        let mut mock = MockBus::new();
        assert_eq!(mock.write(b"x"), Err(BusError::NotStarted));
    }
}
