//! Mock EEPROM for testing.

use std::sync::{Arc, Condvar, Mutex};

use super::traits::{DeviceError, EepromDevice};
use crate::firmware::EEPROM_CAPACITY;

/// Chunk size the mock uses for its own streaming writes.
const STREAMING_CHUNK: usize = 16;

#[derive(Debug, Default)]
struct Faults {
    /// 1-based write number that is rejected.
    fail_on_write: Option<usize>,
    /// 1-based write number that is acknowledged but not stored.
    lose_write: Option<usize>,
    streaming: bool,
    readable: bool,
}

/// In-memory EEPROM for unit testing writer and session logic.
///
/// Clones share state, so a test can keep one handle while the session
/// owns another.
#[derive(Clone)]
pub struct MockEeprom {
    memory: Arc<Mutex<Vec<u8>>>,
    /// Captured writes as (address, payload).
    write_log: Arc<Mutex<Vec<(u16, Vec<u8>)>>>,
    faults: Arc<Mutex<Faults>>,
    /// While true, writes block.
    held: Arc<(Mutex<bool>, Condvar)>,
    /// (writes in progress, most ever in progress at once)
    concurrency: Arc<Mutex<(usize, usize)>>,
}

impl MockEeprom {
    pub fn new() -> Self {
        Self {
            memory: Arc::new(Mutex::new(vec![0xFF; EEPROM_CAPACITY])),
            write_log: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Mutex::new(Faults {
                readable: true,
                ..Default::default()
            })),
            held: Arc::new((Mutex::new(false), Condvar::new())),
            concurrency: Arc::new(Mutex::new((0, 0))),
        }
    }

    /// Reject the `n`-th write (1-based).
    pub fn fail_on_write(&self, n: usize) {
        self.faults.lock().unwrap().fail_on_write = Some(n);
    }

    /// Acknowledge the `n`-th write (1-based) without storing it.
    pub fn lose_write(&self, n: usize) {
        self.faults.lock().unwrap().lose_write = Some(n);
    }

    /// Accept whole-image streaming writes.
    pub fn enable_streaming(&self) {
        self.faults.lock().unwrap().streaming = true;
    }

    /// Make reads unsupported.
    pub fn disable_reads(&self) {
        self.faults.lock().unwrap().readable = false;
    }

    /// Block subsequent writes until [`release`](Self::release). A blocked
    /// write already appears in [`get_writes`](Self::get_writes).
    pub fn hold(&self) {
        *self.held.0.lock().unwrap() = true;
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.held;
        *lock.lock().unwrap() = false;
        cvar.notify_all();
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Most writes that were ever in progress at the same time.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.concurrency.lock().unwrap().1
    }

    /// Copy of `len` bytes of memory at `address`.
    pub fn contents(&self, address: u16, len: usize) -> Vec<u8> {
        let start = address as usize;
        self.memory.lock().unwrap()[start..start + len].to_vec()
    }

    fn wait_while_held(&self) {
        let (lock, cvar) = &*self.held;
        let mut held = lock.lock().unwrap();
        while *held {
            held = cvar.wait(held).unwrap();
        }
    }

    fn store(&self, address: u16, payload: &[u8]) -> Result<(), DeviceError> {
        let n = {
            let mut log = self.write_log.lock().unwrap();
            log.push((address, payload.to_vec()));
            log.len()
        };

        {
            let mut c = self.concurrency.lock().unwrap();
            c.0 += 1;
            c.1 = c.1.max(c.0);
        }

        // Logged before blocking, so a held write is already visible.
        self.wait_while_held();
        let result = self.apply(n, address, payload);

        self.concurrency.lock().unwrap().0 -= 1;
        result
    }

    fn apply(&self, n: usize, address: u16, payload: &[u8]) -> Result<(), DeviceError> {
        let faults = self.faults.lock().unwrap();
        if faults.fail_on_write == Some(n) {
            return Err(DeviceError::Rejected { address });
        }
        if faults.lose_write == Some(n) {
            return Ok(());
        }
        drop(faults);

        let start = address as usize;
        let mut memory = self.memory.lock().unwrap();
        if start + payload.len() > memory.len() {
            return Err(DeviceError::Rejected { address });
        }
        memory[start..start + payload.len()].copy_from_slice(payload);
        Ok(())
    }
}

impl Default for MockEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl EepromDevice for MockEeprom {
    fn write_eeprom(&self, address: u16, payload: &[u8]) -> Result<(), DeviceError> {
        self.store(address, payload)
    }

    fn write_eeprom_streaming(
        &self,
        start: u16,
        data: &[u8],
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), DeviceError> {
        if !self.faults.lock().unwrap().streaming {
            return Err(DeviceError::Unsupported("streaming EEPROM write"));
        }

        let mut written = 0usize;
        for chunk in data.chunks(STREAMING_CHUNK) {
            self.store(start.wrapping_add(written as u16), chunk)?;
            written += chunk.len();
            on_progress(written as f64 / data.len() as f64);
        }
        on_progress(1.0);
        Ok(())
    }

    fn read_eeprom(&self, address: u16, len: usize) -> Result<Vec<u8>, DeviceError> {
        if !self.faults.lock().unwrap().readable {
            return Err(DeviceError::Unsupported("EEPROM read"));
        }
        let start = address as usize;
        let memory = self.memory.lock().unwrap();
        memory
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or(DeviceError::Rejected { address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_write_capture() {
        let mock = MockEeprom::new();
        mock.write_eeprom(0x10, b"Hello").unwrap();
        mock.write_eeprom(0x15, b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (0x10, b"Hello".to_vec()));
        assert_eq!(mock.contents(0x10, 10), b"HelloWorld");
        assert_eq!(mock.read_eeprom(0x15, 5).unwrap(), b"World");
    }

    #[test]
    fn test_mock_fail_on_write() {
        let mock = MockEeprom::new();
        mock.fail_on_write(2);
        assert!(mock.write_eeprom(0, &[1]).is_ok());
        assert_eq!(
            mock.write_eeprom(1, &[2]),
            Err(DeviceError::Rejected { address: 1 })
        );
        assert!(mock.write_eeprom(2, &[3]).is_ok());
        assert_eq!(mock.peak_concurrent_writes(), 1);
    }

    #[test]
    fn test_mock_streaming() {
        let mock = MockEeprom::new();
        let data = vec![0x5A; 40];
        let mut progress = Vec::new();

        assert!(
            mock.write_eeprom_streaming(0, &data, &mut |p| progress.push(p))
                .is_err()
        );

        mock.enable_streaming();
        mock.write_eeprom_streaming(0, &data, &mut |p| progress.push(p))
            .unwrap();
        assert_eq!(mock.get_writes().len(), 3);
        assert_eq!(progress.last(), Some(&1.0));
        assert_eq!(mock.contents(0, 40), data);
    }

    #[test]
    fn test_mock_reads_can_be_disabled() {
        let mock = MockEeprom::new();
        mock.disable_reads();
        assert!(matches!(
            mock.read_eeprom(0, 4),
            Err(DeviceError::Unsupported(_))
        ));
    }
}
