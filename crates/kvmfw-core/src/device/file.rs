//! File-backed EEPROM image, used for dry runs.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info};

use super::traits::{DeviceError, EepromDevice};

/// Writes chunks into a local file at their EEPROM offsets.
pub struct FileEeprom {
    file: Mutex<File>,
}

impl FileEeprom {
    /// Open (or create) the image file. Existing contents are kept.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| DeviceError::OpenFailed(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Opened EEPROM image file");
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EepromDevice for FileEeprom {
    fn write_eeprom(&self, address: u16, payload: &[u8]) -> Result<(), DeviceError> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(address as u64))?;
        file.write_all(payload)?;
        file.flush()?;
        debug!(address = %format!("0x{:04X}", address), len = payload.len(), "Wrote chunk to file");
        Ok(())
    }

    fn read_eeprom(&self, address: u16, len: usize) -> Result<Vec<u8>, DeviceError> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(address as u64))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
