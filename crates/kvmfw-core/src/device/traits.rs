//! EEPROM write capability.
//!
//! Defines the `EepromDevice` trait that the chunk writer drives,
//! allowing different implementations (HID bridge, image file, mock).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device rejected write at 0x{address:04X}")]
    Rejected { address: u16 },

    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    NotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        DeviceError::Io(e.to_string())
    }
}

/// Abstract EEPROM interface.
///
/// Calls are issued one at a time; the device protocol has no notion of
/// overlapping commands.
pub trait EepromDevice: Send + Sync {
    /// Write one chunk at `address`.
    fn write_eeprom(&self, address: u16, payload: &[u8]) -> Result<(), DeviceError>;

    /// Write a whole image, chunking internally and reporting progress as
    /// a fraction in `0.0..=1.0`.
    fn write_eeprom_streaming(
        &self,
        _start: u16,
        _data: &[u8],
        _on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("streaming EEPROM write"))
    }

    /// Read `len` bytes starting at `address`.
    fn read_eeprom(&self, _address: u16, _len: usize) -> Result<Vec<u8>, DeviceError> {
        Err(DeviceError::Unsupported("EEPROM read"))
    }
}

impl<T: EepromDevice + ?Sized> EepromDevice for std::sync::Arc<T> {
    fn write_eeprom(&self, address: u16, payload: &[u8]) -> Result<(), DeviceError> {
        (**self).write_eeprom(address, payload)
    }

    fn write_eeprom_streaming(
        &self,
        start: u16,
        data: &[u8],
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), DeviceError> {
        (**self).write_eeprom_streaming(start, data, on_progress)
    }

    fn read_eeprom(&self, address: u16, len: usize) -> Result<Vec<u8>, DeviceError> {
        (**self).read_eeprom(address, len)
    }
}
