//! Error taxonomy for a firmware update run.

use thiserror::Error;

use crate::device::DeviceError;
use crate::events::UpdateState;
use crate::net::FetchError;

/// Terminal failure of an update run.
///
/// Resolver errors (`InvalidUrl`, `InvalidResponse`, `DownloadFailed`,
/// `Network`) are raised before any byte reaches the device. Errors raised
/// while writing may leave the EEPROM partially written (see
/// [`UpdateError::device_touched`]); nothing is rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Download failed with HTTP status {status}")]
    DownloadFailed { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("EEPROM write failed at address 0x{address:04X}")]
    ChunkWriteFailed { address: u16 },

    #[error("EEPROM write failed: {0}")]
    WriteFailed(String),

    #[error("Verification failed at address 0x{address:04X}")]
    VerifyFailed { address: u16 },

    #[error(
        "Image of {size} bytes at 0x{start:04X} exceeds EEPROM address space of {capacity} bytes"
    )]
    ImageTooLarge {
        size: usize,
        start: u16,
        capacity: usize,
    },

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Update cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("An update is already in progress")]
    Busy,
}

impl UpdateError {
    /// Whether the device may hold a partially written image after this
    /// error ended a run in `phase`.
    ///
    /// Timeouts, cancellation and generic write failures only count once
    /// writing has begun.
    pub fn device_touched(&self, phase: UpdateState) -> bool {
        match self {
            UpdateError::ChunkWriteFailed { .. } | UpdateError::VerifyFailed { .. } => true,
            UpdateError::WriteFailed(_) | UpdateError::Timeout { .. } | UpdateError::Cancelled => {
                phase == UpdateState::Writing
            }
            _ => false,
        }
    }
}

impl From<FetchError> for UpdateError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout { url } => UpdateError::Timeout {
                operation: format!("fetch of {}", url),
            },
            FetchError::Request(msg) => UpdateError::Network(msg),
        }
    }
}

/// Maps a failed device call on the chunk starting at `address`.
pub(crate) fn chunk_error(address: u16, err: DeviceError) -> UpdateError {
    match err {
        DeviceError::Timeout { timeout_ms } => UpdateError::Timeout {
            operation: format!("EEPROM write at 0x{:04X} ({}ms)", address, timeout_ms),
        },
        DeviceError::Unsupported(what) => UpdateError::WriteFailed(what.to_string()),
        _ => UpdateError::ChunkWriteFailed { address },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_error_mapping() {
        assert_eq!(
            chunk_error(0x40, DeviceError::Rejected { address: 0x40 }),
            UpdateError::ChunkWriteFailed { address: 0x40 }
        );
        assert!(matches!(
            chunk_error(0x40, DeviceError::Timeout { timeout_ms: 100 }),
            UpdateError::Timeout { .. }
        ));
    }

    #[test]
    fn test_display_includes_address() {
        let e = UpdateError::ChunkWriteFailed { address: 0x0A40 };
        assert_eq!(e.to_string(), "EEPROM write failed at address 0x0A40");
        assert!(e.device_touched(UpdateState::Writing));
        assert!(!UpdateError::DownloadFailed { status: 404 }.device_touched(UpdateState::Downloading));
    }

    #[test]
    fn test_device_touched_depends_on_phase() {
        let timeout = UpdateError::Timeout {
            operation: "EEPROM write at 0x0040 (50ms)".into(),
        };
        assert!(timeout.device_touched(UpdateState::Writing));
        assert!(!timeout.device_touched(UpdateState::Downloading));
        assert!(UpdateError::Cancelled.device_touched(UpdateState::Writing));
        assert!(!UpdateError::Cancelled.device_touched(UpdateState::Downloading));
    }
}
