//! Chunk writer: streams an image into the EEPROM in strict address order.
//!
//! The bridge's command channel accepts one small write at a time and
//! needs a settling delay between writes, so chunks are issued
//! sequentially with no overlap and no reordering. The first rejected
//! chunk aborts the pass; its start address is reported.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use crate::cancel::CancelToken;
use crate::config::{UpdateConfig, WriteStrategy};
use crate::device::{DeviceError, EepromDevice};
use crate::error::{UpdateError, chunk_error};
use crate::firmware::{FirmwareImage, WriteCursor};

/// Outcome of a completed write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Device write calls issued.
    pub device_calls: usize,
    /// Bytes accepted by the device.
    pub bytes: usize,
}

/// Drives a [`FirmwareImage`] through an [`EepromDevice`].
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    chunk_size: usize,
    pacing: Duration,
    strategy: WriteStrategy,
}

impl ChunkWriter {
    /// Fails when `chunk_size` is zero.
    pub fn new(chunk_size: usize, pacing: Duration) -> Result<Self, UpdateError> {
        if chunk_size == 0 {
            return Err(UpdateError::InvalidConfig("chunk_size must be > 0".into()));
        }
        Ok(Self {
            chunk_size,
            pacing,
            strategy: WriteStrategy::Chunked,
        })
    }

    pub fn from_config(config: &UpdateConfig) -> Result<Self, UpdateError> {
        Ok(Self::new(config.chunk_size, config.chunk_delay())?.with_strategy(config.strategy))
    }

    pub fn with_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write `image` at `start`, reporting the written fraction after each
    /// accepted chunk. On success the last report is exactly 1.0.
    #[instrument(skip_all, fields(start = %format!("0x{:04X}", start), len = image.len(), strategy = ?self.strategy))]
    pub fn write<D: EepromDevice + ?Sized>(
        &self,
        image: &FirmwareImage,
        start: u16,
        device: &D,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(f64),
    ) -> Result<WriteSummary, UpdateError> {
        let cursor = WriteCursor::new(start, image.len());
        cursor.check_bounds()?;

        if image.is_empty() {
            on_progress(1.0);
            return Ok(WriteSummary {
                device_calls: 0,
                bytes: 0,
            });
        }

        let summary = match self.strategy {
            WriteStrategy::Chunked => self.write_chunked(image, cursor, device, cancel, &mut on_progress)?,
            WriteStrategy::Delegated => self.write_delegated(image, start, device, cancel, &mut on_progress)?,
        };

        info!(calls = summary.device_calls, bytes = summary.bytes, "EEPROM write complete");
        Ok(summary)
    }

    fn write_chunked<D: EepromDevice + ?Sized>(
        &self,
        image: &FirmwareImage,
        mut cursor: WriteCursor,
        device: &D,
        cancel: &CancelToken,
        on_progress: &mut impl FnMut(f64),
    ) -> Result<WriteSummary, UpdateError> {
        let data = image.as_bytes();
        let mut calls = 0usize;

        while !cursor.is_done() {
            if calls > 0 && !self.pacing.is_zero() {
                thread::sleep(self.pacing);
            }
            cancel.check()?;

            let offset = cursor.bytes_written();
            let len = cursor.remaining().min(self.chunk_size);
            let address = cursor.next_address();

            calls += 1;
            device
                .write_eeprom(address, &data[offset..offset + len])
                .map_err(|e| {
                    warn!(address = %format!("0x{:04X}", address), error = %e, "Chunk write failed");
                    chunk_error(address, e)
                })?;
            trace!(address = %format!("0x{:04X}", address), len, "Chunk written");

            cursor.advance(len);
            on_progress(cursor.fraction());
        }

        Ok(WriteSummary {
            device_calls: calls,
            bytes: cursor.bytes_written(),
        })
    }

    fn write_delegated<D: EepromDevice + ?Sized>(
        &self,
        image: &FirmwareImage,
        start: u16,
        device: &D,
        cancel: &CancelToken,
        on_progress: &mut impl FnMut(f64),
    ) -> Result<WriteSummary, UpdateError> {
        cancel.check()?;

        let mut last = 0.0f64;
        device
            .write_eeprom_streaming(start, image.as_bytes(), &mut |p| {
                let p = p.clamp(0.0, 1.0);
                if p > last {
                    last = p;
                    on_progress(p);
                }
            })
            .map_err(|e| match e {
                DeviceError::Timeout { timeout_ms } => UpdateError::Timeout {
                    operation: format!("streaming EEPROM write ({}ms)", timeout_ms),
                },
                other => UpdateError::WriteFailed(other.to_string()),
            })?;

        if last < 1.0 {
            on_progress(1.0);
        }

        Ok(WriteSummary {
            device_calls: 1,
            bytes: image.len(),
        })
    }

    /// Read the image back and compare it chunk by chunk.
    #[instrument(skip_all, fields(start = %format!("0x{:04X}", start), len = image.len()))]
    pub fn verify<D: EepromDevice + ?Sized>(
        &self,
        image: &FirmwareImage,
        start: u16,
        device: &D,
        cancel: &CancelToken,
    ) -> Result<(), UpdateError> {
        for chunk in image.chunks(start, self.chunk_size) {
            cancel.check()?;
            let read = device
                .read_eeprom(chunk.address, chunk.len())
                .map_err(|e| match e {
                    DeviceError::Timeout { timeout_ms } => UpdateError::Timeout {
                        operation: format!("EEPROM read at 0x{:04X} ({}ms)", chunk.address, timeout_ms),
                    },
                    DeviceError::Unsupported(what) => {
                        UpdateError::WriteFailed(format!("cannot verify: {} unsupported", what))
                    }
                    _ => UpdateError::VerifyFailed {
                        address: chunk.address,
                    },
                })?;

            if let Some(i) = read
                .iter()
                .zip(chunk.payload)
                .position(|(a, b)| a != b)
                .or((read.len() != chunk.len()).then_some(read.len()))
            {
                let address = chunk.address.wrapping_add(i as u16);
                warn!(address = %format!("0x{:04X}", address), "Read-back mismatch");
                return Err(UpdateError::VerifyFailed { address });
            }
        }
        debug!("Read-back verification passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockEeprom;
    use crate::firmware::EEPROM_CAPACITY;

    fn writer(chunk_size: usize) -> ChunkWriter {
        ChunkWriter::new(chunk_size, Duration::ZERO).unwrap()
    }

    fn image(len: usize) -> FirmwareImage {
        FirmwareImage::from_bytes((0..len).map(|i| (i % 251) as u8).collect())
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        assert!(matches!(
            ChunkWriter::new(0, Duration::ZERO),
            Err(UpdateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_chunk_count_lengths_and_addresses() {
        let mock = MockEeprom::new();
        let img = image(200);
        let mut progress = Vec::new();

        let summary = writer(64)
            .write(&img, 0x0010, &mock, &CancelToken::new(), |p| progress.push(p))
            .unwrap();

        assert_eq!(summary, WriteSummary { device_calls: 4, bytes: 200 });
        let writes = mock.get_writes();
        let lens: Vec<_> = writes.iter().map(|(_, p)| p.len()).collect();
        let addrs: Vec<_> = writes.iter().map(|(a, _)| *a).collect();
        assert_eq!(lens, vec![64, 64, 64, 8]);
        assert_eq!(addrs, vec![0x0010, 0x0050, 0x0090, 0x00D0]);
        assert_eq!(mock.contents(0x0010, 200), img.as_bytes());

        assert_eq!(progress.len(), 4);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&1.0));
    }

    #[test]
    fn test_exact_multiple() {
        let mock = MockEeprom::new();
        writer(64)
            .write(&image(128), 0, &mock, &CancelToken::new(), |_| {})
            .unwrap();
        let lens: Vec<_> = mock.get_writes().iter().map(|(_, p)| p.len()).collect();
        assert_eq!(lens, vec![64, 64]);
    }

    #[test]
    fn test_empty_image() {
        let mock = MockEeprom::new();
        let mut progress = Vec::new();
        let summary = writer(64)
            .write(&image(0), 0, &mock, &CancelToken::new(), |p| progress.push(p))
            .unwrap();

        assert_eq!(summary.device_calls, 0);
        assert!(mock.get_writes().is_empty());
        assert_eq!(progress, vec![1.0]);
    }

    #[test]
    fn test_failure_stops_at_failing_chunk() {
        let mock = MockEeprom::new();
        mock.fail_on_write(3);

        let err = writer(64)
            .write(&image(300), 0x0100, &mock, &CancelToken::new(), |_| {})
            .unwrap_err();

        assert_eq!(err, UpdateError::ChunkWriteFailed { address: 0x0180 });
        assert_eq!(mock.get_writes().len(), 3);
    }

    #[test]
    fn test_rejects_image_past_address_space() {
        let mock = MockEeprom::new();
        let err = writer(64)
            .write(&image(EEPROM_CAPACITY), 1, &mock, &CancelToken::new(), |_| {})
            .unwrap_err();
        assert!(matches!(err, UpdateError::ImageTooLarge { .. }));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_image_filling_address_space() {
        let mock = MockEeprom::new();
        let summary = writer(4096)
            .write(&image(EEPROM_CAPACITY), 0, &mock, &CancelToken::new(), |_| {})
            .unwrap();
        assert_eq!(summary.device_calls, 16);
        assert_eq!(mock.get_writes().last().map(|(a, _)| *a), Some(0xF000));
    }

    #[test]
    fn test_cancel_stops_before_next_write() {
        let mock = MockEeprom::new();
        let cancel = CancelToken::new();
        let mut calls = 0;

        let err = writer(16)
            .write(&image(64), 0, &mock, &cancel, |_| {
                calls += 1;
                if calls == 2 {
                    cancel.cancel();
                }
            })
            .unwrap_err();

        assert_eq!(err, UpdateError::Cancelled);
        assert_eq!(mock.get_writes().len(), 2);
    }

    #[test]
    fn test_delegated_forwards_progress() {
        let mock = MockEeprom::new();
        mock.enable_streaming();
        let img = image(100);
        let mut progress = Vec::new();

        let summary = writer(64)
            .with_strategy(WriteStrategy::Delegated)
            .write(&img, 0x20, &mock, &CancelToken::new(), |p| progress.push(p))
            .unwrap();

        assert_eq!(summary.device_calls, 1);
        assert_eq!(mock.contents(0x20, 100), img.as_bytes());
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last(), Some(&1.0));
    }

    #[test]
    fn test_delegated_unsupported() {
        let mock = MockEeprom::new();
        let err = writer(64)
            .with_strategy(WriteStrategy::Delegated)
            .write(&image(10), 0, &mock, &CancelToken::new(), |_| {})
            .unwrap_err();
        assert!(matches!(err, UpdateError::WriteFailed(_)));
    }

    #[test]
    fn test_verify_detects_lost_write() {
        let mock = MockEeprom::new();
        mock.lose_write(2);
        let img = image(128);
        let w = writer(64);

        w.write(&img, 0, &mock, &CancelToken::new(), |_| {}).unwrap();
        let err = w.verify(&img, 0, &mock, &CancelToken::new()).unwrap_err();
        assert_eq!(err, UpdateError::VerifyFailed { address: 0x40 });
    }

    #[test]
    fn test_verify_passes() {
        let mock = MockEeprom::new();
        let img = image(100);
        let w = writer(32);
        w.write(&img, 0x10, &mock, &CancelToken::new(), |_| {}).unwrap();
        assert!(w.verify(&img, 0x10, &mock, &CancelToken::new()).is_ok());
    }
}
