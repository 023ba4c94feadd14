//! Firmware data model: descriptor, image, chunks and the write cursor.

use std::fmt;
use std::str::FromStr;

use crate::error::UpdateError;

/// Size of the EEPROM address space (16-bit addresses).
pub const EEPROM_CAPACITY: usize = 0x1_0000;

/// Parsed "latest firmware" pointer: `<buildId>,<filename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareDescriptor {
    pub build_id: String,
    pub filename: String,
}

impl FirmwareDescriptor {
    /// Parse a descriptor body. Fields past the second are ignored.
    pub fn parse(text: &str) -> Result<Self, UpdateError> {
        let mut parts = text.split(',').map(str::trim);

        let build_id = parts.next().unwrap_or_default();
        let filename = parts.next().ok_or_else(|| {
            UpdateError::InvalidResponse(format!(
                "expected '<build>,<filename>', got {:?}",
                text.trim()
            ))
        })?;

        if filename.is_empty() {
            return Err(UpdateError::InvalidResponse(
                "descriptor has an empty filename".into(),
            ));
        }

        Ok(Self {
            build_id: build_id.to_string(),
            filename: filename.to_string(),
        })
    }

    /// Parse raw bytes as served over HTTP.
    pub fn from_bytes(body: &[u8]) -> Result<Self, UpdateError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| UpdateError::InvalidResponse(format!("descriptor is not UTF-8: {}", e)))?;
        Self::parse(text)
    }
}

impl FromStr for FirmwareDescriptor {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FirmwareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.filename, self.build_id)
    }
}

/// Raw firmware binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate the image as device chunks starting at `start`.
    pub fn chunks(&self, start: u16, chunk_size: usize) -> ChunkIter<'_> {
        ChunkIter {
            cursor: WriteCursor::new(start, self.data.len()),
            data: &self.data,
            chunk_size,
        }
    }
}

/// One device command's worth of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub address: u16,
    pub payload: &'a [u8],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Iteration state of one write pass.
///
/// Invariants: `bytes_written <= total` and
/// `next_address == start + bytes_written`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCursor {
    start: u16,
    next_address: u16,
    bytes_written: usize,
    total: usize,
}

impl WriteCursor {
    pub fn new(start: u16, total: usize) -> Self {
        Self {
            start,
            next_address: start,
            bytes_written: 0,
            total,
        }
    }

    /// Reject images that would run past the end of the address space.
    pub fn check_bounds(&self) -> Result<(), UpdateError> {
        if self.start as usize + self.total > EEPROM_CAPACITY {
            return Err(UpdateError::ImageTooLarge {
                size: self.total,
                start: self.start,
                capacity: EEPROM_CAPACITY,
            });
        }
        Ok(())
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn next_address(&self) -> u16 {
        self.next_address
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.total - self.bytes_written
    }

    pub fn is_done(&self) -> bool {
        self.bytes_written >= self.total
    }

    /// Fraction written, 1.0 for an empty image.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.bytes_written as f64 / self.total as f64
        }
    }

    /// Record `len` bytes as written.
    pub fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.remaining());
        self.bytes_written += len;
        // Wraps to 0 only when the image ends exactly at the top of the space.
        self.next_address = self.start.wrapping_add(self.bytes_written as u16);
    }
}

/// Chunk iterator that advances its own cursor.
#[derive(Debug)]
pub struct ChunkIter<'a> {
    cursor: WriteCursor,
    data: &'a [u8],
    chunk_size: usize,
}

impl<'a> ChunkIter<'a> {
    /// Total chunks, including a trailing partial one.
    pub fn total(&self) -> usize {
        self.cursor.total().div_ceil(self.chunk_size)
    }

    pub fn cursor(&self) -> &WriteCursor {
        &self.cursor
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_done() {
            return None;
        }

        let offset = self.cursor.bytes_written();
        let len = self.cursor.remaining().min(self.chunk_size);
        let chunk = Chunk {
            address: self.cursor.next_address(),
            payload: &self.data[offset..offset + len],
        };
        self.cursor.advance(len);

        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor() {
        let d = FirmwareDescriptor::parse("25022713,Openterface_Firmware_250306.bin").unwrap();
        assert_eq!(d.build_id, "25022713");
        assert_eq!(d.filename, "Openterface_Firmware_250306.bin");
    }

    #[test]
    fn test_parse_descriptor_trims_and_ignores_extra_fields() {
        let d: FirmwareDescriptor = " 25022713 , fw.bin ,extra\r\n".parse().unwrap();
        assert_eq!(d.build_id, "25022713");
        assert_eq!(d.filename, "fw.bin");
    }

    #[test]
    fn test_parse_descriptor_rejects_malformed() {
        assert!(matches!(
            FirmwareDescriptor::parse("nocomma"),
            Err(UpdateError::InvalidResponse(_))
        ));
        assert!(matches!(
            FirmwareDescriptor::parse("25022713,  \n"),
            Err(UpdateError::InvalidResponse(_))
        ));
        assert!(matches!(
            FirmwareDescriptor::from_bytes(&[0xFF, 0xFE, b',', b'a']),
            Err(UpdateError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_chunk_iter_lengths_and_addresses() {
        let image = FirmwareImage::from_bytes((0..150u8).collect());
        let iter = image.chunks(0x0100, 64);
        assert_eq!(iter.total(), 3);

        let chunks: Vec<_> = iter.collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].address, 0x0100);
        assert_eq!(chunks[0].len(), 64);
        assert_eq!(chunks[1].address, 0x0140);
        assert_eq!(chunks[1].len(), 64);
        assert_eq!(chunks[2].address, 0x0180);
        assert_eq!(chunks[2].len(), 22);
        assert_eq!(chunks[2].payload[0], 128);
    }

    #[test]
    fn test_chunk_iter_exact_multiple() {
        let image = FirmwareImage::from_bytes(vec![0xAA; 128]);
        let lens: Vec<_> = image.chunks(0, 64).map(|c| c.len()).collect();
        assert_eq!(lens, vec![64, 64]);
    }

    #[test]
    fn test_empty_image_has_no_chunks() {
        let image = FirmwareImage::from_bytes(Vec::new());
        assert_eq!(image.chunks(0, 64).count(), 0);
        assert_eq!(WriteCursor::new(0, 0).fraction(), 1.0);
    }

    #[test]
    fn test_cursor_bounds() {
        assert!(WriteCursor::new(0, EEPROM_CAPACITY).check_bounds().is_ok());
        assert!(WriteCursor::new(0x10, EEPROM_CAPACITY - 0x10).check_bounds().is_ok());
        assert!(matches!(
            WriteCursor::new(1, EEPROM_CAPACITY).check_bounds(),
            Err(UpdateError::ImageTooLarge { .. })
        ));
    }

    #[test]
    fn test_cursor_advance() {
        let mut cursor = WriteCursor::new(0x20, 100);
        cursor.advance(64);
        assert_eq!(cursor.next_address(), 0x60);
        assert_eq!(cursor.bytes_written(), 64);
        assert_eq!(cursor.remaining(), 36);
        cursor.advance(36);
        assert!(cursor.is_done());
        assert_eq!(cursor.fraction(), 1.0);
    }
}
