//! In-memory firmware image and the stages that patch it

mod crc;
mod identity;
mod loader;
mod vector;

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

use crate::Error;

pub use self::crc::{crc32, finalize_crc, stored_crc, CRC_SIZE};
pub use identity::{board_id_ascii, IdentityBlock, IdentityPatch, IDENTITY_POINTER_OFFSET};
pub use loader::{ImageFormat, LoadOptions, PADDING_BYTE};
pub use vector::{patch_checksum, VectorTable, CHECKSUM_OFFSET, VECTOR_COUNT, VECTOR_TABLE_SIZE};

/// Execution start address carried by a hex file, if it had one
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StartAddress {
    /// Record type 0x03
    Segment { cs: u16, ip: u16 },
    /// Record type 0x05
    Linear(u32),
}

/// A single contiguous region of memory starting at `base_address`
///
/// Every address in `base_address..base_address + len()` is backed by a byte, there are no holes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Image {
    base_address: u32,
    bytes: Vec<u8>,
    start_address: Option<StartAddress>,
}

impl Image {
    /// Creates a new image of `bytes` located at `base_address`
    pub fn new(base_address: u32, bytes: Vec<u8>) -> Result<Image, Error> {
        if bytes.is_empty() {
            return Err(Error::EmptyImage);
        }

        let end = u64::from(base_address) + bytes.len() as u64;

        if end > 1 << 32 {
            return Err(Error::AddressOverflow(base_address, bytes.len()));
        }

        Ok(Image {
            base_address,
            bytes,
            start_address: None,
        })
    }

    /// Sets the execution start address that will be written to hex output
    pub fn with_start_address(mut self, start_address: Option<StartAddress>) -> Image {
        self.start_address = start_address;
        self
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn start_address(&self) -> Option<StartAddress> {
        self.start_address
    }

    /// The number of bytes in the image
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The exclusive end address of the image
    pub fn end_address(&self) -> u64 {
        u64::from(self.base_address) + self.bytes.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns an error if the image is shorter than `min_len` bytes
    pub fn require_len(&self, min_len: u32) -> Result<(), Error> {
        if self.len() < min_len {
            return Err(Error::TooSmall(self.len(), min_len));
        }

        Ok(())
    }

    /// Translates `len` bytes at the absolute `address` into a range of buffer offsets
    pub fn offset_range(&self, address: u32, len: u32) -> Option<Range<usize>> {
        let start = address.checked_sub(self.base_address)? as usize;
        let end = start.checked_add(len as usize)?;

        if end > self.bytes.len() {
            return None;
        }

        Some(start..end)
    }

    /// Reads a little endian word at the given offset from the start of the image
    pub(crate) fn read_u32_at(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.bytes[offset..offset + 4])
    }

    /// Writes `value` as a little endian word at the given offset from the start of the image
    pub(crate) fn write_u32_at(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.bytes[offset..offset + 4], value);
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
