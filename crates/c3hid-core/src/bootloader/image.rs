//! Firmware image handling and write chunking.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::checksum::fletcher32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ImageError {
    #[error("Image is empty")]
    Empty,
    #[error("Image too small for entry point at offset {offset}: {actual} bytes")]
    NoEntryPoint { offset: usize, actual: usize },
    #[error("Image of {len} bytes at 0x{address:08X} exceeds the 32-bit address space")]
    TooLarge { address: u32, len: usize },
}

/// Firmware blob bound to its target address. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    address: u32,
    entry_point: u32,
}

impl FirmwareImage {
    /// Entry point is the little-endian word at offset 0.
    pub fn new(data: Vec<u8>, address: u32) -> Result<Self, ImageError> {
        Self::with_entry_offset(data, address, 0)
    }

    /// Read the entry point from `entry_offset` instead of the image start.
    pub fn with_entry_offset(
        data: Vec<u8>,
        address: u32,
        entry_offset: usize,
    ) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        let end = address as u64 + data.len() as u64;
        if data.len() > u32::MAX as usize || end > u64::from(u32::MAX) + 1 {
            return Err(ImageError::TooLarge {
                address,
                len: data.len(),
            });
        }
        let word = entry_offset
            .checked_add(4)
            .and_then(|end| data.get(entry_offset..end))
            .ok_or(ImageError::NoEntryPoint {
                offset: entry_offset,
                actual: data.len(),
            })?;
        let entry_point = LittleEndian::read_u32(word);
        Ok(Self {
            data,
            address,
            entry_point,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fletcher-32 over the whole image, as sent with format-region.
    pub fn checksum(&self) -> u32 {
        fletcher32(&self.data)
    }

    pub fn chunks(&self, max_payload: usize) -> ChunkIterator<'_> {
        ChunkIterator::new(self, max_payload)
    }
}

/// Split `len` bytes into contiguous ranges of at most `max` bytes.
pub fn chunk_plan(len: usize, max: usize) -> Vec<Range<usize>> {
    let max = max.max(1);
    (0..len)
        .step_by(max)
        .map(|start| start..(start + max).min(len))
        .collect()
}

/// One write chunk of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Zero-based chunk number.
    pub index: usize,
    /// Offset into the image.
    pub offset: usize,
    /// Device address the chunk is written to.
    pub address: u32,
    pub data: &'a [u8],
}

/// Iterator over write chunks with position tracking.
#[derive(Debug)]
pub struct ChunkIterator<'a> {
    image: &'a FirmwareImage,
    ranges: std::vec::IntoIter<Range<usize>>,
    total: usize,
    current: usize,
}

impl<'a> ChunkIterator<'a> {
    fn new(image: &'a FirmwareImage, max_payload: usize) -> Self {
        let ranges = chunk_plan(image.len(), max_payload);
        Self {
            image,
            total: ranges.len(),
            ranges: ranges.into_iter(),
            current: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of chunks already yielded.
    pub fn current(&self) -> usize {
        self.current
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.ranges.next()?;
        let chunk = Chunk {
            index: self.current,
            offset: range.start,
            address: self.image.address + range.start as u32,
            data: &self.image.data[range],
        };
        self.current += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ranges.size_hint()
    }
}

impl ExactSizeIterator for ChunkIterator<'_> {}
