//! Growable byte buffer used to assemble identifiers and command frames.
//!
//! Capacity grows in whole blocks so that repeated small appends do not
//! reallocate every time. Every append is checked against a hard limit and
//! allocation failures are reported instead of aborting.

use crate::error::BufferError;
use bytes::Bytes;
use std::fmt;

/// Default growth increment in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// An owned, append-only byte buffer with block-rounded growth.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    block_size: usize,
    max_capacity: usize,
}

impl ByteBuffer {
    /// Create an empty buffer with the default block size and no limit.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create an empty buffer that grows in `block_size` increments.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            data: Vec::new(),
            block_size: block_size.max(1),
            max_capacity: usize::MAX,
        }
    }

    /// Create a buffer with `initial` bytes reserved.
    pub fn with_capacity(initial: usize) -> Result<Self, BufferError> {
        let mut buf = Self::new();
        buf.ensure(initial)?;
        Ok(buf)
    }

    /// Limit the total capacity of this buffer.
    pub fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Growth increment.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of bytes currently stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes reserved.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Contents as a contiguous slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Append a byte slice.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ensure(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a single byte.
    pub fn append_byte(&mut self, byte: u8) -> Result<(), BufferError> {
        self.ensure(1)?;
        self.data.push(byte);
        Ok(())
    }

    /// Remove up to `count` trailing bytes, returning how many were removed.
    pub fn backspace(&mut self, count: usize) -> usize {
        let removed = count.min(self.data.len());
        self.data.truncate(self.data.len() - removed);
        removed
    }

    /// Drop the contents but keep the allocation.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// Copy the contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Convert into an immutable, cheaply clonable byte handle.
    pub fn freeze(self) -> Bytes {
        Bytes::from(self.data)
    }

    /// Make room for `need` more bytes, growing by whole blocks.
    fn ensure(&mut self, need: usize) -> Result<(), BufferError> {
        let requested = self
            .data
            .len()
            .checked_add(need)
            .ok_or(BufferError::OutOfMemory)?;
        // The limit applies to contents, even when spare capacity exists
        if requested > self.max_capacity {
            return Err(BufferError::CapacityExceeded {
                requested,
                max: self.max_capacity,
            });
        }

        let free = self.data.capacity() - self.data.len();
        if need <= free {
            return Ok(());
        }

        let blocks = (need - free) / self.block_size + 1;
        let grow = blocks
            .checked_mul(self.block_size)
            .ok_or(BufferError::OutOfMemory)?;
        let target = self
            .data
            .capacity()
            .saturating_add(grow)
            .min(self.max_capacity);

        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| BufferError::OutOfMemory)
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Write for ByteBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .field("block_size", &self.block_size)
            .finish()
    }
}
