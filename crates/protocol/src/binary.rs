//! Little-endian binary reader/writer for the OgarX protocol.
//!
//! Reads are bounds-checked and report [`ProtocolError::UnexpectedEof`]
//! instead of panicking, since every byte handed to the reader comes
//! straight off the network.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

/// A reader for parsing binary protocol messages.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
}

macro_rules! checked_get {
    ($name:ident, $ty:ty, $size:expr, $get:ident) => {
        #[inline]
        pub fn $name(&mut self) -> Result<$ty, ProtocolError> {
            if self.buf.remaining() < $size {
                return Err(ProtocolError::UnexpectedEof);
            }
            Ok(self.buf.$get())
        }
    };
}

impl<'a> BinaryReader<'a> {
    /// Create a new reader over a borrowed message.
    pub fn new(data: &'a [u8]) -> Self {
        Self { buf: data }
    }

    /// Returns remaining bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    checked_get!(get_u8, u8, 1, get_u8);
    checked_get!(get_u16, u16, 2, get_u16_le);
    checked_get!(get_i16, i16, 2, get_i16_le);
    checked_get!(get_u32, u32, 4, get_u32_le);
    checked_get!(get_f32, f32, 4, get_f32_le);

    /// Reads a byte if one is left. Used for optional trailing fields.
    #[inline]
    pub fn try_get_u8(&mut self) -> Option<u8> {
        self.buf.has_remaining().then(|| self.buf.get_u8())
    }

    /// Read a zero-terminated UTF-16 string.
    ///
    /// A string that runs to the end of the message without a terminator is
    /// accepted as-is; a dangling odd byte is an error.
    pub fn get_string_utf16(&mut self) -> Result<String, ProtocolError> {
        let mut units = Vec::new();
        loop {
            match self.buf.remaining() {
                0 => break,
                1 => return Err(ProtocolError::UnexpectedEof),
                _ => {}
            }
            let unit = self.buf.get_u16_le();
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Page granularity used when a writer has to grow.
pub const PAGE_SIZE: usize = 64 * 1024;

/// A writer for building binary protocol messages.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes that can still be written without reallocating.
    #[inline]
    pub fn spare_capacity(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }

    /// Make room for at least `needed` more bytes, growing by whole pages.
    ///
    /// Returns the number of pages added (0 when the buffer already fits).
    pub fn grow_pages(&mut self, needed: usize) -> usize {
        let spare = self.spare_capacity();
        if needed <= spare {
            return 0;
        }
        let pages = (needed - spare).div_ceil(PAGE_SIZE);
        self.buf.reserve(spare + pages * PAGE_SIZE);
        pages
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    /// Write a zero-terminated UTF-16 string.
    pub fn put_string_utf16(&mut self, s: &str) {
        for c in s.encode_utf16() {
            self.buf.put_u16_le(c);
        }
        self.buf.put_u16_le(0);
    }

    /// Consume the writer and return the built buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Split off the written bytes, keeping the spare allocation for reuse.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Drop the contents, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Get current buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_string() {
        let mut w = BinaryWriter::new();
        w.put_string_utf16("blob");
        w.put_u8(7);
        let data = w.finish();
        let mut r = BinaryReader::new(&data);
        assert_eq!(r.get_string_utf16().unwrap(), "blob");
        assert_eq!(r.get_u8().unwrap(), 7);
    }

    #[test]
    fn test_short_read_is_error() {
        let mut r = BinaryReader::new(&[1, 2, 3]);
        assert!(r.get_u16().is_ok());
        assert!(matches!(r.get_u16(), Err(ProtocolError::UnexpectedEof)));
        assert_eq!(r.try_get_u8(), Some(3));
        assert_eq!(r.try_get_u8(), None);
    }

    #[test]
    fn test_dangling_utf16_byte() {
        let mut r = BinaryReader::new(&[b'a', 0, b'b']);
        assert!(r.get_string_utf16().is_err());
    }

    #[test]
    fn test_grow_pages() {
        let mut w = BinaryWriter::with_capacity(16);
        assert_eq!(w.grow_pages(8), 0);
        assert_eq!(w.grow_pages(PAGE_SIZE + 1), 1);
        assert!(w.spare_capacity() >= PAGE_SIZE + 1);
    }

    #[test]
    fn test_take_reuses_writer() {
        let mut w = BinaryWriter::with_capacity(64);
        w.put_u32(0xDEADBEEF);
        let first = w.take();
        assert_eq!(&first[..], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert!(w.is_empty());
        w.put_u8(1);
        assert_eq!(&w.take()[..], &[1]);
    }
}
