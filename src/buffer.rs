//! Growable byte writer and bounds-checked byte reader.
//!
//! Multi-byte numerics are big-endian; floats are written as their IEEE 754 bit patterns.
//! Varints are unsigned LEB128 and are used for string lengths, field counts and
//! back-reference ids.

use crate::MalformedStreamError;
use bytes::{BufMut, Bytes, BytesMut};

type ReadResult<T> = std::result::Result<T, MalformedStreamError>;

const MAX_VARINT_LEN: usize = 10;

/// A reserved region of a [`ByteWriter`], overwritten once its value is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    offset: usize,
    width: usize,
}

impl Slot {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// First byte after the reservation.
    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Append-only writer over a `BytesMut`. Writing past the capacity grows the buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Current write position, equal to the number of bytes written.
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Drops the contents but keeps the allocation for reuse.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Takes the written bytes, leaving the writer empty with its remaining capacity.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    #[inline]
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    #[inline]
    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_u32(v.to_bits());
    }

    #[inline]
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_u64(v.to_bits());
    }

    /// Writes a char as its 4-byte Unicode scalar value.
    #[inline]
    pub fn put_char(&mut self, v: char) {
        self.buf.put_u32(v as u32);
    }

    pub fn put_varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.put_u8((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.put_u8(v as u8);
    }

    #[inline]
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes a varint byte length followed by the UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) {
        self.put_varint(s.len() as u64);
        self.buf.put_slice(s.as_bytes());
    }

    /// Writes UTF-8 bytes behind a 4-byte length slot that is patched after the payload.
    pub fn put_str_backpatched(&mut self, s: &str) {
        let slot = self.reserve_slot(4);
        self.buf.put_slice(s.as_bytes());
        let written = self.bytes_since(slot);
        self.patch_u32(slot, written as u32);
    }

    /// Reserves `width` zeroed bytes at the current position.
    pub fn reserve_slot(&mut self, width: usize) -> Slot {
        let offset = self.buf.len();
        self.buf.put_bytes(0, width);
        Slot { offset, width }
    }

    /// Bytes written after the end of `slot`.
    pub fn bytes_since(&self, slot: Slot) -> usize {
        self.buf.len() - slot.end()
    }

    /// Overwrites a 4-byte slot without moving the write position.
    pub fn patch_u32(&mut self, slot: Slot, v: u32) {
        debug_assert_eq!(slot.width, 4, "patch_u32 requires a 4-byte slot");
        self.buf[slot.offset..slot.end()].copy_from_slice(&v.to_be_bytes());
    }

    /// Overwrites a 2-byte slot without moving the write position.
    pub fn patch_u16(&mut self, slot: Slot, v: u16) {
        debug_assert_eq!(slot.width, 2, "patch_u16 requires a 2-byte slot");
        self.buf[slot.offset..slot.end()].copy_from_slice(&v.to_be_bytes());
    }
}

/// Cursor over immutable bytes. The position never passes the limit.
#[derive(Debug, Clone)]
pub struct ByteReader {
    data: Bytes,
    pos: usize,
    limit: usize,
}

impl ByteReader {
    pub fn new(data: Bytes) -> Self {
        let limit = data.len();
        Self {
            data,
            pos: 0,
            limit,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.limit
    }

    pub fn set_position(&mut self, position: usize) -> ReadResult<()> {
        if position > self.limit {
            return Err(MalformedStreamError::OutOfBounds {
                position,
                limit: self.limit,
            });
        }
        self.pos = position;
        Ok(())
    }

    /// Narrows (or restores) the readable region. The limit must lie between the current
    /// position and the end of the data.
    pub fn set_limit(&mut self, limit: usize) -> ReadResult<()> {
        if limit > self.data.len() || limit < self.pos {
            return Err(MalformedStreamError::OutOfBounds {
                position: self.pos,
                limit,
            });
        }
        self.limit = limit;
        Ok(())
    }

    /// Fails unless `needed` more bytes can be read.
    #[inline]
    pub fn ensure(&self, needed: usize) -> ReadResult<()> {
        if self.remaining() < needed {
            return Err(MalformedStreamError::UnexpectedEof {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Returns the next byte without consuming it.
    pub fn peek_u8(&self) -> ReadResult<u8> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    #[inline]
    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    #[inline]
    pub fn read_i8(&mut self) -> ReadResult<i8> {
        Ok(self.take::<1>()?[0] as i8)
    }

    pub fn read_bool(&mut self) -> ReadResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(MalformedStreamError::InvalidBoolean(other)),
        }
    }

    #[inline]
    pub fn read_i16(&mut self) -> ReadResult<i16> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    #[inline]
    pub fn read_u16(&mut self) -> ReadResult<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    #[inline]
    pub fn read_i32(&mut self) -> ReadResult<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> ReadResult<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    #[inline]
    pub fn read_i64(&mut self) -> ReadResult<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    #[inline]
    pub fn read_f32(&mut self) -> ReadResult<f32> {
        Ok(f32::from_bits(u32::from_be_bytes(self.take()?)))
    }

    #[inline]
    pub fn read_f64(&mut self) -> ReadResult<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take()?)))
    }

    pub fn read_char(&mut self) -> ReadResult<char> {
        let scalar = self.read_u32()?;
        char::from_u32(scalar).ok_or(MalformedStreamError::InvalidChar(scalar))
    }

    pub fn read_varint(&mut self) -> ReadResult<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let bits = u64::from(byte & 0x7F);
            if i == MAX_VARINT_LEN - 1 && bits > 1 {
                return Err(MalformedStreamError::VarintOverflow);
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MalformedStreamError::VarintOverflow)
    }

    /// Reads a varint that must fit in the remaining input, such as a byte length.
    pub fn read_length(&mut self) -> ReadResult<usize> {
        let offset = self.pos;
        let length = self.read_varint()?;
        if length > self.remaining() as u64 {
            return Err(MalformedStreamError::InvalidLength {
                length: length.min(i64::MAX as u64) as i64,
                offset,
            });
        }
        Ok(length as usize)
    }

    /// Zero-copy view of the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> ReadResult<Bytes> {
        self.ensure(len)?;
        let out = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    fn read_utf8(&mut self, len: usize) -> ReadResult<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MalformedStreamError::InvalidUtf8)
    }

    /// Reads a string written by [`ByteWriter::put_str`].
    pub fn read_str(&mut self) -> ReadResult<String> {
        let len = self.read_length()?;
        self.read_utf8(len)
    }

    /// Reads a string written by [`ByteWriter::put_str_backpatched`].
    pub fn read_str_fixed(&mut self) -> ReadResult<String> {
        let offset = self.pos;
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(MalformedStreamError::InvalidLength {
                length: len as i64,
                offset,
            });
        }
        self.read_utf8(len)
    }
}
