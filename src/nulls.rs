//! Null-presence tracking for nullable scalar and nested-object fields.
//!
//! Containers never go through here; a null container is written as the absent count.

use crate::buffer::{ByteReader, ByteWriter};
use crate::schema::FieldDescriptor;
use crate::tags::FLAG_PER_FIELD_NULLS;
use crate::value::Value;
use crate::MalformedStreamError;

/// Presence encoding, fixed per schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NullPolicy {
    /// One block of `ceil(n / 8)` bytes after the header; bit set means null.
    #[default]
    Bitmap,
    /// A presence byte (1 = present, 0 = null) before each tracked field.
    PerField,
}

impl NullPolicy {
    /// Bits OR-ed into the record marker.
    #[inline]
    pub const fn record_flag(self) -> u8 {
        match self {
            NullPolicy::Bitmap => 0,
            NullPolicy::PerField => FLAG_PER_FIELD_NULLS,
        }
    }
}

/// Which fields take part in null tracking, and their bit index.
#[derive(Debug, Clone, Default)]
pub(crate) struct NullLayout {
    /// `(ordinal, bit)` for each tracked field, in ordinal order.
    tracked: Vec<(usize, usize)>,
}

impl NullLayout {
    pub(crate) fn from_fields(fields: &[FieldDescriptor]) -> Self {
        let tracked = fields
            .iter()
            .filter(|f| f.nullable && !f.kind.is_container())
            .enumerate()
            .map(|(bit, f)| (f.ordinal as usize, bit))
            .collect();
        Self { tracked }
    }

    pub(crate) fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub(crate) fn bit_of(&self, ordinal: usize) -> Option<usize> {
        self.tracked
            .iter()
            .find(|(o, _)| *o == ordinal)
            .map(|(_, bit)| *bit)
    }

    /// Builds the bitmap for one record from its field values.
    pub(crate) fn bitmap_for(&self, fields: &[Value]) -> NullBitmap {
        let mut bitmap = NullBitmap::with_bits(self.tracked.len());
        for &(ordinal, bit) in &self.tracked {
            if fields.get(ordinal).map_or(true, Value::is_null) {
                bitmap.set_null(bit);
            }
        }
        bitmap
    }
}

/// Packed null bits, LSB-first within each byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NullBitmap {
    bytes: Vec<u8>,
}

impl NullBitmap {
    pub(crate) fn with_bits(count: usize) -> Self {
        Self {
            bytes: vec![0; count.div_ceil(8)],
        }
    }

    /// Bitmap of a record that has no block on the wire.
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn set_null(&mut self, bit: usize) {
        self.bytes[bit / 8] |= 1 << (bit % 8);
    }

    #[inline]
    pub(crate) fn is_null(&self, bit: usize) -> bool {
        self.bytes
            .get(bit / 8)
            .is_some_and(|b| b & (1 << (bit % 8)) != 0)
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter) {
        writer.put_slice(&self.bytes);
    }

    pub(crate) fn read(
        reader: &mut ByteReader,
        count: usize,
    ) -> Result<Self, MalformedStreamError> {
        let len = count.div_ceil(8);
        let offset = reader.position();
        let bytes = reader.read_bytes(len)?;
        let used = count % 8;
        if used != 0 && bytes.last().is_some_and(|b| b >> used != 0) {
            return Err(MalformedStreamError::NonZeroPadding {
                offset: offset + len - 1,
            });
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }
}

/// Writes the per-field presence byte.
#[inline]
pub(crate) fn write_presence(writer: &mut ByteWriter, present: bool) {
    writer.put_u8(u8::from(present));
}

/// Reads a per-field presence byte.
#[inline]
pub(crate) fn read_presence(reader: &mut ByteReader) -> Result<bool, MalformedStreamError> {
    match reader.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(MalformedStreamError::InvalidPresence(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TypeTag;

    fn field(ordinal: u16, kind: TypeTag, nullable: bool) -> FieldDescriptor {
        FieldDescriptor {
            ordinal,
            name: format!("f{ordinal}"),
            kind,
            nullable,
            element: None,
            key: None,
            value: None,
            nested: None,
            variants: 0,
        }
    }

    #[test]
    fn containers_are_not_tracked() {
        let layout = NullLayout::from_fields(&[
            field(0, TypeTag::Int, false),
            field(1, TypeTag::String, true),
            field(2, TypeTag::List, true),
            field(3, TypeTag::Object, true),
        ]);
        assert_eq!(layout.tracked_count(), 2);
        assert_eq!(layout.bit_of(1), Some(0));
        assert_eq!(layout.bit_of(2), None);
        assert_eq!(layout.bit_of(3), Some(1));
    }

    #[test]
    fn bitmap_spans_bytes() {
        let fields: Vec<FieldDescriptor> =
            (0..10).map(|i| field(i, TypeTag::String, true)).collect();
        let layout = NullLayout::from_fields(&fields);
        let mut values = vec![Value::string("x"); 10];
        values[0] = Value::Null;
        values[9] = Value::Null;
        let bitmap = layout.bitmap_for(&values);

        let mut w = ByteWriter::new();
        bitmap.write(&mut w);
        assert_eq!(w.as_slice(), &[0b0000_0001, 0b0000_0010]);

        let mut r = ByteReader::new(w.freeze());
        let read = NullBitmap::read(&mut r, 10).unwrap();
        assert!(read.is_null(0));
        assert!(!read.is_null(1));
        assert!(read.is_null(9));
        assert_eq!(read, bitmap);
    }

    #[test]
    fn stray_bits_above_the_tracked_count_are_rejected() {
        let mut r = ByteReader::from_slice(&[0b0000_0100]);
        assert_eq!(
            NullBitmap::read(&mut r, 2),
            Err(MalformedStreamError::NonZeroPadding { offset: 0 })
        );

        let mut r = ByteReader::from_slice(&[0xFF, 0b0000_0011]);
        assert!(NullBitmap::read(&mut r, 10).is_ok());
        let mut r = ByteReader::from_slice(&[0xFF, 0b0000_0111]);
        assert_eq!(
            NullBitmap::read(&mut r, 10),
            Err(MalformedStreamError::NonZeroPadding { offset: 1 })
        );
    }

    #[test]
    fn presence_byte_is_strict() {
        let mut r = ByteReader::from_slice(&[1, 0, 7]);
        assert!(read_presence(&mut r).unwrap());
        assert!(!read_presence(&mut r).unwrap());
        assert_eq!(
            read_presence(&mut r),
            Err(MalformedStreamError::InvalidPresence(7))
        );
    }

    #[test]
    fn empty_bitmap_reports_present() {
        assert!(!NullBitmap::empty().is_null(0));
        assert_eq!(NullPolicy::PerField.record_flag(), FLAG_PER_FIELD_NULLS);
        assert_eq!(NullPolicy::Bitmap.record_flag(), 0);
    }
}
