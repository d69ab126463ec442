//! The closed set of field kinds and their wire encodings.
//!
//! Every kind has a one-byte marker, used wherever a value must describe itself (container
//! elements, fields of non-packed records). Scalar kinds also have a 4-bit nibble, used in the
//! packed header of fixed-shape records where two kinds share one byte.
//!
//! Tags are stable and part of the wire format.

use crate::MalformedStreamError;
use std::fmt;

/// Record whose fields are all scalar; followed by field count, nibbles, null block, payloads.
pub const MARKER_OBJECT_PACKED: u8 = 0x10;
/// Back-reference to an already written object; followed by a varint id.
pub const MARKER_BACK_REF: u8 = 0x11;
/// OR-ed into a record marker when the record uses per-field presence bytes.
pub const FLAG_PER_FIELD_NULLS: u8 = 0x80;
/// Trailing nibble of an odd-length packed header.
pub const PAD_NIBBLE: u8 = 0x0;
/// Container count written for an absent (null) container.
pub const ABSENT_LENGTH: i32 = -1;

/// Field kinds. The discriminant is the one-byte wire marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TypeTag {
    Null = 0x00,
    Byte = 0x01,
    Short = 0x02,
    Int = 0x03,
    Long = 0x04,
    Float = 0x05,
    Double = 0x06,
    Boolean = 0x07,
    Char = 0x08,
    String = 0x09,
    Enum = 0x0A,
    List = 0x0B,
    /// List of non-null strings, written without per-element markers.
    StringList = 0x0C,
    Map = 0x0D,
    Array = 0x0E,
    Object = 0x0F,
}

impl TypeTag {
    pub const ALL: [TypeTag; 16] = [
        TypeTag::Null,
        TypeTag::Byte,
        TypeTag::Short,
        TypeTag::Int,
        TypeTag::Long,
        TypeTag::Float,
        TypeTag::Double,
        TypeTag::Boolean,
        TypeTag::Char,
        TypeTag::String,
        TypeTag::Enum,
        TypeTag::List,
        TypeTag::StringList,
        TypeTag::Map,
        TypeTag::Array,
        TypeTag::Object,
    ];

    #[inline]
    pub const fn marker(self) -> u8 {
        self as u8
    }

    /// Resolves a marker byte read at `offset`.
    ///
    /// # Errors
    /// Returns `UnknownMarker` for bytes outside the table, including the structural markers.
    pub fn from_marker(marker: u8, offset: usize) -> Result<Self, MalformedStreamError> {
        TypeTag::ALL
            .get(marker as usize)
            .copied()
            .ok_or(MalformedStreamError::UnknownMarker { marker, offset })
    }

    /// The packed-header nibble, present for the scalar kinds only.
    #[inline]
    pub const fn nibble(self) -> Option<u8> {
        match self {
            TypeTag::Byte
            | TypeTag::Short
            | TypeTag::Int
            | TypeTag::Long
            | TypeTag::Float
            | TypeTag::Double
            | TypeTag::Boolean
            | TypeTag::Char
            | TypeTag::String
            | TypeTag::Enum => Some(self as u8),
            _ => None,
        }
    }

    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x1..=0xA => Some(TypeTag::ALL[nibble as usize]),
            _ => None,
        }
    }

    /// Payload width in bytes for kinds that need no length prefix.
    #[inline]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            TypeTag::Null => Some(0),
            TypeTag::Byte | TypeTag::Boolean => Some(1),
            TypeTag::Short | TypeTag::Enum => Some(2),
            TypeTag::Int | TypeTag::Float | TypeTag::Char => Some(4),
            TypeTag::Long | TypeTag::Double => Some(8),
            TypeTag::String
            | TypeTag::List
            | TypeTag::StringList
            | TypeTag::Map
            | TypeTag::Array
            | TypeTag::Object => None,
        }
    }

    #[inline]
    pub const fn is_length_prefixed(self) -> bool {
        self.fixed_width().is_none()
    }

    #[inline]
    pub const fn is_container(self) -> bool {
        matches!(
            self,
            TypeTag::List | TypeTag::StringList | TypeTag::Map | TypeTag::Array
        )
    }

    /// Kinds that may appear as container elements, map keys or map values.
    #[inline]
    pub const fn is_scalar(self) -> bool {
        self.nibble().is_some()
    }

    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Byte => "byte",
            TypeTag::Short => "short",
            TypeTag::Int => "int",
            TypeTag::Long => "long",
            TypeTag::Float => "float",
            TypeTag::Double => "double",
            TypeTag::Boolean => "boolean",
            TypeTag::Char => "char",
            TypeTag::String => "string",
            TypeTag::Enum => "enum",
            TypeTag::List => "list",
            TypeTag::StringList => "list<string>",
            TypeTag::Map => "map",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Packs nibbles two per byte, first nibble in the high half. An odd count is padded with
/// [`PAD_NIBBLE`].
pub fn pack_nibbles(nibbles: &[u8]) -> Vec<u8> {
    nibbles
        .chunks(2)
        .map(|pair| {
            let high = pair[0] & 0x0F;
            let low = pair.get(1).map_or(PAD_NIBBLE, |n| n & 0x0F);
            (high << 4) | low
        })
        .collect()
}

/// Splits packed bytes back into `count` nibbles.
pub fn unpack_nibbles(bytes: &[u8], count: usize) -> Vec<u8> {
    bytes
        .iter()
        .flat_map(|b| [b >> 4, b & 0x0F])
        .take(count)
        .collect()
}

/// Number of header bytes needed for `count` nibbles.
#[inline]
pub const fn nibble_bytes(count: usize) -> usize {
    count.div_ceil(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_round_trip() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::from_marker(tag.marker(), 0).unwrap(), tag);
        }
        assert_eq!(
            TypeTag::from_marker(MARKER_BACK_REF, 7),
            Err(MalformedStreamError::UnknownMarker {
                marker: MARKER_BACK_REF,
                offset: 7
            })
        );
    }

    #[test]
    fn nibbles_are_dense_and_nonzero() {
        let nibbles: Vec<u8> = TypeTag::ALL.iter().filter_map(|t| t.nibble()).collect();
        assert_eq!(nibbles, (1..=10).collect::<Vec<u8>>());
        assert!(TypeTag::Object.nibble().is_none());
        assert!(TypeTag::List.nibble().is_none());
        assert_eq!(TypeTag::from_nibble(PAD_NIBBLE), None);
        assert_eq!(TypeTag::from_nibble(0x3), Some(TypeTag::Int));
    }

    #[test]
    fn fixed_width_split() {
        assert_eq!(TypeTag::Long.fixed_width(), Some(8));
        assert_eq!(TypeTag::Char.fixed_width(), Some(4));
        assert!(TypeTag::String.is_length_prefixed());
        assert!(TypeTag::Object.is_length_prefixed());
        assert!(!TypeTag::Boolean.is_length_prefixed());
        assert!(TypeTag::StringList.is_container());
        assert!(!TypeTag::Object.is_container());
    }

    #[test]
    fn pack_odd_count_pads_low_nibble() {
        let packed = pack_nibbles(&[
            TypeTag::Int as u8,
            TypeTag::String as u8,
            TypeTag::Boolean as u8,
        ]);
        assert_eq!(packed, vec![0x39, 0x70]);
        assert_eq!(unpack_nibbles(&packed, 3), vec![0x3, 0x9, 0x7]);
        assert_eq!(nibble_bytes(3), 2);
        assert_eq!(nibble_bytes(4), 2);
        assert_eq!(nibble_bytes(0), 0);
    }
}
