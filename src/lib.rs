//! # nibblepack
//!
//! A schema-driven binary object codec for Rust.
//!
//! - Types are registered once; registration analyzes the field layout and builds a
//!   specialized encode/decode plan, so no per-call dispatch on field kind happens afterwards
//! - Records whose fields are all scalar use a packed header with two 4-bit kind tags per byte
//! - Nullable fields are tracked with a bitmap block (default) or a presence byte per field
//! - Shared and cyclic object graphs round-trip through back-references
//! - `#[derive(Record)]` bridges plain Rust structs and C-like enums to the codec
//!
//! ## Object graphs
//!
//! Values live in an [`ObjectGraph`], an arena of [`Object`] nodes addressed by [`ObjectId`].
//! Two fields refer to "the same object" exactly when they hold the same id, which is how
//! self-references (`a.next = a`) and mutual references (`a.next = b; b.prev = a`) are expressed.
//!
//! ```rust
//! use nibblepack::{FieldType, ObjectGraph, Registry, TypeDescriptor, Value};
//!
//! let registry = Registry::new();
//! registry
//!     .register(
//!         &TypeDescriptor::new("Node")
//!             .field("id", FieldType::Int)
//!             .nullable_field("next", FieldType::object("Node")),
//!     )
//!     .unwrap();
//!
//! let mut graph = ObjectGraph::new();
//! let a = graph.insert("Node", vec![Value::Int(1), Value::Null]);
//! graph.get_mut(a).unwrap().fields_mut()[1] = Value::Object(a);
//!
//! let bytes = registry.serialize(&graph, Some(a)).unwrap();
//! let decoded = registry.deserialize(bytes, "Node").unwrap();
//! let root = decoded.root.unwrap();
//! assert_eq!(decoded.graph.get(root).unwrap().field(1), Some(&Value::Object(root)));
//! ```
//!
//! ## Attribute Macros
//!
//! - `#[nibblepack(rename = "Name")]` on a struct or enum sets the registered type name.
//! - `#[nibblepack(skip)]` on a field excludes it from the schema; it decodes to `Default::default()`.
//!
//! ## Feature Flags
//!
//! - `derive` (default) re-exports `#[derive(Record)]`.
//! - `indexmap` enables `IndexMap` fields in the typed bridge (insertion-ordered maps).

pub mod buffer;
mod codec;
pub mod config;
mod containers;
pub mod nulls;
pub mod record;
pub mod refs;
pub mod registry;
pub mod schema;
pub mod tags;
pub mod value;

pub use buffer::{ByteReader, ByteWriter, Slot};
pub use config::CodecConfig;
pub use nulls::NullPolicy;
#[cfg(feature = "derive")]
pub use nibblepack_derive::Record;
pub use record::{FieldValue, Record};
pub use registry::{Decoded, Registry};
pub use schema::{
    ElementDef, ElementShape, FieldDef, FieldDescriptor, FieldType, Schema, SchemaId,
    TypeDescriptor,
};
pub use tags::TypeTag;
pub use value::{Object, ObjectGraph, ObjectId, Value};

/// Errors that can occur while registering, encoding or decoding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A type could not be registered.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// `serialize`/`deserialize` was called for a type that was never registered.
    #[error("Type '{name}' is not registered")]
    UnregisteredType { name: String },
    /// The byte stream is not a valid encoding.
    #[error(transparent)]
    Malformed(#[from] MalformedStreamError),
    /// The byte stream was produced with a different, incompatible schema.
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),
    /// The object graph does not fit the registered schema.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// A decoded graph could not be converted into a typed record.
    #[error("Conversion error: {0}")]
    Convert(String),
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Registration-time failures. These never surface from `serialize`/`deserialize`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("Unsupported field '{field}' in type {type_name}: {reason}")]
    Unsupported {
        type_name: String,
        field: String,
        reason: String,
    },
    #[error("Field '{field}' in type {type_name} references unknown type {target}")]
    Unresolved {
        type_name: String,
        field: String,
        target: String,
    },
    #[error("Type {type_name} is already registered with a different layout")]
    Conflict { type_name: String },
}

/// Decode-time failures caused by bytes that are not a valid encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedStreamError {
    #[error("Input is empty")]
    Empty,
    #[error("Unknown marker 0x{marker:02X} at offset {offset}")]
    UnknownMarker { marker: u8, offset: usize },
    #[error("Unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("Invalid length {length} at offset {offset}")]
    InvalidLength { length: i64, offset: usize },
    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8,
    #[error("Invalid char scalar value 0x{0:X}")]
    InvalidChar(u32),
    #[error("Invalid boolean byte 0x{0:02X}")]
    InvalidBoolean(u8),
    #[error("Invalid presence byte 0x{0:02X}")]
    InvalidPresence(u8),
    #[error("Enum ordinal {ordinal} out of range (variants: {variants})")]
    InvalidEnumOrdinal { ordinal: u16, variants: u16 },
    #[error("Expected marker 0x{expected:02X} at offset {offset}, got 0x{actual:02X}")]
    UnexpectedMarker {
        expected: u8,
        actual: u8,
        offset: usize,
    },
    #[error("Back-reference to unknown object id {0}")]
    UnknownBackReference(u32),
    #[error("Back-reference {0} points to an object of another type")]
    MismatchedBackReference(u32),
    #[error("Null found where the schema does not allow one (field '{field}')")]
    UnexpectedNull { field: String },
    #[error("Non-zero padding bits at offset {offset}")]
    NonZeroPadding { offset: usize },
    #[error("Varint is longer than 10 bytes")]
    VarintOverflow,
    #[error("Nesting depth exceeds the limit of {0}")]
    DepthLimit(usize),
    #[error("{0} trailing bytes after the top-level value")]
    TrailingBytes(usize),
    #[error("Position {position} is beyond the limit {limit}")]
    OutOfBounds { position: usize, limit: usize },
}

/// Decode-time failures caused by a header that disagrees with the registered schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaMismatchError {
    #[error("Expected record marker 0x{expected:02X} for {type_name}, got 0x{actual:02X}")]
    Marker {
        type_name: String,
        expected: u8,
        actual: u8,
    },
    #[error("Null-presence policy of the stream differs from the schema of {type_name}")]
    NullPolicy { type_name: String },
    #[error("Field count mismatch for {type_name}: expected {expected}, got {actual}")]
    FieldCount {
        type_name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Kind nibble mismatch for {type_name} field #{ordinal}: expected 0x{expected:X}, got 0x{actual:X}")]
    Nibble {
        type_name: String,
        ordinal: usize,
        expected: u8,
        actual: u8,
    },
    #[error("Field marker mismatch for {type_name} field #{ordinal}: expected 0x{expected:02X}, got 0x{actual:02X}")]
    FieldMarker {
        type_name: String,
        ordinal: usize,
        expected: u8,
        actual: u8,
    },
}

/// Encode-time failures caused by an object graph that does not fit its schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Expected a {expected} value, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Null value in non-nullable field '{field}'")]
    NullInNonNullable { field: String },
    #[error("Object of type {actual} found where {expected} is required")]
    ObjectType { expected: String, actual: String },
    #[error("Object {0} does not exist in the graph")]
    DanglingObject(u32),
    #[error("Object of type {type_name} has {actual} fields, schema declares {expected}")]
    FieldCount {
        type_name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Enum ordinal {ordinal} out of range (variants: {variants})")]
    EnumOrdinal { ordinal: u16, variants: u16 },
    #[error("Collection of {0} elements exceeds the wire limit")]
    TooLong(usize),
    #[error("Nesting depth exceeds the limit of {0}")]
    DepthLimit(usize),
}
