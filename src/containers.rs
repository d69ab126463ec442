//! Lists, arrays and maps.
//!
//! A container is written as a big-endian `i32` element count (`-1` for null) followed by its
//! elements. Codecs are keyed by [`ContainerShape`] and shared by every schema of a registry
//! that uses the same shape.

use crate::buffer::ByteReader;
use crate::codec::{
    self, mismatch, reader, writer, DecodeContext, EncodeContext, Generator, ValueReader,
    ValueWriter,
};
use crate::schema::ElementShape;
use crate::tags::{TypeTag, ABSENT_LENGTH};
use crate::value::Value;
use crate::{EncodeError, MalformedStreamError, RegistrationError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How string elements carry their length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StringMode {
    /// Varint length prefix.
    Varint,
    /// 4-byte big-endian length slot patched after the bytes are written.
    Backpatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ContainerShape {
    List(ElementShape),
    Array(ElementShape),
    Map(ElementShape, ElementShape),
}

impl ContainerShape {
    /// Wire kind of the container; lists of non-null strings use the dedicated string-list kind.
    pub(crate) fn tag(&self) -> TypeTag {
        match self {
            ContainerShape::List(e) if e.tag == TypeTag::String && !e.nullable => {
                TypeTag::StringList
            }
            ContainerShape::List(_) => TypeTag::List,
            ContainerShape::Array(_) => TypeTag::Array,
            ContainerShape::Map(..) => TypeTag::Map,
        }
    }
}

pub(crate) struct ContainerCodec {
    shape: ContainerShape,
    write: ValueWriter,
    read: ValueReader,
}

impl fmt::Debug for ContainerCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerCodec")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl ContainerCodec {
    /// `type_name` and `field` name the first field that needs this shape; they only feed
    /// error reports.
    pub(crate) fn generate(
        shape: ContainerShape,
        type_name: &str,
        field: &str,
        gen: &Generator<'_>,
    ) -> std::result::Result<Self, RegistrationError> {
        let owner = Owner {
            type_name,
            field,
            gen,
        };
        let (write, read) = match shape {
            ContainerShape::List(element) | ContainerShape::Array(element) => {
                let (write, read) = element_codec(element, StringMode::Varint, "element", &owner)?;
                sequence_codec(shape.tag(), write, read)
            }
            ContainerShape::Map(key, value) => {
                let strings = if gen.config().map_backpatch {
                    StringMode::Backpatch
                } else {
                    StringMode::Varint
                };
                let key = element_codec(key, strings, "key", &owner)?;
                let value = element_codec(value, strings, "value", &owner)?;
                map_codec(key, value)
            }
        };
        Ok(Self { shape, write, read })
    }

    /// Writes the count and elements; `Value::Null` is written as the absent count.
    pub(crate) fn write(&self, value: &Value, ctx: &mut EncodeContext<'_>) -> Result<()> {
        (self.write)(value, ctx)
    }

    /// Reads a container; the absent count yields `Value::Null`.
    pub(crate) fn read(&self, ctx: &mut DecodeContext<'_>) -> Result<Value> {
        (self.read)(ctx)
    }
}

/// Registry-scoped container codecs, keyed by shape.
#[derive(Debug, Default)]
pub(crate) struct ContainerCache {
    codecs: RwLock<HashMap<ContainerShape, Arc<ContainerCodec>>>,
}

impl ContainerCache {
    pub(crate) fn get(&self, shape: &ContainerShape) -> Option<Arc<ContainerCodec>> {
        self.codecs.read().get(shape).cloned()
    }

    /// Publishes the codecs generated by a successful registration batch.
    pub(crate) fn commit(&self, staged: HashMap<ContainerShape, Arc<ContainerCodec>>) {
        if staged.is_empty() {
            return;
        }
        let mut codecs = self.codecs.write();
        for (shape, codec) in staged {
            codecs.entry(shape).or_insert(codec);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.codecs.read().len()
    }
}

struct Owner<'a> {
    type_name: &'a str,
    field: &'a str,
    gen: &'a Generator<'a>,
}

fn element_codec(
    shape: ElementShape,
    strings: StringMode,
    role: &'static str,
    owner: &Owner<'_>,
) -> std::result::Result<(ValueWriter, ValueReader), RegistrationError> {
    let unsupported = |reason: &str| RegistrationError::Unsupported {
        type_name: owner.type_name.to_owned(),
        field: owner.field.to_owned(),
        reason: format!("{role}: {reason}"),
    };

    if shape.tag == TypeTag::Object {
        let target = shape
            .nested
            .and_then(|id| owner.gen.schema_ref(id))
            .ok_or_else(|| unsupported("unresolved element type"))?;
        let (write, read) = codec::object_codec(target);
        if !shape.nullable {
            return Ok((codec::required(role.to_owned(), write), read));
        }
        // Record markers are self-describing, so only null needs a marker of its own.
        return Ok((
            writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
                if value.is_null() {
                    ctx.writer.put_u8(TypeTag::Null.marker());
                    return Ok(());
                }
                write(value, ctx)
            }),
            reader(move |ctx: &mut DecodeContext<'_>| {
                if ctx.reader.peek_u8()? == TypeTag::Null.marker() {
                    ctx.reader.read_u8()?;
                    return Ok(Value::Null);
                }
                read(ctx)
            }),
        ));
    }

    let (write, read) = codec::scalar_codec(shape.tag, shape.variants, strings)
        .ok_or_else(|| unsupported("containers cannot hold containers"))?;
    if shape.nullable {
        Ok(codec::marked_element(shape.tag, write, read))
    } else {
        Ok((codec::required(role.to_owned(), write), read))
    }
}

fn write_count(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| EncodeError::TooLong(len).into())
}

/// `None` for the absent count. Every element takes at least one byte, so a count larger
/// than the remaining input is rejected before allocating.
fn read_count(reader: &mut ByteReader) -> std::result::Result<Option<usize>, MalformedStreamError> {
    let offset = reader.position();
    let count = reader.read_i32()?;
    if count == ABSENT_LENGTH {
        return Ok(None);
    }
    if count < 0 || count as usize > reader.remaining() {
        return Err(MalformedStreamError::InvalidLength {
            length: i64::from(count),
            offset,
        });
    }
    Ok(Some(count as usize))
}

fn sequence_codec(
    tag: TypeTag,
    write_element: ValueWriter,
    read_element: ValueReader,
) -> (ValueWriter, ValueReader) {
    let array = tag == TypeTag::Array;
    (
        writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
            let items = match value {
                Value::Null => {
                    ctx.writer.put_i32(ABSENT_LENGTH);
                    return Ok(());
                }
                Value::Array(items) if array => items,
                Value::List(items) if !array => items,
                other => return Err(mismatch(tag, other)),
            };
            ctx.writer.put_i32(write_count(items.len())?);
            ctx.enter()?;
            for item in items {
                write_element(item, ctx)?;
            }
            ctx.leave();
            Ok(())
        }),
        reader(move |ctx: &mut DecodeContext<'_>| {
            let Some(len) = read_count(ctx.reader)? else {
                return Ok(Value::Null);
            };
            ctx.enter()?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_element(ctx)?);
            }
            ctx.leave();
            Ok(if array {
                Value::Array(items)
            } else {
                Value::List(items)
            })
        }),
    )
}

fn map_codec(
    (write_key, read_key): (ValueWriter, ValueReader),
    (write_value, read_value): (ValueWriter, ValueReader),
) -> (ValueWriter, ValueReader) {
    (
        writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
            let entries = match value {
                Value::Null => {
                    ctx.writer.put_i32(ABSENT_LENGTH);
                    return Ok(());
                }
                Value::Map(entries) => entries,
                other => return Err(mismatch(TypeTag::Map, other)),
            };
            ctx.writer.put_i32(write_count(entries.len())?);
            ctx.enter()?;
            for (k, v) in entries {
                write_key(k, ctx)?;
                write_value(v, ctx)?;
            }
            ctx.leave();
            Ok(())
        }),
        reader(move |ctx: &mut DecodeContext<'_>| {
            let Some(len) = read_count(ctx.reader)? else {
                return Ok(Value::Null);
            };
            ctx.enter()?;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                let key = read_key(ctx)?;
                let value = read_value(ctx)?;
                entries.push((key, value));
            }
            ctx.leave();
            Ok(Value::Map(entries))
        }),
    )
}
