//! Codec generation: turns a schema into a straight-line plan of per-field steps.
//!
//! Every decision that depends on the field kind, nullability, null policy or record shape is
//! taken here, once, while the plan is built. At call time a record is encoded by running its
//! steps in ordinal order against the buffer; no step inspects the schema again.

use crate::buffer::{ByteReader, ByteWriter};
use crate::config::CodecConfig;
use crate::containers::{ContainerCache, ContainerCodec, ContainerShape, StringMode};
use crate::nulls::{self, NullBitmap, NullLayout, NullPolicy};
use crate::refs::{Assignment, ReferenceTable};
use crate::schema::{FieldDescriptor, Schema, SchemaId};
use crate::tags::{
    self, TypeTag, FLAG_PER_FIELD_NULLS, MARKER_BACK_REF, MARKER_OBJECT_PACKED, PAD_NIBBLE,
};
use crate::value::{Object, ObjectGraph, ObjectId, Value};
use crate::{
    EncodeError, Error, MalformedStreamError, RegistrationError, Result, SchemaMismatchError,
};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Writes one non-null value (or, for containers, a possibly null value).
pub(crate) type ValueWriter =
    Box<dyn Fn(&Value, &mut EncodeContext<'_>) -> Result<()> + Send + Sync>;
/// Reads one value.
pub(crate) type ValueReader = Box<dyn Fn(&mut DecodeContext<'_>) -> Result<Value> + Send + Sync>;
/// Decode step of a record field; sees the record's null bitmap.
type DecodeStep = Box<dyn Fn(&mut DecodeContext<'_>, &NullBitmap) -> Result<Value> + Send + Sync>;

pub(crate) fn writer<F>(f: F) -> ValueWriter
where
    F: Fn(&Value, &mut EncodeContext<'_>) -> Result<()> + Send + Sync + 'static,
{
    Box::new(f)
}

pub(crate) fn reader<F>(f: F) -> ValueReader
where
    F: Fn(&mut DecodeContext<'_>) -> Result<Value> + Send + Sync + 'static,
{
    Box::new(f)
}

fn decode_step<F>(f: F) -> DecodeStep
where
    F: Fn(&mut DecodeContext<'_>, &NullBitmap) -> Result<Value> + Send + Sync + 'static,
{
    Box::new(f)
}

pub(crate) fn mismatch(expected: TypeTag, actual: &Value) -> Error {
    Error::Encode(EncodeError::TypeMismatch {
        expected: expected.name(),
        actual: actual.tag().name(),
    })
}

/// Per-call encode state. Never shared between calls.
pub(crate) struct EncodeContext<'a> {
    pub(crate) writer: &'a mut ByteWriter,
    pub(crate) graph: &'a ObjectGraph,
    pub(crate) refs: ReferenceTable,
    depth: usize,
    max_depth: usize,
}

impl<'a> EncodeContext<'a> {
    pub(crate) fn new(writer: &'a mut ByteWriter, graph: &'a ObjectGraph, max_depth: usize) -> Self {
        Self {
            writer,
            graph,
            refs: ReferenceTable::new(),
            depth: 0,
            max_depth,
        }
    }

    /// Counts one level of record or container nesting.
    pub(crate) fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(EncodeError::DepthLimit(self.max_depth).into());
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth -= 1;
    }
}

/// Per-call decode state; owns the graph being rebuilt.
pub(crate) struct DecodeContext<'a> {
    pub(crate) reader: &'a mut ByteReader,
    pub(crate) graph: ObjectGraph,
    pub(crate) refs: ReferenceTable,
    depth: usize,
    max_depth: usize,
}

impl<'a> DecodeContext<'a> {
    pub(crate) fn new(reader: &'a mut ByteReader, max_depth: usize) -> Self {
        Self {
            reader,
            graph: ObjectGraph::new(),
            refs: ReferenceTable::new(),
            depth: 0,
            max_depth,
        }
    }

    pub(crate) fn into_graph(self) -> ObjectGraph {
        self.graph
    }

    pub(crate) fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(MalformedStreamError::DepthLimit(self.max_depth).into());
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth -= 1;
    }
}

/// Weak handle to a (possibly not yet committed) schema, used by nested-object steps.
#[derive(Clone)]
pub(crate) struct SchemaRef {
    weak: Weak<Schema>,
    name: Arc<str>,
}

impl SchemaRef {
    fn upgrade(&self) -> Result<Arc<Schema>> {
        self.weak.upgrade().ok_or_else(|| Error::UnregisteredType {
            name: self.name.to_string(),
        })
    }
}

/// The generated encode/decode plan of one schema.
pub(crate) struct CodecHandle {
    marker: u8,
    packed: bool,
    field_count: usize,
    /// Varint field count followed by the packed nibbles.
    header_tail: Bytes,
    nibbles: Vec<u8>,
    policy: NullPolicy,
    nulls: NullLayout,
    /// Packed records only: `(null bit, minimum payload width)` per field.
    min_widths: Vec<(Option<usize>, usize)>,
    encoders: Vec<ValueWriter>,
    decoders: Vec<DecodeStep>,
}

impl fmt::Debug for CodecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecHandle")
            .field("marker", &format_args!("0x{:02X}", self.marker))
            .field("packed", &self.packed)
            .field("field_count", &self.field_count)
            .field("policy", &self.policy)
            .field("tracked_nulls", &self.nulls.tracked_count())
            .finish_non_exhaustive()
    }
}

impl CodecHandle {
    fn has_bitmap(&self) -> bool {
        self.policy == NullPolicy::Bitmap && self.nulls.tracked_count() > 0
    }

    fn check_header(
        &self,
        type_name: &str,
        marker: u8,
        offset: usize,
        reader: &mut ByteReader,
    ) -> Result<()> {
        if marker != self.marker {
            let base = marker & !FLAG_PER_FIELD_NULLS;
            let record = base == MARKER_OBJECT_PACKED || base == TypeTag::Object.marker();
            if !record && marker != MARKER_BACK_REF {
                TypeTag::from_marker(marker, offset)?;
            }
            if record && base == self.marker & !FLAG_PER_FIELD_NULLS {
                return Err(SchemaMismatchError::NullPolicy {
                    type_name: type_name.to_owned(),
                }
                .into());
            }
            return Err(SchemaMismatchError::Marker {
                type_name: type_name.to_owned(),
                expected: self.marker,
                actual: marker,
            }
            .into());
        }

        let count = reader.read_varint()?;
        if count != self.field_count as u64 {
            return Err(SchemaMismatchError::FieldCount {
                type_name: type_name.to_owned(),
                expected: self.field_count,
                actual: count.min(usize::MAX as u64) as usize,
            }
            .into());
        }
        if self.packed {
            let start = reader.position();
            let bytes = reader.read_bytes(tags::nibble_bytes(self.field_count))?;
            let actual = tags::unpack_nibbles(&bytes, self.field_count);
            if let Some((ordinal, (&expected, &actual))) = self
                .nibbles
                .iter()
                .zip(actual.iter())
                .enumerate()
                .find(|(_, (e, a))| e != a)
            {
                return Err(SchemaMismatchError::Nibble {
                    type_name: type_name.to_owned(),
                    ordinal,
                    expected,
                    actual,
                }
                .into());
            }
            if self.field_count % 2 == 1 && bytes.last().is_some_and(|b| b & 0x0F != PAD_NIBBLE) {
                return Err(MalformedStreamError::NonZeroPadding {
                    offset: start + bytes.len() - 1,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Lower bound on the payload bytes of a packed record, given its null bitmap.
    fn min_payload(&self, nulls: &NullBitmap) -> usize {
        self.min_widths
            .iter()
            .map(|&(bit, width)| match (bit, self.policy) {
                (Some(bit), NullPolicy::Bitmap) if nulls.is_null(bit) => 0,
                (Some(_), NullPolicy::PerField) => 1,
                _ => width,
            })
            .sum()
    }
}

macro_rules! primitive_codec {
    ($variant:ident, $put:ident, $read:ident) => {
        (
            writer(|value: &Value, ctx: &mut EncodeContext<'_>| match value {
                Value::$variant(v) => {
                    ctx.writer.$put(*v);
                    Ok(())
                }
                other => Err(mismatch(TypeTag::$variant, other)),
            }),
            reader(|ctx: &mut DecodeContext<'_>| Ok(Value::$variant(ctx.reader.$read()?))),
        )
    };
}

/// Payload codec of a scalar kind, without any marker. `None` for non-scalar kinds.
pub(crate) fn scalar_codec(
    tag: TypeTag,
    variants: u16,
    strings: StringMode,
) -> Option<(ValueWriter, ValueReader)> {
    let codec = match tag {
        TypeTag::Byte => primitive_codec!(Byte, put_i8, read_i8),
        TypeTag::Short => primitive_codec!(Short, put_i16, read_i16),
        TypeTag::Int => primitive_codec!(Int, put_i32, read_i32),
        TypeTag::Long => primitive_codec!(Long, put_i64, read_i64),
        TypeTag::Float => primitive_codec!(Float, put_f32, read_f32),
        TypeTag::Double => primitive_codec!(Double, put_f64, read_f64),
        TypeTag::Boolean => primitive_codec!(Boolean, put_bool, read_bool),
        TypeTag::Char => primitive_codec!(Char, put_char, read_char),
        TypeTag::String => match strings {
            StringMode::Varint => (
                writer(|value: &Value, ctx: &mut EncodeContext<'_>| match value {
                    Value::String(s) => {
                        ctx.writer.put_str(s);
                        Ok(())
                    }
                    other => Err(mismatch(TypeTag::String, other)),
                }),
                reader(|ctx: &mut DecodeContext<'_>| Ok(Value::String(ctx.reader.read_str()?))),
            ),
            StringMode::Backpatch => (
                writer(|value: &Value, ctx: &mut EncodeContext<'_>| match value {
                    Value::String(s) => {
                        ctx.writer.put_str_backpatched(s);
                        Ok(())
                    }
                    other => Err(mismatch(TypeTag::String, other)),
                }),
                reader(|ctx: &mut DecodeContext<'_>| {
                    Ok(Value::String(ctx.reader.read_str_fixed()?))
                }),
            ),
        },
        TypeTag::Enum => (
            writer(move |value: &Value, ctx: &mut EncodeContext<'_>| match value {
                Value::Enum(ordinal) if *ordinal < variants => {
                    ctx.writer.put_u16(*ordinal);
                    Ok(())
                }
                Value::Enum(ordinal) => Err(EncodeError::EnumOrdinal {
                    ordinal: *ordinal,
                    variants,
                }
                .into()),
                other => Err(mismatch(TypeTag::Enum, other)),
            }),
            reader(move |ctx: &mut DecodeContext<'_>| {
                let ordinal = ctx.reader.read_u16()?;
                if ordinal >= variants {
                    return Err(
                        MalformedStreamError::InvalidEnumOrdinal { ordinal, variants }.into(),
                    );
                }
                Ok(Value::Enum(ordinal))
            }),
        ),
        _ => return None,
    };
    Some(codec)
}

/// Prefixes a payload codec with the kind marker; a null value is the bare `NULL` marker.
pub(crate) fn marked_element(
    tag: TypeTag,
    write: ValueWriter,
    read: ValueReader,
) -> (ValueWriter, ValueReader) {
    let marker = tag.marker();
    (
        writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
            if value.is_null() {
                ctx.writer.put_u8(TypeTag::Null.marker());
                return Ok(());
            }
            ctx.writer.put_u8(marker);
            write(value, ctx)
        }),
        reader(move |ctx: &mut DecodeContext<'_>| {
            let offset = ctx.reader.position();
            match ctx.reader.read_u8()? {
                m if m == marker => read(ctx),
                m if m == TypeTag::Null.marker() => Ok(Value::Null),
                m => {
                    TypeTag::from_marker(m, offset)?;
                    Err(MalformedStreamError::UnexpectedMarker {
                        expected: marker,
                        actual: m,
                        offset,
                    }
                    .into())
                }
            }
        }),
    )
}

/// Codec for a non-null reference to an object of the target schema.
pub(crate) fn object_codec(target: SchemaRef) -> (ValueWriter, ValueReader) {
    let read_target = target.clone();
    (
        writer(move |value: &Value, ctx: &mut EncodeContext<'_>| match value {
            Value::Object(id) => {
                let schema = target.upgrade()?;
                write_object(&schema, *id, ctx)
            }
            other => Err(mismatch(TypeTag::Object, other)),
        }),
        reader(move |ctx: &mut DecodeContext<'_>| {
            let schema = read_target.upgrade()?;
            read_object(&schema, ctx).map(Value::Object)
        }),
    )
}

/// Rejects null before delegating; used for non-nullable fields and elements.
pub(crate) fn required(name: String, write: ValueWriter) -> ValueWriter {
    writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
        if value.is_null() {
            return Err(EncodeError::NullInNonNullable {
                field: name.clone(),
            }
            .into());
        }
        write(value, ctx)
    })
}

/// Writes an object, or a back-reference if this call already wrote it.
pub(crate) fn write_object(schema: &Schema, id: ObjectId, ctx: &mut EncodeContext<'_>) -> Result<()> {
    let graph = ctx.graph;
    let object = graph
        .get(id)
        .ok_or(EncodeError::DanglingObject(id.as_u32()))?;
    if object.type_name() != schema.name() {
        return Err(EncodeError::ObjectType {
            expected: schema.name().to_owned(),
            actual: object.type_name().to_owned(),
        }
        .into());
    }
    match ctx.refs.assign(id) {
        Assignment::Seen(ref_id) => {
            ctx.writer.put_u8(MARKER_BACK_REF);
            ctx.writer.put_varint(u64::from(ref_id));
            Ok(())
        }
        Assignment::New(_) => encode_record(schema, object, ctx),
    }
}

/// Reads an object record or resolves a back-reference.
pub(crate) fn read_object(schema: &Schema, ctx: &mut DecodeContext<'_>) -> Result<ObjectId> {
    let offset = ctx.reader.position();
    let marker = ctx.reader.read_u8()?;
    if marker == MARKER_BACK_REF {
        let raw = ctx.reader.read_varint()?;
        let ref_id = u32::try_from(raw).map_err(|_| MalformedStreamError::UnknownBackReference(u32::MAX))?;
        let id = ctx.refs.resolve(ref_id)?;
        let matches = ctx
            .graph
            .get(id)
            .is_some_and(|o| o.type_name() == schema.name());
        if !matches {
            return Err(MalformedStreamError::MismatchedBackReference(ref_id).into());
        }
        return Ok(id);
    }
    decode_record(schema, marker, offset, ctx)
}

fn encode_record(schema: &Schema, object: &Object, ctx: &mut EncodeContext<'_>) -> Result<()> {
    let codec = schema.codec().ok_or_else(|| Error::UnregisteredType {
        name: schema.name().to_owned(),
    })?;
    let fields = object.fields();
    if fields.len() != codec.field_count {
        return Err(EncodeError::FieldCount {
            type_name: schema.name().to_owned(),
            expected: codec.field_count,
            actual: fields.len(),
        }
        .into());
    }
    ctx.enter()?;
    ctx.writer.put_u8(codec.marker);
    ctx.writer.put_slice(&codec.header_tail);
    if codec.has_bitmap() {
        codec.nulls.bitmap_for(fields).write(ctx.writer);
    }
    for (step, value) in codec.encoders.iter().zip(fields) {
        step(value, ctx)?;
    }
    ctx.leave();
    Ok(())
}

/// Decodes a record whose marker byte (at `offset`) has already been consumed.
pub(crate) fn decode_record(
    schema: &Schema,
    marker: u8,
    offset: usize,
    ctx: &mut DecodeContext<'_>,
) -> Result<ObjectId> {
    let codec = schema.codec().ok_or_else(|| Error::UnregisteredType {
        name: schema.name().to_owned(),
    })?;
    codec.check_header(schema.name(), marker, offset, ctx.reader)?;
    ctx.enter()?;

    let shell = ctx
        .graph
        .allocate_shell(schema.shared_name(), codec.field_count);
    ctx.refs.register_shell(shell);

    let nulls = if codec.has_bitmap() {
        NullBitmap::read(ctx.reader, codec.nulls.tracked_count())?
    } else {
        NullBitmap::empty()
    };
    if codec.packed {
        ctx.reader.ensure(codec.min_payload(&nulls))?;
    }

    for (ordinal, step) in codec.decoders.iter().enumerate() {
        let value = step(ctx, &nulls)?;
        ctx.graph.set_field(shell, ordinal, value);
    }
    ctx.leave();
    Ok(shell)
}

/// Encodes the top-level object (or the top-level null marker).
pub(crate) fn encode_root(
    schema: &Schema,
    root: ObjectId,
    ctx: &mut EncodeContext<'_>,
) -> Result<()> {
    write_object(schema, root, ctx)
}

/// Decodes the top-level value. The single byte `NULL` marker decodes to `None`.
pub(crate) fn decode_root(schema: &Schema, ctx: &mut DecodeContext<'_>) -> Result<Option<ObjectId>> {
    if ctx.reader.remaining() == 0 {
        return Err(MalformedStreamError::Empty.into());
    }
    let offset = ctx.reader.position();
    let marker = ctx.reader.read_u8()?;
    if marker == TypeTag::Null.marker() {
        return Ok(None);
    }
    if marker == MARKER_BACK_REF {
        // Nothing has been allocated yet, so no back-reference can resolve here.
        let raw = ctx.reader.read_varint()?;
        let ref_id = u32::try_from(raw).unwrap_or(u32::MAX);
        ctx.refs.resolve(ref_id)?;
        return Err(MalformedStreamError::UnknownBackReference(ref_id).into());
    }
    decode_record(schema, marker, offset, ctx).map(Some)
}

/// Builds codec handles and container codecs during one registration batch.
///
/// Container codecs created here are staged and only become visible to other schemas once
/// the whole batch succeeded.
pub(crate) struct Generator<'a> {
    schemas: &'a [Weak<Schema>],
    containers: &'a ContainerCache,
    staged: RefCell<HashMap<ContainerShape, Arc<ContainerCodec>>>,
    config: &'a CodecConfig,
}

impl<'a> Generator<'a> {
    pub(crate) fn new(
        schemas: &'a [Weak<Schema>],
        containers: &'a ContainerCache,
        config: &'a CodecConfig,
    ) -> Self {
        Self {
            schemas,
            containers,
            staged: RefCell::new(HashMap::new()),
            config,
        }
    }

    pub(crate) fn config(&self) -> &CodecConfig {
        self.config
    }

    pub(crate) fn into_staged(self) -> HashMap<ContainerShape, Arc<ContainerCodec>> {
        self.staged.into_inner()
    }

    pub(crate) fn schema_ref(&self, id: SchemaId) -> Option<SchemaRef> {
        let weak = self.schemas.get(id.index())?;
        let name = weak.upgrade()?.shared_name();
        Some(SchemaRef {
            weak: Weak::clone(weak),
            name,
        })
    }

    fn container(
        &self,
        shape: ContainerShape,
        schema: &Schema,
        field: &FieldDescriptor,
    ) -> std::result::Result<Arc<ContainerCodec>, RegistrationError> {
        if let Some(codec) = self.containers.get(&shape) {
            tracing::debug!(?shape, "container codec cache hit");
            return Ok(codec);
        }
        let staged = self.staged.borrow().get(&shape).cloned();
        if let Some(codec) = staged {
            return Ok(codec);
        }
        let codec = Arc::new(ContainerCodec::generate(shape, schema.name(), &field.name, self)?);
        tracing::debug!(?shape, "generated container codec");
        self.staged.borrow_mut().insert(shape, Arc::clone(&codec));
        Ok(codec)
    }

    /// Generates the encode/decode plan of `schema`.
    pub(crate) fn generate(&self, schema: &Schema) -> std::result::Result<CodecHandle, RegistrationError> {
        let fields = schema.fields();
        let packed = schema.is_fixed_shape();
        let policy = schema.null_policy();
        let base = if packed {
            MARKER_OBJECT_PACKED
        } else {
            TypeTag::Object.marker()
        };

        let nibbles: Vec<u8> = if packed {
            fields
                .iter()
                .map(|f| f.kind.nibble().unwrap_or(PAD_NIBBLE))
                .collect()
        } else {
            Vec::new()
        };
        let mut header = ByteWriter::with_capacity(8);
        header.put_varint(fields.len() as u64);
        header.put_slice(&tags::pack_nibbles(&nibbles));

        let nulls = NullLayout::from_fields(fields);
        let min_widths = if packed {
            fields
                .iter()
                .map(|f| {
                    (
                        nulls.bit_of(f.ordinal as usize),
                        f.kind.fixed_width().unwrap_or(1),
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut encoders = Vec::with_capacity(fields.len());
        let mut decoders = Vec::with_capacity(fields.len());
        for field in fields {
            let (encode, decode) = self.field_steps(schema, field, packed, policy, &nulls)?;
            encoders.push(encode);
            decoders.push(decode);
        }

        Ok(CodecHandle {
            marker: base | policy.record_flag(),
            packed,
            field_count: fields.len(),
            header_tail: header.freeze(),
            nibbles,
            policy,
            nulls,
            min_widths,
            encoders,
            decoders,
        })
    }

    fn field_steps(
        &self,
        schema: &Schema,
        field: &FieldDescriptor,
        packed: bool,
        policy: NullPolicy,
        nulls: &NullLayout,
    ) -> std::result::Result<(ValueWriter, DecodeStep), RegistrationError> {
        let unsupported = |reason: &str| RegistrationError::Unsupported {
            type_name: schema.name().to_owned(),
            field: field.name.clone(),
            reason: reason.to_owned(),
        };

        let (write, read) = match field.kind {
            TypeTag::Object => {
                let target = field
                    .nested
                    .and_then(|id| self.schema_ref(id))
                    .ok_or_else(|| RegistrationError::Unresolved {
                        type_name: schema.name().to_owned(),
                        field: field.name.clone(),
                        target: format!("{:?}", field.nested),
                    })?;
                object_codec(target)
            }
            TypeTag::List | TypeTag::StringList | TypeTag::Array | TypeTag::Map => {
                return self.container_steps(schema, field, &unsupported);
            }
            scalar => {
                let (write, read) = scalar_codec(scalar, field.variants, StringMode::Varint)
                    .ok_or_else(|| unsupported("unclassifiable field kind"))?;
                if packed {
                    (write, read)
                } else {
                    field_marker(schema.shared_name(), field, write, read)
                }
            }
        };

        if !field.nullable {
            let write = required(field.name.clone(), write);
            return Ok((write, decode_step(move |ctx: &mut DecodeContext<'_>, _: &NullBitmap| read(ctx))));
        }

        let bit = nulls
            .bit_of(field.ordinal as usize)
            .ok_or_else(|| unsupported("nullable field is not tracked"))?;
        Ok(match policy {
            NullPolicy::Bitmap => (
                writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
                    if value.is_null() {
                        Ok(())
                    } else {
                        write(value, ctx)
                    }
                }),
                decode_step(move |ctx: &mut DecodeContext<'_>, bitmap: &NullBitmap| {
                    if bitmap.is_null(bit) {
                        Ok(Value::Null)
                    } else {
                        read(ctx)
                    }
                }),
            ),
            NullPolicy::PerField => (
                writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
                    let present = !value.is_null();
                    nulls::write_presence(ctx.writer, present);
                    if present {
                        write(value, ctx)
                    } else {
                        Ok(())
                    }
                }),
                decode_step(move |ctx: &mut DecodeContext<'_>, _: &NullBitmap| {
                    if nulls::read_presence(ctx.reader)? {
                        read(ctx)
                    } else {
                        Ok(Value::Null)
                    }
                }),
            ),
        })
    }

    /// Container fields carry null in their count, so they bypass the null tracker.
    fn container_steps(
        &self,
        schema: &Schema,
        field: &FieldDescriptor,
        unsupported: &dyn Fn(&str) -> RegistrationError,
    ) -> std::result::Result<(ValueWriter, DecodeStep), RegistrationError> {
        let shape = match field.kind {
            TypeTag::List | TypeTag::StringList => {
                ContainerShape::List(field.element.ok_or_else(|| unsupported("list without element"))?)
            }
            TypeTag::Array => {
                ContainerShape::Array(field.element.ok_or_else(|| unsupported("array without element"))?)
            }
            _ => ContainerShape::Map(
                field.key.ok_or_else(|| unsupported("map without key"))?,
                field.value.ok_or_else(|| unsupported("map without value"))?,
            ),
        };
        let codec = self.container(shape, schema, field)?;
        let (write, read) = field_marker(
            schema.shared_name(),
            field,
            writer({
                let codec = Arc::clone(&codec);
                move |value: &Value, ctx: &mut EncodeContext<'_>| codec.write(value, ctx)
            }),
            reader(move |ctx: &mut DecodeContext<'_>| codec.read(ctx)),
        );

        let name = field.name.clone();
        if field.nullable {
            return Ok((write, decode_step(move |ctx: &mut DecodeContext<'_>, _: &NullBitmap| read(ctx))));
        }
        Ok((
            required(field.name.clone(), write),
            decode_step(move |ctx: &mut DecodeContext<'_>, _: &NullBitmap| {
                let value = read(ctx)?;
                if value.is_null() {
                    return Err(MalformedStreamError::UnexpectedNull {
                        field: name.clone(),
                    }
                    .into());
                }
                Ok(value)
            }),
        ))
    }
}

/// Field of a non-packed record: the payload is preceded by the field's kind marker, which
/// decode checks against the schema.
fn field_marker(
    type_name: Arc<str>,
    field: &FieldDescriptor,
    write: ValueWriter,
    read: ValueReader,
) -> (ValueWriter, ValueReader) {
    let marker = field.kind.marker();
    let ordinal = field.ordinal as usize;
    (
        writer(move |value: &Value, ctx: &mut EncodeContext<'_>| {
            ctx.writer.put_u8(marker);
            write(value, ctx)
        }),
        reader(move |ctx: &mut DecodeContext<'_>| {
            let offset = ctx.reader.position();
            let actual = ctx.reader.read_u8()?;
            if actual != marker {
                TypeTag::from_marker(actual, offset)?;
                return Err(SchemaMismatchError::FieldMarker {
                    type_name: type_name.to_string(),
                    ordinal,
                    expected: marker,
                    actual,
                }
                .into());
            }
            read(ctx)
        }),
    )
}
