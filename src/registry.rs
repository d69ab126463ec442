//! The type registry: registration, codec generation and the serialize/deserialize entry points.

use crate::buffer::{ByteReader, ByteWriter};
use crate::codec::{self, DecodeContext, EncodeContext, Generator};
use crate::config::CodecConfig;
use crate::containers::ContainerCache;
use crate::nulls::NullPolicy;
use crate::record::Record;
use crate::schema::{self, Schema, SchemaId, TypeDescriptor};
use crate::tags::TypeTag;
use crate::value::{ObjectGraph, ObjectId};
use crate::{EncodeError, Error, MalformedStreamError, RegistrationError, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Result of [`Registry::deserialize`]: the rebuilt graph and its top-level object.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub graph: ObjectGraph,
    /// `None` when the top-level value was null.
    pub root: Option<ObjectId>,
}

#[derive(Debug, Default)]
struct RegistryState {
    names: HashMap<Arc<str>, SchemaId>,
    schemas: Vec<Arc<Schema>>,
}

/// Holds registered schemas and their generated codecs.
///
/// A registry is `Send + Sync`; share it behind an `Arc` or a `static`. Lookups take a read
/// lock, registration additionally serializes on an internal mutex so a type's codec is
/// generated at most once.
#[derive(Debug, Default)]
pub struct Registry {
    config: CodecConfig,
    state: RwLock<RegistryState>,
    registration: Mutex<()>,
    containers: ContainerCache,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Registers one type using the registry's null policy.
    ///
    /// Registering an identical descriptor again returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if a field cannot be classified, references an unknown
    /// type, or the name is already taken by a different layout.
    pub fn register(&self, descriptor: &TypeDescriptor) -> std::result::Result<SchemaId, RegistrationError> {
        self.register_with_policy(descriptor, self.config.null_policy)
    }

    /// Registers one type with an explicit null policy.
    pub fn register_with_policy(
        &self,
        descriptor: &TypeDescriptor,
        policy: NullPolicy,
    ) -> std::result::Result<SchemaId, RegistrationError> {
        let ids = self.register_batch(&[(descriptor, policy)])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| RegistrationError::Conflict {
                type_name: descriptor.name().to_owned(),
            })
    }

    /// Registers a group of types that may reference each other.
    ///
    /// Either every member is registered or none is.
    pub fn register_all(
        &self,
        descriptors: &[TypeDescriptor],
    ) -> std::result::Result<Vec<SchemaId>, RegistrationError> {
        let batch: Vec<_> = descriptors
            .iter()
            .map(|d| (d, self.config.null_policy))
            .collect();
        self.register_batch(&batch)
    }

    /// Registers `T` together with every record type reachable from its fields.
    ///
    /// Nested types that are already registered with the same layout are reused as they are,
    /// whatever null policy they were registered with.
    pub fn register_type<T: Record>(&self) -> std::result::Result<SchemaId, RegistrationError> {
        let mut descriptors = Vec::new();
        T::collect_descriptors(&mut descriptors);
        descriptors.retain(|d| {
            d.name() == T::TYPE_NAME
                || self
                    .schema(d.name())
                    .map_or(true, |existing| existing.descriptor() != d)
        });
        self.register_all(&descriptors)?;
        self.id_of(T::TYPE_NAME)
            .ok_or_else(|| RegistrationError::Unresolved {
                type_name: T::TYPE_NAME.to_owned(),
                field: String::new(),
                target: T::TYPE_NAME.to_owned(),
            })
    }

    fn register_batch(
        &self,
        batch: &[(&TypeDescriptor, NullPolicy)],
    ) -> std::result::Result<Vec<SchemaId>, RegistrationError> {
        let _registration = self.registration.lock();
        let state = self.state.read();

        let mut ids = Vec::with_capacity(batch.len());
        let mut pending: Vec<(&TypeDescriptor, NullPolicy, SchemaId)> = Vec::new();
        let mut pending_names: HashMap<&str, SchemaId> = HashMap::new();
        for &(descriptor, policy) in batch {
            let name = descriptor.name();
            if let Some(&id) = state.names.get(name) {
                let existing = &state.schemas[id.index()];
                if existing.descriptor() != descriptor || existing.null_policy() != policy {
                    return Err(RegistrationError::Conflict {
                        type_name: name.to_owned(),
                    });
                }
                ids.push(id);
                continue;
            }
            if let Some(&id) = pending_names.get(name) {
                let (earlier, earlier_policy, _) = pending[id.index() - state.schemas.len()];
                if earlier != descriptor || earlier_policy != policy {
                    return Err(RegistrationError::Conflict {
                        type_name: name.to_owned(),
                    });
                }
                ids.push(id);
                continue;
            }
            let id = SchemaId((state.schemas.len() + pending.len()) as u32);
            pending_names.insert(name, id);
            pending.push((descriptor, policy, id));
            ids.push(id);
        }
        if pending.is_empty() {
            return Ok(ids);
        }

        let resolve = |name: &str| {
            state
                .names
                .get(name)
                .copied()
                .or_else(|| pending_names.get(name).copied())
        };
        let mut created = Vec::with_capacity(pending.len());
        for &(descriptor, policy, id) in &pending {
            let fields = schema::analyze(descriptor, &resolve)?;
            created.push(Arc::new(Schema::new(id, descriptor.clone(), fields, policy)));
        }

        let weak: Vec<Weak<Schema>> = state
            .schemas
            .iter()
            .chain(created.iter())
            .map(Arc::downgrade)
            .collect();
        let generator = Generator::new(&weak, &self.containers, &self.config);
        for schema in &created {
            schema.attach_codec(generator.generate(schema)?);
        }
        let staged = generator.into_staged();
        drop(state);

        self.containers.commit(staged);
        let mut state = self.state.write();
        for schema in created {
            tracing::debug!(
                type_name = schema.name(),
                id = %schema.id(),
                fields = schema.fields().len(),
                fixed_shape = schema.is_fixed_shape(),
                null_policy = ?schema.null_policy(),
                "registered schema"
            );
            state.names.insert(schema.shared_name(), schema.id());
            state.schemas.push(schema);
        }
        Ok(ids)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.read().names.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<Arc<Schema>> {
        let state = self.state.read();
        let id = state.names.get(name)?;
        state.schemas.get(id.index()).cloned()
    }

    fn id_of(&self, name: &str) -> Option<SchemaId> {
        self.state.read().names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.state.read().schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct container codecs shared across the registered schemas.
    pub fn container_codec_count(&self) -> usize {
        self.containers.len()
    }

    fn lookup(&self, name: &str) -> Result<Arc<Schema>> {
        self.schema(name).ok_or_else(|| Error::UnregisteredType {
            name: name.to_owned(),
        })
    }

    /// Encodes the graph reachable from `root` into a fresh buffer.
    ///
    /// The root's registered type selects the schema. `None` encodes the single `NULL` byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredType`] for an unregistered root type and
    /// [`Error::Encode`] when the graph does not fit the schema.
    pub fn serialize(&self, graph: &ObjectGraph, root: Option<ObjectId>) -> Result<Bytes> {
        let mut writer = ByteWriter::with_capacity(self.config.initial_capacity);
        self.serialize_into(&mut writer, graph, root)?;
        Ok(writer.freeze())
    }

    /// Like [`serialize`](Self::serialize), reusing `writer`. The writer is cleared first.
    pub fn serialize_into(
        &self,
        writer: &mut ByteWriter,
        graph: &ObjectGraph,
        root: Option<ObjectId>,
    ) -> Result<()> {
        writer.clear();
        let Some(root) = root else {
            tracing::trace!("serialize null root");
            writer.put_u8(TypeTag::Null.marker());
            return Ok(());
        };
        let object = graph
            .get(root)
            .ok_or(EncodeError::DanglingObject(root.as_u32()))?;
        let schema = self.lookup(object.type_name())?;
        tracing::trace!(type_name = schema.name(), objects = graph.len(), "serialize");

        let mut ctx = EncodeContext::new(writer, graph, self.config.max_depth);
        codec::encode_root(&schema, root, &mut ctx)?;
        tracing::trace!(type_name = schema.name(), bytes = writer.position(), "serialized");
        Ok(())
    }

    /// Decodes one top-level value of `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for invalid bytes (including trailing bytes) and
    /// [`Error::SchemaMismatch`] when the stream was written with a different layout.
    pub fn deserialize(&self, bytes: impl Into<Bytes>, type_name: &str) -> Result<Decoded> {
        let schema = self.lookup(type_name)?;
        let mut reader = ByteReader::new(bytes.into());
        tracing::trace!(type_name, bytes = reader.remaining(), "deserialize");

        let mut ctx = DecodeContext::new(&mut reader, self.config.max_depth);
        let root = codec::decode_root(&schema, &mut ctx)?;
        let graph = ctx.into_graph();
        if !reader.is_exhausted() {
            return Err(MalformedStreamError::TrailingBytes(reader.remaining()).into());
        }
        Ok(Decoded { graph, root })
    }

    /// [`deserialize`](Self::deserialize) for a borrowed buffer.
    pub fn deserialize_slice(&self, bytes: &[u8], type_name: &str) -> Result<Decoded> {
        self.deserialize(Bytes::copy_from_slice(bytes), type_name)
    }

    /// Encodes a typed record. `T` must have been registered with
    /// [`register_type`](Self::register_type).
    pub fn serialize_record<T: Record>(&self, record: &T) -> Result<Bytes> {
        let mut graph = ObjectGraph::new();
        let root = record.write_object(&mut graph);
        self.serialize(&graph, Some(root))
    }

    /// Decodes a typed record.
    pub fn deserialize_record<T: Record>(&self, bytes: impl Into<Bytes>) -> Result<T> {
        let decoded = self.deserialize(bytes, T::TYPE_NAME)?;
        let root = decoded
            .root
            .ok_or_else(|| Error::Convert(format!("top-level {} is null", T::TYPE_NAME)))?;
        T::read_object(&decoded.graph, root)
    }
}
