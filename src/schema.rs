//! Type descriptors (registration input) and the schema analyzer that turns them into
//! ordered field descriptors.

use crate::codec::CodecHandle;
use crate::nulls::NullPolicy;
use crate::tags::TypeTag;
use crate::RegistrationError;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Declared type of a field, container element, map key or map value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Declarable but never classifiable; registering a field of this type fails.
    Null,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Char,
    String,
    Enum {
        name: String,
        variants: Vec<String>,
    },
    List(Box<ElementDef>),
    Array(Box<ElementDef>),
    Map {
        key: Box<ElementDef>,
        value: Box<ElementDef>,
    },
    /// Reference to another registered type, by name.
    Object(String),
}

impl FieldType {
    pub fn list(element: FieldType, nullable: bool) -> Self {
        FieldType::List(Box::new(ElementDef::new(element, nullable)))
    }

    pub fn array(element: FieldType, nullable: bool) -> Self {
        FieldType::Array(Box::new(ElementDef::new(element, nullable)))
    }

    /// Map with non-null keys.
    pub fn map(key: FieldType, value: FieldType, value_nullable: bool) -> Self {
        FieldType::Map {
            key: Box::new(ElementDef::new(key, false)),
            value: Box::new(ElementDef::new(value, value_nullable)),
        }
    }

    pub fn object(type_name: impl Into<String>) -> Self {
        FieldType::Object(type_name.into())
    }

    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldType::Enum {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    fn scalar_tag(&self) -> Option<TypeTag> {
        match self {
            FieldType::Byte => Some(TypeTag::Byte),
            FieldType::Short => Some(TypeTag::Short),
            FieldType::Int => Some(TypeTag::Int),
            FieldType::Long => Some(TypeTag::Long),
            FieldType::Float => Some(TypeTag::Float),
            FieldType::Double => Some(TypeTag::Double),
            FieldType::Boolean => Some(TypeTag::Boolean),
            FieldType::Char => Some(TypeTag::Char),
            FieldType::String => Some(TypeTag::String),
            _ => None,
        }
    }
}

/// Element, key or value declaration of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementDef {
    pub ty: FieldType,
    pub nullable: bool,
}

impl ElementDef {
    pub fn new(ty: FieldType, nullable: bool) -> Self {
        Self { ty, nullable }
    }
}

/// One declared field. The name is kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
}

/// The layout of a record type, as handed to [`Registry::register`](crate::Registry::register).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    name: String,
    fields: Vec<FieldDef>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(FieldDef {
            name: name.into(),
            ty,
            nullable: false,
        })
    }

    pub fn nullable_field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(FieldDef {
            name: name.into(),
            ty,
            nullable: true,
        })
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }
}

/// Dense index of a schema inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub(crate) u32);

impl SchemaId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema#{}", self.0)
    }
}

/// Resolved kind of a container element, key or value. Also the container cache key part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementShape {
    pub tag: TypeTag,
    pub nullable: bool,
    pub nested: Option<SchemaId>,
    /// Variant count for enum elements, 0 otherwise.
    pub variants: u16,
}

/// A classified field. Immutable once built; `ordinal` fixes encode and decode order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub ordinal: u16,
    pub name: String,
    pub kind: TypeTag,
    pub nullable: bool,
    /// Element shape of lists and arrays.
    pub element: Option<ElementShape>,
    pub key: Option<ElementShape>,
    pub value: Option<ElementShape>,
    /// Target schema of object fields.
    pub nested: Option<SchemaId>,
    /// Variant count of enum fields, 0 otherwise.
    pub variants: u16,
}

/// Builds the ordered field descriptors of `descriptor`.
///
/// `resolve` maps a referenced type name to its schema id; it covers both registered types
/// and the other members of the registration batch.
pub(crate) fn analyze(
    descriptor: &TypeDescriptor,
    resolve: &dyn Fn(&str) -> Option<SchemaId>,
) -> Result<Vec<FieldDescriptor>, RegistrationError> {
    if descriptor.fields.len() > u16::MAX as usize {
        return Err(RegistrationError::Unsupported {
            type_name: descriptor.name.clone(),
            field: String::new(),
            reason: format!("{} fields exceed the limit", descriptor.fields.len()),
        });
    }
    descriptor
        .fields
        .iter()
        .enumerate()
        .map(|(ordinal, def)| {
            Analyzer {
                type_name: &descriptor.name,
                field: &def.name,
                resolve,
            }
            .classify(ordinal as u16, def)
        })
        .collect()
}

/// True when no field is a container or nested object.
pub(crate) fn is_fixed_shape(fields: &[FieldDescriptor]) -> bool {
    fields
        .iter()
        .all(|f| !f.kind.is_container() && f.kind != TypeTag::Object)
}

struct Analyzer<'a> {
    type_name: &'a str,
    field: &'a str,
    resolve: &'a dyn Fn(&str) -> Option<SchemaId>,
}

impl Analyzer<'_> {
    fn unsupported(&self, reason: impl Into<String>) -> RegistrationError {
        RegistrationError::Unsupported {
            type_name: self.type_name.to_owned(),
            field: self.field.to_owned(),
            reason: reason.into(),
        }
    }

    fn resolve(&self, target: &str) -> Result<SchemaId, RegistrationError> {
        (self.resolve)(target).ok_or_else(|| RegistrationError::Unresolved {
            type_name: self.type_name.to_owned(),
            field: self.field.to_owned(),
            target: target.to_owned(),
        })
    }

    fn variant_count(&self, variants: &[String]) -> Result<u16, RegistrationError> {
        match variants.len() {
            0 => Err(self.unsupported("enum has no variants")),
            n if n > u16::MAX as usize => Err(self.unsupported("enum has too many variants")),
            n => Ok(n as u16),
        }
    }

    fn classify(&self, ordinal: u16, def: &FieldDef) -> Result<FieldDescriptor, RegistrationError> {
        let mut out = FieldDescriptor {
            ordinal,
            name: def.name.clone(),
            kind: TypeTag::Null,
            nullable: def.nullable,
            element: None,
            key: None,
            value: None,
            nested: None,
            variants: 0,
        };
        match &def.ty {
            FieldType::Null => return Err(self.unsupported("null is not a field kind")),
            FieldType::Enum { variants, .. } => {
                out.kind = TypeTag::Enum;
                out.variants = self.variant_count(variants)?;
            }
            FieldType::Object(target) => {
                out.kind = TypeTag::Object;
                out.nested = Some(self.resolve(target)?);
            }
            FieldType::List(element) => {
                let shape = self.element(element)?;
                out.kind = if shape.tag == TypeTag::String && !shape.nullable {
                    TypeTag::StringList
                } else {
                    TypeTag::List
                };
                out.element = Some(shape);
            }
            FieldType::Array(element) => {
                out.kind = TypeTag::Array;
                out.element = Some(self.element(element)?);
            }
            FieldType::Map { key, value } => {
                let key = self.element(key)?;
                if key.nullable {
                    return Err(self.unsupported("map keys cannot be nullable"));
                }
                if key.tag == TypeTag::Object {
                    return Err(self.unsupported("map keys must be scalar"));
                }
                out.kind = TypeTag::Map;
                out.key = Some(key);
                out.value = Some(self.element(value)?);
            }
            scalar => {
                out.kind = scalar
                    .scalar_tag()
                    .ok_or_else(|| self.unsupported("unclassifiable field type"))?;
            }
        }
        Ok(out)
    }

    fn element(&self, def: &ElementDef) -> Result<ElementShape, RegistrationError> {
        let mut shape = ElementShape {
            tag: TypeTag::Null,
            nullable: def.nullable,
            nested: None,
            variants: 0,
        };
        match &def.ty {
            FieldType::Null => return Err(self.unsupported("null is not an element kind")),
            FieldType::List(_) | FieldType::Array(_) | FieldType::Map { .. } => {
                return Err(self.unsupported("containers cannot be nested in containers"))
            }
            FieldType::Enum { variants, .. } => {
                shape.tag = TypeTag::Enum;
                shape.variants = self.variant_count(variants)?;
            }
            FieldType::Object(target) => {
                shape.tag = TypeTag::Object;
                shape.nested = Some(self.resolve(target)?);
            }
            scalar => {
                shape.tag = scalar
                    .scalar_tag()
                    .ok_or_else(|| self.unsupported("unclassifiable element type"))?;
            }
        }
        Ok(shape)
    }
}

/// A registered type: its classified fields and, once generated, its codec.
#[derive(Debug)]
pub struct Schema {
    id: SchemaId,
    name: Arc<str>,
    descriptor: TypeDescriptor,
    fields: Vec<FieldDescriptor>,
    fixed_shape: bool,
    null_policy: NullPolicy,
    codec: OnceLock<CodecHandle>,
}

impl Schema {
    pub(crate) fn new(
        id: SchemaId,
        descriptor: TypeDescriptor,
        fields: Vec<FieldDescriptor>,
        null_policy: NullPolicy,
    ) -> Self {
        Self {
            id,
            name: Arc::from(descriptor.name()),
            fixed_shape: is_fixed_shape(&fields),
            descriptor,
            fields,
            null_policy,
            codec: OnceLock::new(),
        }
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Eligible for the packed nibble header.
    pub fn is_fixed_shape(&self) -> bool {
        self.fixed_shape
    }

    pub fn null_policy(&self) -> NullPolicy {
        self.null_policy
    }

    pub fn nullable_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.nullable && !f.kind.is_container())
            .count()
    }

    pub(crate) fn attach_codec(&self, codec: CodecHandle) {
        // Registration holds the registry lock, so each schema is attached once.
        let _ = self.codec.set(codec);
    }

    pub(crate) fn codec(&self) -> Option<&CodecHandle> {
        self.codec.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_types(_: &str) -> Option<SchemaId> {
        None
    }

    #[test]
    fn string_list_is_optimized_only_when_non_null() {
        let desc = TypeDescriptor::new("Tags")
            .field("plain", FieldType::list(FieldType::String, false))
            .field("boxed", FieldType::list(FieldType::String, true))
            .field("ints", FieldType::list(FieldType::Int, false));
        let fields = analyze(&desc, &no_types).unwrap();
        assert_eq!(fields[0].kind, TypeTag::StringList);
        assert_eq!(fields[1].kind, TypeTag::List);
        assert_eq!(fields[2].kind, TypeTag::List);
        assert!(!is_fixed_shape(&fields));
    }

    #[test]
    fn fixed_shape_requires_scalars_only() {
        let desc = TypeDescriptor::new("Flat")
            .field("id", FieldType::Int)
            .nullable_field("name", FieldType::String)
            .field("color", FieldType::enumeration("Color", ["Red", "Green"]));
        let fields = analyze(&desc, &no_types).unwrap();
        assert!(is_fixed_shape(&fields));
        assert_eq!(fields[2].variants, 2);
        assert_eq!(fields[1].ordinal, 1);
    }

    #[test]
    fn unresolved_reference_fails() {
        let desc = TypeDescriptor::new("Holder").field("inner", FieldType::object("Missing"));
        assert_eq!(
            analyze(&desc, &no_types),
            Err(RegistrationError::Unresolved {
                type_name: "Holder".into(),
                field: "inner".into(),
                target: "Missing".into(),
            })
        );
    }

    #[test]
    fn unclassifiable_fields_fail() {
        let nested = TypeDescriptor::new("Bad").field(
            "grid",
            FieldType::list(FieldType::list(FieldType::Int, false), false),
        );
        assert!(matches!(
            analyze(&nested, &no_types),
            Err(RegistrationError::Unsupported { .. })
        ));

        let null = TypeDescriptor::new("Bad").field("nothing", FieldType::Null);
        assert!(matches!(
            analyze(&null, &no_types),
            Err(RegistrationError::Unsupported { .. })
        ));

        let empty_enum = TypeDescriptor::new("Bad")
            .field("e", FieldType::enumeration("E", Vec::<String>::new()));
        assert!(matches!(
            analyze(&empty_enum, &no_types),
            Err(RegistrationError::Unsupported { .. })
        ));
    }

    #[test]
    fn map_keys_must_be_plain_scalars() {
        let resolve = |name: &str| (name == "Node").then_some(SchemaId(0));
        let object_key = TypeDescriptor::new("Bad").field(
            "m",
            FieldType::map(FieldType::object("Node"), FieldType::Int, false),
        );
        assert!(matches!(
            analyze(&object_key, &resolve),
            Err(RegistrationError::Unsupported { .. })
        ));

        let nullable_key = TypeDescriptor::new("Bad").field(
            "m",
            FieldType::Map {
                key: Box::new(ElementDef::new(FieldType::String, true)),
                value: Box::new(ElementDef::new(FieldType::Int, false)),
            },
        );
        assert!(matches!(
            analyze(&nullable_key, &resolve),
            Err(RegistrationError::Unsupported { .. })
        ));

        let ok = TypeDescriptor::new("Good").field(
            "m",
            FieldType::map(FieldType::String, FieldType::object("Node"), true),
        );
        let fields = analyze(&ok, &resolve).unwrap();
        assert_eq!(fields[0].value.unwrap().nested, Some(SchemaId(0)));
    }
}
