//! Typed bridge between plain Rust types and the object-graph codec.
//!
//! [`Record`] is implemented by `#[derive(Record)]` structs; [`FieldValue`] by everything that
//! can appear as one of their fields. Conversions produce trees: every nested record becomes
//! its own object, so shared or cyclic topologies need the graph API directly.

use crate::schema::{FieldType, TypeDescriptor};
use crate::value::{ObjectGraph, ObjectId, Value};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// A type that can be stored in a record field, list element or map entry.
pub trait FieldValue: Sized {
    /// Whether `null` is a valid value of this type.
    const NULLABLE: bool = false;

    fn field_type() -> FieldType;

    fn to_value(&self, graph: &mut ObjectGraph) -> Value;

    /// # Errors
    ///
    /// Returns [`Error::Convert`] if `value` does not have the expected shape.
    fn from_value(value: &Value, graph: &ObjectGraph) -> Result<Self>;

    /// Appends the descriptors of every record type reachable from this type.
    fn collect_descriptors(_out: &mut Vec<TypeDescriptor>) {}
}

/// A struct registered as a record type.
pub trait Record: Sized {
    /// Registered type name.
    const TYPE_NAME: &'static str;

    fn descriptor() -> TypeDescriptor;

    /// Appends this type's descriptor (if not yet present) and those of its nested records.
    fn collect_descriptors(out: &mut Vec<TypeDescriptor>);

    /// Inserts this value (and its nested records) into `graph`.
    fn write_object(&self, graph: &mut ObjectGraph) -> ObjectId;

    /// # Errors
    ///
    /// Returns [`Error::Convert`] if the object is missing, has another type, or one of its
    /// fields cannot be converted.
    fn read_object(graph: &ObjectGraph, id: ObjectId) -> Result<Self>;
}

/// Conversion failure for a value of the wrong kind.
#[doc(hidden)]
pub fn unexpected(expected: &str, actual: &Value) -> Error {
    Error::Convert(format!("expected {expected}, got {}", actual.tag()))
}

/// Fields of object `id`, checked against `type_name`.
#[doc(hidden)]
pub fn object_fields<'g>(
    graph: &'g ObjectGraph,
    id: ObjectId,
    type_name: &str,
) -> Result<&'g [Value]> {
    let object = graph
        .get(id)
        .ok_or_else(|| Error::Convert(format!("object {id} is not in the graph")))?;
    if object.type_name() != type_name {
        return Err(Error::Convert(format!(
            "expected object of type {type_name}, got {}",
            object.type_name()
        )));
    }
    Ok(object.fields())
}

/// Field `ordinal` of a record, converted to `T`.
#[doc(hidden)]
pub fn read_field<T: FieldValue>(
    fields: &[Value],
    ordinal: usize,
    name: &str,
    graph: &ObjectGraph,
) -> Result<T> {
    let value = fields
        .get(ordinal)
        .ok_or_else(|| Error::Convert(format!("missing field '{name}'")))?;
    T::from_value(value, graph)
}

/// Pushes `descriptor` unless a type of the same name is already present.
/// Returns `false` when it was already there, which stops recursion on self-referencing types.
#[doc(hidden)]
pub fn push_descriptor(out: &mut Vec<TypeDescriptor>, descriptor: TypeDescriptor) -> bool {
    if out.iter().any(|d| d.name() == descriptor.name()) {
        return false;
    }
    out.push(descriptor);
    true
}

macro_rules! impl_scalar_field {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                fn field_type() -> FieldType {
                    FieldType::$variant
                }

                fn to_value(&self, _graph: &mut ObjectGraph) -> Value {
                    Value::$variant(*self)
                }

                fn from_value(value: &Value, _graph: &ObjectGraph) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(*v),
                        other => Err(unexpected(stringify!($variant), other)),
                    }
                }
            }
        )*
    };
}

impl_scalar_field!(
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    bool => Boolean,
    char => Char,
);

impl FieldValue for String {
    fn field_type() -> FieldType {
        FieldType::String
    }

    fn to_value(&self, _graph: &mut ObjectGraph) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value, _graph: &ObjectGraph) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(unexpected("String", other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const NULLABLE: bool = true;

    fn field_type() -> FieldType {
        T::field_type()
    }

    fn to_value(&self, graph: &mut ObjectGraph) -> Value {
        match self {
            Some(v) => v.to_value(graph),
            None => Value::Null,
        }
    }

    fn from_value(value: &Value, graph: &ObjectGraph) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            v => T::from_value(v, graph).map(Some),
        }
    }

    fn collect_descriptors(out: &mut Vec<TypeDescriptor>) {
        T::collect_descriptors(out);
    }
}

impl<T: FieldValue> FieldValue for Box<T> {
    const NULLABLE: bool = T::NULLABLE;

    fn field_type() -> FieldType {
        T::field_type()
    }

    fn to_value(&self, graph: &mut ObjectGraph) -> Value {
        (**self).to_value(graph)
    }

    fn from_value(value: &Value, graph: &ObjectGraph) -> Result<Self> {
        T::from_value(value, graph).map(Box::new)
    }

    fn collect_descriptors(out: &mut Vec<TypeDescriptor>) {
        T::collect_descriptors(out);
    }
}

fn convert_items<T: FieldValue>(value: &Value, graph: &ObjectGraph, array: bool) -> Result<Vec<T>> {
    let items = match (value, array) {
        (Value::List(items), false) | (Value::Array(items), true) => items,
        (other, _) => return Err(unexpected(if array { "Array" } else { "List" }, other)),
    };
    items.iter().map(|v| T::from_value(v, graph)).collect()
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn field_type() -> FieldType {
        FieldType::list(T::field_type(), T::NULLABLE)
    }

    fn to_value(&self, graph: &mut ObjectGraph) -> Value {
        Value::List(self.iter().map(|v| v.to_value(graph)).collect())
    }

    fn from_value(value: &Value, graph: &ObjectGraph) -> Result<Self> {
        convert_items(value, graph, false)
    }

    fn collect_descriptors(out: &mut Vec<TypeDescriptor>) {
        T::collect_descriptors(out);
    }
}

impl<T: FieldValue, const N: usize> FieldValue for [T; N] {
    fn field_type() -> FieldType {
        FieldType::array(T::field_type(), T::NULLABLE)
    }

    fn to_value(&self, graph: &mut ObjectGraph) -> Value {
        Value::Array(self.iter().map(|v| v.to_value(graph)).collect())
    }

    fn from_value(value: &Value, graph: &ObjectGraph) -> Result<Self> {
        let items: Vec<T> = convert_items(value, graph, true)?;
        let len = items.len();
        items
            .try_into()
            .map_err(|_| Error::Convert(format!("expected array of length {N}, got {len}")))
    }

    fn collect_descriptors(out: &mut Vec<TypeDescriptor>) {
        T::collect_descriptors(out);
    }
}

fn convert_entries<K: FieldValue, V: FieldValue>(
    value: &Value,
    graph: &ObjectGraph,
) -> Result<Vec<(K, V)>> {
    match value {
        Value::Map(entries) => entries
            .iter()
            .map(|(k, v)| -> Result<(K, V)> { Ok((K::from_value(k, graph)?, V::from_value(v, graph)?)) })
            .collect(),
        other => Err(unexpected("Map", other)),
    }
}

macro_rules! impl_map_field {
    ($map:ident, $($bound:path),+) => {
        impl<K, V> FieldValue for $map<K, V>
        where
            K: FieldValue $(+ $bound)+,
            V: FieldValue,
        {
            fn field_type() -> FieldType {
                FieldType::map(K::field_type(), V::field_type(), V::NULLABLE)
            }

            fn to_value(&self, graph: &mut ObjectGraph) -> Value {
                Value::Map(
                    self.iter()
                        .map(|(k, v)| (k.to_value(graph), v.to_value(graph)))
                        .collect(),
                )
            }

            fn from_value(value: &Value, graph: &ObjectGraph) -> Result<Self> {
                Ok(convert_entries::<K, V>(value, graph)?.into_iter().collect())
            }

            fn collect_descriptors(out: &mut Vec<TypeDescriptor>) {
                K::collect_descriptors(out);
                V::collect_descriptors(out);
            }
        }
    };
}

// HashMap iteration order is unspecified; prefer BTreeMap or IndexMap for stable bytes.
impl_map_field!(HashMap, Eq, Hash);
impl_map_field!(BTreeMap, Ord);
#[cfg(feature = "indexmap")]
use indexmap::IndexMap;
#[cfg(feature = "indexmap")]
impl_map_field!(IndexMap, Eq, Hash);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_flattens_into_nullable() {
        assert!(<Option<String>>::NULLABLE);
        assert_eq!(<Option<String>>::field_type(), FieldType::String);
        assert_eq!(
            <Vec<Option<i32>>>::field_type(),
            FieldType::list(FieldType::Int, true)
        );
    }

    #[test]
    fn array_length_is_checked() {
        let graph = ObjectGraph::new();
        let value = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(<[i32; 2]>::from_value(&value, &graph).unwrap(), [1, 2]);
        assert!(matches!(
            <[i32; 3]>::from_value(&value, &graph),
            Err(Error::Convert(_))
        ));
        assert!(<Vec<i32>>::from_value(&value, &graph).is_err());
    }

    #[test]
    fn btree_map_round_trips_through_value() {
        let mut graph = ObjectGraph::new();
        let map: BTreeMap<String, i64> = [("a".to_owned(), 1), ("b".to_owned(), 2)].into();
        let value = map.to_value(&mut graph);
        assert_eq!(
            value,
            Value::Map(vec![
                (Value::string("a"), Value::Long(1)),
                (Value::string("b"), Value::Long(2)),
            ])
        );
        assert_eq!(
            <BTreeMap<String, i64>>::from_value(&value, &graph).unwrap(),
            map
        );
    }
}
