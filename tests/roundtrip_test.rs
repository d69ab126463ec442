use nibblepack::{
    CodecConfig, FieldType, NullPolicy, ObjectGraph, Registry, TypeDescriptor, Value,
};
use proptest::prelude::*;

fn primitives() -> TypeDescriptor {
    TypeDescriptor::new("Primitives")
        .field("b", FieldType::Byte)
        .field("s", FieldType::Short)
        .field("i", FieldType::Int)
        .field("l", FieldType::Long)
        .field("f", FieldType::Float)
        .field("d", FieldType::Double)
        .field("z", FieldType::Boolean)
        .field("c", FieldType::Char)
        .field("t", FieldType::String)
        .field("e", FieldType::enumeration("Color", ["Red", "Green", "Blue"]))
}

fn roundtrip(registry: &Registry, type_name: &str, fields: Vec<Value>) -> Vec<Value> {
    let mut graph = ObjectGraph::new();
    let root = graph.insert(type_name, fields);
    let bytes = registry.serialize(&graph, Some(root)).unwrap();
    let decoded = registry.deserialize(bytes, type_name).unwrap();
    let object = decoded.graph.get(decoded.root.unwrap()).unwrap();
    assert_eq!(object.type_name(), type_name);
    object.fields().to_vec()
}

#[test]
fn test_primitive_boundaries() {
    let registry = Registry::new();
    registry.register(&primitives()).unwrap();

    let minimums = vec![
        Value::Byte(i8::MIN),
        Value::Short(i16::MIN),
        Value::Int(i32::MIN),
        Value::Long(i64::MIN),
        Value::Float(f32::MIN),
        Value::Double(f64::MIN),
        Value::Boolean(false),
        Value::Char('\0'),
        Value::string(""),
        Value::Enum(0),
    ];
    assert_eq!(roundtrip(&registry, "Primitives", minimums.clone()), minimums);

    let maximums = vec![
        Value::Byte(i8::MAX),
        Value::Short(i16::MAX),
        Value::Int(i32::MAX),
        Value::Long(i64::MAX),
        Value::Float(f32::MAX),
        Value::Double(f64::MAX),
        Value::Boolean(true),
        Value::Char(char::MAX),
        Value::string("日本語 and emoji 🦀"),
        Value::Enum(2),
    ];
    assert_eq!(roundtrip(&registry, "Primitives", maximums.clone()), maximums);
}

#[test]
fn test_special_floats() {
    let registry = Registry::new();
    registry
        .register(
            &TypeDescriptor::new("Floats")
                .field("f", FieldType::Float)
                .field("d", FieldType::Double),
        )
        .unwrap();

    let out = roundtrip(
        &registry,
        "Floats",
        vec![Value::Float(f32::NAN), Value::Double(f64::NEG_INFINITY)],
    );
    assert!(matches!(out[0], Value::Float(f) if f.is_nan()));
    assert_eq!(out[1], Value::Double(f64::NEG_INFINITY));

    let out = roundtrip(&registry, "Floats", vec![Value::Float(-0.0), Value::Double(-0.0)]);
    assert!(matches!(out[0], Value::Float(f) if f.to_bits() == (-0.0f32).to_bits()));
    assert!(matches!(out[1], Value::Double(d) if d.to_bits() == (-0.0f64).to_bits()));
}

#[test]
fn test_long_strings_use_multi_byte_varint() {
    let registry = Registry::new();
    registry
        .register(&TypeDescriptor::new("Text").field("body", FieldType::String))
        .unwrap();
    let body = "x".repeat(300);
    let mut graph = ObjectGraph::new();
    let root = graph.insert("Text", vec![Value::string(body.clone())]);
    let bytes = registry.serialize(&graph, Some(root)).unwrap();
    // 300 = 0b10_0101100 -> [0xAC, 0x02]
    assert_eq!(&bytes[3..5], &[0xAC, 0x02]);
    assert_eq!(bytes.len(), 5 + 300);

    let decoded = registry.deserialize(bytes, "Text").unwrap();
    assert_eq!(
        decoded.graph.get(decoded.root.unwrap()).unwrap().fields(),
        &[Value::String(body)]
    );
}

fn nullable_mix() -> TypeDescriptor {
    TypeDescriptor::new("Mixed")
        .field("id", FieldType::Long)
        .nullable_field("name", FieldType::String)
        .nullable_field("score", FieldType::Double)
        .nullable_field("child", FieldType::object("Leaf"))
        .nullable_field("tags", FieldType::list(FieldType::String, false))
        .field("flags", FieldType::array(FieldType::Boolean, true))
        .nullable_field("level", FieldType::enumeration("Level", ["Low", "High"]))
}

fn leaf() -> TypeDescriptor {
    TypeDescriptor::new("Leaf").nullable_field("note", FieldType::String)
}

fn null_patterns(policy: NullPolicy) {
    let registry = Registry::with_config(CodecConfig::default().with_null_policy(policy));
    registry.register_all(&[leaf(), nullable_mix()]).unwrap();

    for mask in 0u32..32 {
        let set = |bit: u32| mask & (1 << bit) != 0;
        let mut graph = ObjectGraph::new();
        let child = if set(2) {
            Value::Object(graph.insert("Leaf", vec![Value::Null]))
        } else {
            Value::Null
        };
        let fields = vec![
            Value::Long(i64::from(mask)),
            if set(0) { Value::string("name") } else { Value::Null },
            if set(1) { Value::Double(1.5) } else { Value::Null },
            child,
            if set(3) {
                Value::List(vec![Value::string("t")])
            } else {
                Value::Null
            },
            Value::Array(vec![Value::Boolean(true), Value::Null]),
            if set(4) { Value::Enum(1) } else { Value::Null },
        ];
        let root = graph.insert("Mixed", fields);
        let bytes = registry.serialize(&graph, Some(root)).unwrap();
        let decoded = registry.deserialize(bytes, "Mixed").unwrap();
        let out = decoded.graph.get(decoded.root.unwrap()).unwrap().fields();
        let original = graph.get(root).unwrap().fields();

        for ordinal in [0, 1, 2, 4, 5, 6] {
            assert_eq!(out[ordinal], original[ordinal], "mask {mask} field {ordinal}");
        }
        assert_eq!(out[3].is_null(), !set(2), "mask {mask}");
        if let Value::Object(id) = out[3] {
            let leaf = decoded.graph.get(id).unwrap();
            assert_eq!(leaf.type_name(), "Leaf");
            assert_eq!(leaf.fields(), &[Value::Null]);
        }
    }
}

#[test]
fn test_null_preservation_bitmap() {
    null_patterns(NullPolicy::Bitmap);
}

#[test]
fn test_null_preservation_per_field() {
    null_patterns(NullPolicy::PerField);
}

fn sparse_scalars() -> TypeDescriptor {
    TypeDescriptor::new("Sparse")
        .nullable_field("b", FieldType::Byte)
        .nullable_field("s", FieldType::Short)
        .nullable_field("i", FieldType::Int)
        .nullable_field("l", FieldType::Long)
        .nullable_field("f", FieldType::Float)
        .nullable_field("z", FieldType::Boolean)
        .nullable_field("c", FieldType::Char)
}

fn sparse_patterns(policy: NullPolicy) {
    let registry = Registry::with_config(CodecConfig::default().with_null_policy(policy));
    registry.register(&sparse_scalars()).unwrap();
    let present = [
        Value::Byte(-3),
        Value::Short(300),
        Value::Int(-70_000),
        Value::Long(1 << 40),
        Value::Float(2.5),
        Value::Boolean(false),
        Value::Char('é'),
    ];

    for mask in 0u32..128 {
        let fields: Vec<Value> = present
            .iter()
            .enumerate()
            .map(|(i, v)| if mask & (1 << i) != 0 { v.clone() } else { Value::Null })
            .collect();
        let mut graph = ObjectGraph::new();
        let root = graph.insert("Sparse", fields.clone());
        let bytes = registry.serialize(&graph, Some(root)).unwrap();
        assert_eq!(bytes[0], 0x10 | policy.record_flag(), "mask {mask}");

        let decoded = registry.deserialize(bytes, "Sparse").unwrap();
        assert_eq!(
            decoded.graph.get(decoded.root.unwrap()).unwrap().fields(),
            fields.as_slice(),
            "mask {mask}"
        );
    }
}

#[test]
fn test_nullable_scalars_bitmap() {
    sparse_patterns(NullPolicy::Bitmap);
}

#[test]
fn test_nullable_scalars_per_field() {
    sparse_patterns(NullPolicy::PerField);
}

#[test]
fn test_empty_and_null_containers_are_distinct() {
    let registry = Registry::new();
    registry
        .register(
            &TypeDescriptor::new("Bag")
                .nullable_field("list", FieldType::list(FieldType::Int, false))
                .nullable_field("array", FieldType::array(FieldType::String, true))
                .nullable_field("map", FieldType::map(FieldType::Int, FieldType::String, true)),
        )
        .unwrap();

    let empty = vec![
        Value::List(vec![]),
        Value::Array(vec![]),
        Value::Map(vec![]),
    ];
    assert_eq!(roundtrip(&registry, "Bag", empty.clone()), empty);

    let null = vec![Value::Null, Value::Null, Value::Null];
    assert_eq!(roundtrip(&registry, "Bag", null.clone()), null);

    let full = vec![
        Value::List(vec![Value::Int(1), Value::Int(2)]),
        Value::Array(vec![Value::Null, Value::string("x")]),
        Value::Map(vec![
            (Value::Int(2), Value::Null),
            (Value::Int(1), Value::string("one")),
        ]),
    ];
    assert_eq!(roundtrip(&registry, "Bag", full.clone()), full);
}

#[test]
fn test_container_codecs_are_shared() {
    let registry = Registry::new();
    registry
        .register(
            &TypeDescriptor::new("A")
                .field("xs", FieldType::list(FieldType::Int, false))
                .field("ys", FieldType::list(FieldType::Int, false)),
        )
        .unwrap();
    assert_eq!(registry.container_codec_count(), 1);

    registry
        .register(
            &TypeDescriptor::new("B")
                .field("zs", FieldType::list(FieldType::Int, false))
                .field("ws", FieldType::list(FieldType::Int, true)),
        )
        .unwrap();
    assert_eq!(registry.container_codec_count(), 2);
}

proptest! {
    #[test]
    fn prop_scalars_round_trip(
        b in any::<i8>(),
        s in any::<i16>(),
        i in any::<i32>(),
        l in any::<i64>(),
        f in any::<f32>().prop_filter("NaN never compares equal", |f| !f.is_nan()),
        d in any::<f64>().prop_filter("NaN never compares equal", |d| !d.is_nan()),
        z in any::<bool>(),
        c in any::<char>(),
        t in ".*",
        e in 0u16..3,
    ) {
        let registry = Registry::new();
        registry.register(&primitives()).unwrap();
        let fields = vec![
            Value::Byte(b),
            Value::Short(s),
            Value::Int(i),
            Value::Long(l),
            Value::Float(f),
            Value::Double(d),
            Value::Boolean(z),
            Value::Char(c),
            Value::String(t),
            Value::Enum(e),
        ];
        prop_assert_eq!(roundtrip(&registry, "Primitives", fields.clone()), fields);
    }
}
