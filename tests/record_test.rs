use nibblepack::{FieldType, FieldValue, NullPolicy, Record, Registry, TypeDescriptor};
use std::collections::{BTreeMap, HashMap};

#[derive(Record, Debug, PartialEq, Clone, Copy)]
enum Status {
    Active,
    Suspended,
    #[nibblepack(rename = "Gone")]
    Deleted,
}

#[derive(Record, Debug, PartialEq, Clone)]
struct Address {
    street: String,
    zip: Option<i32>,
}

#[derive(Record, Debug, PartialEq, Clone)]
#[nibblepack(rename = "Customer")]
struct User {
    id: i64,
    name: String,
    email: Option<String>,
    status: Status,
    score: f64,
    initial: char,
    address: Option<Address>,
    tags: Vec<String>,
    lucky: [i16; 3],
    prefs: BTreeMap<String, Option<String>>,
    history: Vec<Address>,
    #[nibblepack(skip)]
    session: Option<String>,
}

#[derive(Record, Debug, PartialEq)]
struct TreeNode {
    value: i32,
    children: Vec<TreeNode>,
    parent_hint: Option<Box<TreeNode>>,
}

fn sample_user() -> User {
    User {
        id: 42,
        name: "Ada".to_owned(),
        email: None,
        status: Status::Suspended,
        score: 99.5,
        initial: 'A',
        address: Some(Address {
            street: "Main".to_owned(),
            zip: Some(12345),
        }),
        tags: vec!["admin".to_owned(), "ops".to_owned()],
        lucky: [7, -7, 0],
        prefs: [
            ("theme".to_owned(), Some("dark".to_owned())),
            ("lang".to_owned(), None),
        ]
        .into_iter()
        .collect(),
        history: vec![Address {
            street: "Old".to_owned(),
            zip: None,
        }],
        session: Some("ephemeral".to_owned()),
    }
}

#[test]
fn test_descriptor_reflects_fields() {
    let descriptor = <User as Record>::descriptor();
    assert_eq!(descriptor.name(), "Customer");
    assert_eq!(<User as Record>::TYPE_NAME, "Customer");

    let names: Vec<&str> = descriptor.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "id", "name", "email", "status", "score", "initial", "address", "tags", "lucky",
            "prefs", "history"
        ]
    );
    let email = &descriptor.fields()[2];
    assert!(email.nullable);
    assert_eq!(email.ty, FieldType::String);
    assert_eq!(
        descriptor.fields()[3].ty,
        FieldType::enumeration("Status", ["Active", "Suspended", "Gone"])
    );
    assert_eq!(descriptor.fields()[6].ty, FieldType::object("Address"));

    let mut all = Vec::new();
    <User as Record>::collect_descriptors(&mut all);
    let names: Vec<&str> = all.iter().map(TypeDescriptor::name).collect();
    assert_eq!(names, ["Customer", "Address"]);
}

#[test]
fn test_typed_round_trip() {
    let registry = Registry::new();
    registry.register_type::<User>().unwrap();
    assert!(registry.is_registered("Customer"));
    assert!(registry.is_registered("Address"));

    let user = sample_user();
    let bytes = registry.serialize_record(&user).unwrap();
    let decoded: User = registry.deserialize_record(bytes).unwrap();

    let expected = User {
        session: None,
        ..user
    };
    assert_eq!(decoded, expected);
}

#[test]
fn test_typed_and_graph_views_agree() {
    let registry = Registry::new();
    registry.register_type::<Address>().unwrap();
    let address = Address {
        street: "Elm".to_owned(),
        zip: None,
    };

    let bytes = registry.serialize_record(&address).unwrap();
    // Fixed-shape record: string + nullable int, one bitmap byte with bit 0 set.
    assert_eq!(&bytes[..5], &[0x10, 0x02, 0x93, 0b0000_0001, 0x03]);

    let decoded = registry.deserialize(bytes, "Address").unwrap();
    let object = decoded.graph.get(decoded.root.unwrap()).unwrap();
    assert_eq!(
        Address::read_object(&decoded.graph, decoded.root.unwrap()).unwrap(),
        address
    );
    assert_eq!(object.field(1), Some(&nibblepack::Value::Null));
}

#[test]
fn test_recursive_record() {
    let registry = Registry::new();
    registry.register_type::<TreeNode>().unwrap();

    let tree = TreeNode {
        value: 1,
        children: vec![
            TreeNode {
                value: 2,
                children: vec![],
                parent_hint: None,
            },
            TreeNode {
                value: 3,
                children: vec![TreeNode {
                    value: 4,
                    children: vec![],
                    parent_hint: None,
                }],
                parent_hint: Some(Box::new(TreeNode {
                    value: 1,
                    children: vec![],
                    parent_hint: None,
                })),
            },
        ],
        parent_hint: None,
    };

    let bytes = registry.serialize_record(&tree).unwrap();
    let decoded: TreeNode = registry.deserialize_record(bytes).unwrap();
    assert_eq!(decoded, tree);
}

#[test]
fn test_enum_field_values() {
    let mut graph = nibblepack::ObjectGraph::new();
    assert_eq!(
        Status::Deleted.to_value(&mut graph),
        nibblepack::Value::Enum(2)
    );
    assert_eq!(
        Status::from_value(&nibblepack::Value::Enum(0), &graph).unwrap(),
        Status::Active
    );
    assert!(Status::from_value(&nibblepack::Value::Enum(3), &graph).is_err());
    assert!(Status::from_value(&nibblepack::Value::Int(0), &graph).is_err());
}

#[test]
fn test_unregistered_record_type() {
    let registry = Registry::new();
    assert!(matches!(
        registry.serialize_record(&sample_user()),
        Err(nibblepack::Error::UnregisteredType { name }) if name == "Customer"
    ));
}

#[test]
fn test_hash_map_field() {
    #[derive(Record, Debug, PartialEq)]
    struct Inventory {
        counts: HashMap<String, i32>,
    }

    let registry = Registry::new();
    registry.register_type::<Inventory>().unwrap();
    let inventory = Inventory {
        counts: [("apple".to_owned(), 3), ("pear".to_owned(), 0)]
            .into_iter()
            .collect(),
    };
    let bytes = registry.serialize_record(&inventory).unwrap();
    let decoded: Inventory = registry.deserialize_record(bytes).unwrap();
    assert_eq!(decoded, inventory);
}

#[test]
fn test_nested_type_keeps_its_own_null_policy() {
    let registry = Registry::new();
    registry
        .register_with_policy(&<Address as Record>::descriptor(), NullPolicy::PerField)
        .unwrap();
    registry.register_type::<User>().unwrap();
    assert_eq!(
        registry.schema("Address").unwrap().null_policy(),
        NullPolicy::PerField
    );
    assert_eq!(
        registry.schema("Customer").unwrap().null_policy(),
        NullPolicy::Bitmap
    );

    let user = sample_user();
    let bytes = registry.serialize_record(&user).unwrap();
    let decoded: User = registry.deserialize_record(bytes).unwrap();
    assert_eq!(decoded, User { session: None, ..user });
}

#[test]
fn test_nested_type_with_another_layout_conflicts() {
    let registry = Registry::new();
    registry
        .register(&TypeDescriptor::new("Address").field("street", FieldType::String))
        .unwrap();
    assert!(matches!(
        registry.register_type::<User>(),
        Err(nibblepack::RegistrationError::Conflict { type_name }) if type_name == "Address"
    ));
}
