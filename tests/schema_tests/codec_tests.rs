//! Codec Tests
//!
//! Tests verify:
//! - Round trips of strings, blobs, compressed blobs and nested records
//! - Pointer fields (null stored as 0) and polymorphic values behind type ids
//! - Inline lists, named and dynamic
//! - Extension records after the declared fields
//! - Write-side failures (null in non-null fields, numeric overflow, mixed lists)
//! - Read-side failures (truncation, trailing bytes, unknown type ids)

use fieldstore::schema::{ElementType, NumberWidth};
use fieldstore::{
    ChunkPtr, Config, FieldDecl, FieldType, Instance, SchemaDecl, SchemaRegistry, StoreError, TypeRegistry, Value,
};

fn registry_with(decls: Vec<SchemaDecl>) -> SchemaRegistry {
    let registry = SchemaRegistry::new(Config::default());
    registry.register_all(decls).unwrap();
    registry
}

fn point_decl() -> SchemaDecl {
    SchemaDecl::builder("Point")
        .field(FieldDecl::new("x", FieldType::Float))
        .field(FieldDecl::new("y", FieldType::Float))
        .build()
}

fn shape_decl() -> SchemaDecl {
    SchemaDecl::builder("Shape")
        .field(FieldDecl::new("name", FieldType::Str))
        .field(FieldDecl::new("origin", FieldType::Inline("Point".to_string())))
        .field(FieldDecl::new("corners", FieldType::List(ElementType::Named("Point".to_string()))))
        .build()
}

fn point(registry: &SchemaRegistry, x: f64, y: f64) -> Instance {
    let schema = registry.schema("Point").unwrap();
    Instance::new(&schema).with("x", x).unwrap().with("y", y).unwrap()
}

fn ptr(raw: u64) -> ChunkPtr {
    ChunkPtr::from_raw(raw).unwrap()
}

// =============================================================================
// Scalar Tests
// =============================================================================

#[test]
fn test_fixed_record_round_trip() {
    let registry = registry_with(vec![point_decl()]);
    let schema = registry.schema("Point").unwrap();
    let env = registry.env();

    let mut p = point(&registry, 1.5, -2.25);
    let bytes = schema.to_bytes(&env, &mut p).unwrap();
    assert_eq!(bytes.len(), 16);
    assert_eq!(&bytes[0..8], &1.5f64.to_bits().to_le_bytes());

    assert_eq!(schema.from_bytes(&env, bytes).unwrap(), p);
}

#[test]
fn test_strings_and_blobs_round_trip() {
    let registry = registry_with(vec![SchemaDecl::builder("Doc")
        .field(FieldDecl::new("title", FieldType::Str))
        .field(FieldDecl::new("body", FieldType::Bytes))
        .build()]);
    let schema = registry.schema("Doc").unwrap();
    let env = registry.env();

    let mut doc = Instance::new(&schema)
        .with("title", "héllo")
        .unwrap()
        .with("body", vec![0u8, 1, 2, 255])
        .unwrap();
    let bytes = schema.to_bytes(&env, &mut doc).unwrap();
    assert_eq!(bytes.len(), 4 + 4 + 6 + 4);

    let decoded = schema.from_bytes(&env, bytes).unwrap();
    assert_eq!(decoded.get("title").unwrap().as_str(), Some("héllo"));
    assert_eq!(decoded.get("body").unwrap().as_bytes(), Some(&[0u8, 1, 2, 255][..]));
}

#[test]
fn test_nullable_string_round_trip() {
    let registry = registry_with(vec![SchemaDecl::builder("Label")
        .field(FieldDecl::new("text", FieldType::Str).nullable())
        .build()]);
    let schema = registry.schema("Label").unwrap();
    let env = registry.env();

    let mut empty = Instance::new(&schema);
    let bytes = schema.to_bytes(&env, &mut empty).unwrap();
    // null-flag group + zero length
    assert_eq!(bytes.len(), 1 + 4);
    assert!(schema.from_bytes(&env, bytes).unwrap().get("text").unwrap().is_null());

    let mut full = Instance::new(&schema).with("text", "x").unwrap();
    let bytes = schema.to_bytes(&env, &mut full).unwrap();
    assert_eq!(bytes.len(), 1 + 4 + 1);
    assert_eq!(schema.from_bytes(&env, bytes).unwrap(), full);
}

#[test]
fn test_default_if_null_stores_default() {
    let registry = registry_with(vec![SchemaDecl::builder("Score")
        .field(FieldDecl::new("points", FieldType::Int).default_if_null())
        .build()]);
    let schema = registry.schema("Score").unwrap();
    let env = registry.env();

    let mut score = Instance::new(&schema).with("points", Value::Null).unwrap();
    assert_eq!(score.get("points").unwrap(), &Value::Int(0));

    let bytes = schema.to_bytes(&env, &mut score).unwrap();
    assert_eq!(bytes.len(), 8);
    assert_eq!(schema.from_bytes(&env, bytes).unwrap().get("points").unwrap(), &Value::Int(0));
}

#[test]
fn test_signed_narrow_int_sign_extends() {
    let registry = registry_with(vec![SchemaDecl::builder("Delta")
        .field(FieldDecl::new("d", FieldType::Int).fixed_width(NumberWidth::W2))
        .build()]);
    let schema = registry.schema("Delta").unwrap();
    let env = registry.env();

    let mut delta = Instance::new(&schema).with("d", -300i64).unwrap();
    let bytes = schema.to_bytes(&env, &mut delta).unwrap();
    assert_eq!(bytes.len(), 2);
    assert_eq!(schema.from_bytes(&env, bytes).unwrap().get("d").unwrap(), &Value::Int(-300));
}

#[test]
fn test_compressed_blob_round_trip() {
    let registry = registry_with(vec![SchemaDecl::builder("Archive")
        .field(FieldDecl::new("payload", FieldType::Bytes).compressed())
        .build()]);
    let schema = registry.schema("Archive").unwrap();
    let env = registry.env();

    let raw = vec![b'a'; 4096];
    let mut archive = Instance::new(&schema).with("payload", raw.clone()).unwrap();
    let bytes = schema.to_bytes(&env, &mut archive).unwrap();
    assert!(bytes.len() < 256, "compressed to {} bytes", bytes.len());

    let decoded = schema.from_bytes(&env, bytes).unwrap();
    assert_eq!(decoded.get("payload").unwrap().as_bytes(), Some(&raw[..]));
}

// =============================================================================
// Nested Record Tests
// =============================================================================

#[test]
fn test_inline_record_and_list_round_trip() {
    let registry = registry_with(vec![point_decl(), shape_decl()]);
    let schema = registry.schema("Shape").unwrap();
    let env = registry.env();

    let corners = vec![point(&registry, 0.0, 0.0), point(&registry, 3.0, 4.0)];
    let mut shape = Instance::new(&schema)
        .with("name", "tri")
        .unwrap()
        .with("origin", point(&registry, 1.0, 1.0))
        .unwrap()
        .with("corners", corners)
        .unwrap();

    let size = schema.calc_size(&env, &mut shape).unwrap();
    let bytes = schema.to_bytes(&env, &mut shape).unwrap();
    assert_eq!(size, bytes.len() as u64);
    // two length companions, origin, name, two corners
    assert_eq!(size, 4 + 4 + 16 + 3 + 32);

    let decoded = schema.from_bytes(&env, bytes).unwrap();
    assert_eq!(decoded.get("corners").unwrap().as_list().map(<[Instance]>::len), Some(2));
    assert_eq!(decoded, shape);
}

#[test]
fn test_list_rejects_foreign_elements() {
    let registry = registry_with(vec![
        point_decl(),
        shape_decl(),
        SchemaDecl::builder("Other")
            .field(FieldDecl::new("v", FieldType::Float))
            .build(),
    ]);
    let schema = registry.schema("Shape").unwrap();
    let other = registry.schema("Other").unwrap();
    let env = registry.env();

    let mut shape = Instance::new(&schema)
        .with("corners", vec![point(&registry, 0.0, 0.0), Instance::new(&other)])
        .unwrap();
    assert!(matches!(
        schema.to_bytes(&env, &mut shape),
        Err(StoreError::TypeMismatch { .. })
    ));
}

#[test]
fn test_dynamic_value_round_trip() {
    let registry = registry_with(vec![
        point_decl(),
        SchemaDecl::builder("Any")
            .field(FieldDecl::new("value", FieldType::Dynamic).nullable())
            .field(FieldDecl::new("items", FieldType::List(ElementType::Dynamic)))
            .build(),
    ]);
    let schema = registry.schema("Any").unwrap();
    let env = registry.env();

    let mut any = Instance::new(&schema)
        .with("value", point(&registry, 7.0, 8.0))
        .unwrap()
        .with("items", vec![point(&registry, 1.0, 2.0)])
        .unwrap();
    let bytes = schema.to_bytes(&env, &mut any).unwrap();

    let point_id = registry.type_to_id("Point", false).unwrap();
    assert_eq!(point_id, 1);
    assert_eq!(any.companion("value$type"), Some(&Value::UInt(1)));
    assert_eq!(any.companion("items$type"), Some(&Value::UInt(1)));

    let decoded = schema.from_bytes(&env, bytes).unwrap();
    assert_eq!(decoded, any);
}

#[test]
fn test_null_dynamic_value_has_no_type() {
    let registry = registry_with(vec![
        point_decl(),
        SchemaDecl::builder("Any")
            .field(FieldDecl::new("value", FieldType::Dynamic).nullable())
            .build(),
    ]);
    let schema = registry.schema("Any").unwrap();
    let env = registry.env();

    let mut any = Instance::new(&schema);
    let bytes = schema.to_bytes(&env, &mut any).unwrap();
    assert_eq!(any.companion("value$type"), Some(&Value::UInt(0)));
    assert_eq!(bytes.len(), 1 + 4);
    assert_eq!(schema.from_bytes(&env, bytes).unwrap(), any);
}

#[test]
fn test_unknown_type_id_on_read() {
    let registry = registry_with(vec![SchemaDecl::builder("Any")
        .field(FieldDecl::new("value", FieldType::Dynamic).nullable())
        .build()]);
    let schema = registry.schema("Any").unwrap();
    let env = registry.env();

    // present value (flag clear), type id 99
    let data = vec![0u8, 99, 0, 0, 0];
    assert!(matches!(
        schema.from_bytes(&env, data),
        Err(StoreError::UnknownTypeId(99))
    ));
}

// =============================================================================
// Pointer Tests
// =============================================================================

#[test]
fn test_pointers_round_trip_with_null_as_zero() {
    let registry = registry_with(vec![
        point_decl(),
        SchemaDecl::builder("Holder")
            .field(FieldDecl::new("target", FieldType::Reference("Point".to_string())).nullable())
            .field(FieldDecl::new("data", FieldType::ChunkPointer).nullable())
            .build(),
    ]);
    let schema = registry.schema("Holder").unwrap();
    let env = registry.env();

    assert_eq!(schema.fixed_size(), Some(16));
    assert!(schema.has_pointers());

    let mut holder = Instance::new(&schema).with("target", ptr(42)).unwrap();
    let bytes = schema.to_bytes(&env, &mut holder).unwrap();
    assert_eq!(bytes.len(), 16);
    assert!(bytes.iter().filter(|b| **b != 0).count() == 1);

    let decoded = schema.from_bytes(&env, bytes).unwrap();
    assert_eq!(decoded.get("target").unwrap(), &Value::Ptr(ptr(42)));
    assert!(decoded.get("data").unwrap().is_null());
}

#[test]
fn test_null_in_non_null_pointer_rejected() {
    let registry = registry_with(vec![
        point_decl(),
        SchemaDecl::builder("Strict")
            .field(FieldDecl::new("target", FieldType::Reference("Point".to_string())))
            .build(),
    ]);
    let schema = registry.schema("Strict").unwrap();
    let env = registry.env();

    let mut strict = Instance::new(&schema);
    match schema.to_bytes(&env, &mut strict) {
        Err(StoreError::NullValue(field)) => assert_eq!(field, "target"),
        other => panic!("expected null value error, got {other:?}"),
    }
}

// =============================================================================
// Extension Tests
// =============================================================================

#[test]
fn test_extension_record_round_trip() {
    let registry = registry_with(vec![
        SchemaDecl::builder("Base")
            .field(FieldDecl::new("id", FieldType::Int))
            .extensible()
            .build(),
        SchemaDecl::builder("Extra")
            .field(FieldDecl::new("note", FieldType::Str))
            .build(),
    ]);
    let base = registry.schema("Base").unwrap();
    let extra = registry.schema("Extra").unwrap();
    let env = registry.env();

    let mut plain = Instance::new(&base).with("id", 5i64).unwrap();
    let bytes = base.to_bytes(&env, &mut plain).unwrap();
    assert_eq!(bytes.len(), 8 + 4);
    assert_eq!(base.from_bytes(&env, bytes).unwrap().extension(), None);

    let mut extended = plain.clone();
    extended
        .set_extension(Some(Instance::new(&extra).with("note", "more").unwrap()))
        .unwrap();
    let bytes = base.to_bytes(&env, &mut extended).unwrap();
    assert_eq!(bytes.len(), 8 + 4 + 4 + 4);

    let decoded = base.from_bytes(&env, bytes).unwrap();
    assert_eq!(decoded.extension().map(|e| e.schema().name()), Some("Extra"));
    assert_eq!(decoded, extended);
}

#[test]
fn test_extension_requires_extensible_schema() {
    let registry = registry_with(vec![point_decl()]);
    let schema = registry.schema("Point").unwrap();

    let mut p = Instance::new(&schema);
    let other = Instance::new(&schema);
    assert!(matches!(
        p.set_extension(Some(other)),
        Err(StoreError::InvalidSchema { .. })
    ));
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_fixed_width_overflow() {
    let registry = registry_with(vec![SchemaDecl::builder("Tiny")
        .field(FieldDecl::new("n", FieldType::Int).unsigned().fixed_width(NumberWidth::W1))
        .build()]);
    let schema = registry.schema("Tiny").unwrap();
    let env = registry.env();

    let mut tiny = Instance::new(&schema).with("n", 300u64).unwrap();
    match schema.to_bytes(&env, &mut tiny) {
        Err(StoreError::NumericOverflow { field, required, max }) => {
            assert_eq!(field, "n");
            assert_eq!(required, 2);
            assert_eq!(max, 1);
        }
        other => panic!("expected overflow, got {other:?}"),
    }
}

#[test]
fn test_truncated_record() {
    let registry = registry_with(vec![point_decl()]);
    let schema = registry.schema("Point").unwrap();
    let env = registry.env();

    assert!(matches!(
        schema.from_bytes(&env, vec![0u8; 10]),
        Err(StoreError::UnexpectedEof { needed: 8, remaining: 2 })
    ));
}

#[test]
fn test_trailing_bytes_rejected() {
    let registry = registry_with(vec![point_decl()]);
    let schema = registry.schema("Point").unwrap();
    let env = registry.env();

    match schema.from_bytes(&env, vec![0u8; 17]) {
        Err(StoreError::Corruption { field, detail }) => {
            assert_eq!(field, "Point");
            assert!(detail.contains("1 trailing"));
        }
        other => panic!("expected corruption, got {other:?}"),
    }
}

#[test]
fn test_instance_of_other_schema_rejected() {
    let registry = registry_with(vec![point_decl(), shape_decl()]);
    let shape = registry.schema("Shape").unwrap();
    let env = registry.env();

    let mut p = point(&registry, 0.0, 0.0);
    assert!(matches!(
        shape.to_bytes(&env, &mut p),
        Err(StoreError::InvalidSchema { .. })
    ));
}
