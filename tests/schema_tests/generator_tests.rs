//! Generator Tests
//!
//! Tests verify:
//! - Grow-only widths never shrink across writes of one instance
//! - Recomputed widths follow the current value
//! - Width overflow is reported before any byte is written, also at the grow-only maximum
//! - Length, null-flag and type-id companions
//! - Generators invoked directly through their trait

use std::sync::Arc;

use fieldstore::io::ContentWriter;
use fieldstore::schema::{
    ElementType, GenContext, Generator, LengthGenerator, NumberWidth, StoragePool, WidthRetention,
};
use fieldstore::{Config, FieldDecl, FieldType, Instance, SchemaDecl, SchemaRegistry, StoreError, TypeRegistry, Value};

fn registry_with(decls: Vec<SchemaDecl>) -> SchemaRegistry {
    let registry = SchemaRegistry::new(Config::default());
    registry.register_all(decls).unwrap();
    registry
}

fn counter_decl(retention: WidthRetention, max: NumberWidth) -> SchemaDecl {
    SchemaDecl::builder("Counter")
        .field(
            FieldDecl::new("n", FieldType::Int)
                .unsigned()
                .dynamic_width(NumberWidth::W1, max, retention),
        )
        .build()
}

fn point_decl() -> SchemaDecl {
    SchemaDecl::builder("Point")
        .field(FieldDecl::new("x", FieldType::Float))
        .build()
}

// =============================================================================
// Width Tests
// =============================================================================

#[test]
fn test_grow_only_width_is_monotonic() {
    let registry = registry_with(vec![counter_decl(WidthRetention::GrowOnly, NumberWidth::W8)]);
    let schema = registry.schema("Counter").unwrap();
    let env = registry.env();

    let width = schema.field_by_name("n$width").unwrap();
    assert_eq!(width.accessor().pool(), StoragePool::Instance);

    let mut counter = Instance::new(&schema).with("n", 70_000u64).unwrap();
    let bytes = schema.to_bytes(&env, &mut counter).unwrap();
    assert_eq!(counter.companion("n$width"), Some(&Value::UInt(4)));
    assert_eq!(bytes.len(), 1 + 4);

    counter.set("n", 3u64).unwrap();
    let bytes = schema.to_bytes(&env, &mut counter).unwrap();
    assert_eq!(counter.companion("n$width"), Some(&Value::UInt(4)));
    assert_eq!(bytes.len(), 1 + 4);

    let decoded = schema.from_bytes(&env, bytes).unwrap();
    assert_eq!(decoded.get("n").unwrap(), &Value::UInt(3));
}

#[test]
fn test_grow_only_width_survives_reload() {
    let registry = registry_with(vec![counter_decl(WidthRetention::GrowOnly, NumberWidth::W8)]);
    let schema = registry.schema("Counter").unwrap();
    let env = registry.env();

    let mut counter = Instance::new(&schema).with("n", 300u64).unwrap();
    let bytes = schema.to_bytes(&env, &mut counter).unwrap();

    let mut reloaded = schema.from_bytes(&env, bytes).unwrap();
    assert_eq!(reloaded.companion("n$width"), Some(&Value::UInt(2)));
    reloaded.set("n", 1u64).unwrap();
    assert_eq!(schema.to_bytes(&env, &mut reloaded).unwrap().len(), 1 + 2);
}

#[test]
fn test_recompute_width_shrinks() {
    let registry = registry_with(vec![counter_decl(WidthRetention::Recompute, NumberWidth::W8)]);
    let schema = registry.schema("Counter").unwrap();
    let env = registry.env();

    let width = schema.field_by_name("n$width").unwrap();
    assert_eq!(width.accessor().pool(), StoragePool::Io);

    let mut counter = Instance::new(&schema).with("n", u64::MAX).unwrap();
    assert_eq!(schema.to_bytes(&env, &mut counter).unwrap().len(), 1 + 8);

    counter.set("n", 200u64).unwrap();
    assert_eq!(schema.to_bytes(&env, &mut counter).unwrap().len(), 1 + 1);
    assert_eq!(counter.companion("n$width"), Some(&Value::UInt(1)));
}

#[test]
fn test_width_respects_minimum() {
    let registry = registry_with(vec![SchemaDecl::builder("Padded")
        .field(FieldDecl::new("v", FieldType::Int).dynamic_width(
            NumberWidth::W2,
            NumberWidth::W4,
            WidthRetention::Recompute,
        ))
        .build()]);
    let schema = registry.schema("Padded").unwrap();
    let env = registry.env();

    let mut padded = Instance::new(&schema).with("v", -1i64).unwrap();
    let bytes = schema.to_bytes(&env, &mut padded).unwrap();
    assert_eq!(padded.companion("v$width"), Some(&Value::UInt(2)));
    assert_eq!(schema.from_bytes(&env, bytes).unwrap().get("v").unwrap(), &Value::Int(-1));
}

#[test]
fn test_width_overflow_before_write() {
    let registry = registry_with(vec![counter_decl(WidthRetention::Recompute, NumberWidth::W2)]);
    let schema = registry.schema("Counter").unwrap();
    let env = registry.env();

    let mut counter = Instance::new(&schema).with("n", 70_000u64).unwrap();
    let mut out = ContentWriter::new();
    match schema.write(&env, &mut counter, &mut out) {
        Err(StoreError::NumericOverflow { field, required, max }) => {
            assert_eq!(field, "n");
            assert_eq!(required, 4);
            assert_eq!(max, 2);
        }
        other => panic!("expected overflow, got {other:?}"),
    }
    assert_eq!(out.position(), 0);
}

#[test]
fn test_grow_only_at_maximum_still_checks_overflow() {
    let registry = registry_with(vec![counter_decl(WidthRetention::GrowOnly, NumberWidth::W2)]);
    let schema = registry.schema("Counter").unwrap();
    let env = registry.env();

    let mut counter = Instance::new(&schema).with("n", 300u64).unwrap();
    schema.to_bytes(&env, &mut counter).unwrap();
    assert_eq!(counter.companion("n$width"), Some(&Value::UInt(2)));

    counter.set("n", 70_000u64).unwrap();
    let mut out = ContentWriter::new();
    match schema.write(&env, &mut counter, &mut out) {
        Err(StoreError::NumericOverflow { field, required, max }) => {
            assert_eq!(field, "n");
            assert_eq!(required, 4);
            assert_eq!(max, 2);
        }
        other => panic!("expected overflow, got {other:?}"),
    }
    assert_eq!(out.position(), 0);

    // a value that fits still writes at the retained width
    counter.set("n", 5u64).unwrap();
    assert_eq!(schema.to_bytes(&env, &mut counter).unwrap().len(), 1 + 2);
}

#[test]
fn test_negative_value_in_unsigned_field() {
    let registry = registry_with(vec![counter_decl(WidthRetention::Recompute, NumberWidth::W8)]);
    let schema = registry.schema("Counter").unwrap();
    let env = registry.env();

    let mut counter = Instance::new(&schema).with("n", -5i64).unwrap();
    assert!(matches!(
        schema.to_bytes(&env, &mut counter),
        Err(StoreError::TypeMismatch { .. })
    ));
}

// =============================================================================
// Companion Tests
// =============================================================================

#[test]
fn test_length_and_null_flag_companions() {
    let registry = registry_with(vec![
        point_decl(),
        SchemaDecl::builder("Bag")
            .field(FieldDecl::new("label", FieldType::Str).nullable())
            .field(FieldDecl::new("points", FieldType::List(ElementType::Named("Point".to_string()))))
            .build(),
    ]);
    let schema = registry.schema("Bag").unwrap();
    let point = registry.schema("Point").unwrap();
    let env = registry.env();

    let mut bag = Instance::new(&schema)
        .with("points", vec![Instance::new(&point), Instance::new(&point), Instance::new(&point)])
        .unwrap();
    schema.prepare(&env, &mut bag).unwrap();
    assert_eq!(bag.companion("label$null"), Some(&Value::Bool(true)));
    assert_eq!(bag.companion("label$len"), Some(&Value::UInt(0)));
    assert_eq!(bag.companion("points$len"), Some(&Value::UInt(3)));

    bag.set("label", "ünï").unwrap();
    schema.prepare(&env, &mut bag).unwrap();
    assert_eq!(bag.companion("label$null"), Some(&Value::Bool(false)));
    assert_eq!(bag.companion("label$len"), Some(&Value::UInt(5)));
}

#[test]
fn test_type_ids_start_at_one() {
    let registry = registry_with(vec![
        point_decl(),
        SchemaDecl::builder("Line")
            .field(FieldDecl::new("x", FieldType::Float))
            .build(),
        SchemaDecl::builder("Any")
            .field(FieldDecl::new("value", FieldType::Dynamic))
            .build(),
    ]);
    let schema = registry.schema("Any").unwrap();
    let env = registry.env();

    let mut first = Instance::new(&schema)
        .with("value", Instance::new(&registry.schema("Line").unwrap()))
        .unwrap();
    schema.prepare(&env, &mut first).unwrap();
    assert_eq!(first.companion("value$type"), Some(&Value::UInt(1)));

    let mut second = Instance::new(&schema)
        .with("value", Instance::new(&registry.schema("Point").unwrap()))
        .unwrap();
    schema.prepare(&env, &mut second).unwrap();
    assert_eq!(second.companion("value$type"), Some(&Value::UInt(2)));
    assert_eq!(registry.id_to_type(2).unwrap(), "Point");
}

#[test]
fn test_frozen_types_reject_unseen_type() {
    let registry = registry_with(vec![
        point_decl(),
        SchemaDecl::builder("Any")
            .field(FieldDecl::new("value", FieldType::Dynamic))
            .build(),
    ]);
    let schema = registry.schema("Any").unwrap();
    let env = registry.env().frozen_types();

    let mut any = Instance::new(&schema)
        .with("value", Instance::new(&registry.schema("Point").unwrap()))
        .unwrap();
    match schema.to_bytes(&env, &mut any) {
        Err(StoreError::UnregisteredType(name)) => assert_eq!(name, "Point"),
        other => panic!("expected unregistered type, got {other:?}"),
    }

    // once recorded, frozen writes succeed
    registry.type_to_id("Point", true).unwrap();
    assert!(schema.to_bytes(&env, &mut any).is_ok());
}

#[test]
fn test_scratch_is_reset_per_operation() {
    let registry = registry_with(vec![SchemaDecl::builder("Label")
        .field(FieldDecl::new("text", FieldType::Str))
        .build()]);
    let schema = registry.schema("Label").unwrap();
    let env = registry.env();

    let mut label = Instance::new(&schema).with("text", "abcdef").unwrap();
    assert_eq!(schema.calc_size(&env, &mut label).unwrap(), 4 + 6);

    label.set("text", "ab").unwrap();
    assert_eq!(schema.calc_size(&env, &mut label).unwrap(), 4 + 2);
    assert_eq!(label.companion("text$len"), Some(&Value::UInt(2)));
}

// =============================================================================
// Direct Generator Tests
// =============================================================================

#[test]
fn test_length_generator_rejects_non_sequence() {
    let registry = registry_with(vec![SchemaDecl::builder("Mixed")
        .field(FieldDecl::new("text", FieldType::Str))
        .field(FieldDecl::new("n", FieldType::Int))
        .build()]);
    let schema = registry.schema("Mixed").unwrap();
    let env = registry.env();
    let instance = Instance::new(&schema).with("n", 9i64).unwrap();

    let source = schema.field_by_name("n").unwrap().accessor();
    let target = schema.field_by_name("text$len").unwrap();
    let generator: Arc<dyn Generator> = Arc::new(LengthGenerator {
        source,
        source_name: "n".to_string(),
    });
    let ctx = GenContext {
        env: &env,
        allow_external_mod: false,
    };

    assert!(generator.should_generate(&ctx, target, &instance));
    assert!(matches!(
        generator.generate(&ctx, target, &instance),
        Err(StoreError::TypeMismatch { .. })
    ));
}
