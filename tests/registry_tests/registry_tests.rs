//! Registry Tests
//!
//! Tests verify:
//! - Declarations register once and compile once, also across threads
//! - Type ids are assigned lazily starting at 1
//! - Snapshot files round trip declarations and type ids
//! - Snapshot corruption is detected before decoding

use std::sync::Arc;
use std::thread;

use fieldstore::registry::Snapshot;
use fieldstore::{Config, FieldDecl, FieldType, Instance, SchemaDecl, SchemaRegistry, StoreError, TypeRegistry, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn point_decl() -> SchemaDecl {
    SchemaDecl::builder("Point")
        .field(FieldDecl::new("x", FieldType::Float))
        .field(FieldDecl::new("y", FieldType::Float))
        .build()
}

fn any_decl() -> SchemaDecl {
    SchemaDecl::builder("Any")
        .field(FieldDecl::new("value", FieldType::Dynamic).nullable())
        .build()
}

fn registry_with(decls: Vec<SchemaDecl>) -> SchemaRegistry {
    let registry = SchemaRegistry::new(Config::default());
    registry.register_all(decls).unwrap();
    registry
}

fn snapshot_bytes() -> Vec<u8> {
    let registry = registry_with(vec![point_decl(), any_decl()]);
    registry.type_to_id("Point", true).unwrap();
    registry.snapshot().encode().unwrap()
}

// =============================================================================
// Declaration Tests
// =============================================================================

#[test]
fn test_declarations_sorted_by_name() {
    let registry = registry_with(vec![point_decl(), any_decl()]);

    let names: Vec<String> = registry.declarations().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["Any", "Point"]);
    assert_eq!(registry.declaration("Point"), Some(point_decl()));
    assert!(registry.contains_schema("Any"));
    assert!(!registry.contains_schema("Missing"));
}

#[test]
fn test_unknown_schema() {
    let registry = registry_with(vec![point_decl()]);
    assert!(matches!(registry.schema("Missing"), Err(StoreError::UnknownSchema(name)) if name == "Missing"));
}

#[test]
fn test_schema_compiles_once() {
    let registry = registry_with(vec![point_decl()]);
    assert_eq!(registry.compiled_count(), 0);

    let first = registry.schema("Point").unwrap();
    let second = registry.schema("Point").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.compiled_count(), 1);
}

#[test]
fn test_redeclaration_after_compile_rejected() {
    let registry = registry_with(vec![point_decl()]);
    let changed = SchemaDecl::builder("Point")
        .field(FieldDecl::new("x", FieldType::Int))
        .build();

    // still a draft: replaced
    registry.register(changed.clone()).unwrap();
    registry.register(point_decl()).unwrap();

    registry.schema("Point").unwrap();
    registry.register(point_decl()).unwrap();
    assert!(matches!(registry.register(changed), Err(StoreError::InvalidSchema { .. })));
}

#[test]
fn test_concurrent_lookups_share_schema() {
    let registry = Arc::new(registry_with(vec![point_decl(), any_decl()]));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.schema("Point").unwrap())
        })
        .collect();
    let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for schema in &schemas[1..] {
        assert!(Arc::ptr_eq(&schemas[0], schema));
    }
    assert_eq!(registry.compiled_count(), 1);
}

#[test]
fn test_background_compilation() {
    let registry = Arc::new(registry_with(vec![point_decl()]));

    let pending = registry.compile_in_background("Point");
    assert_eq!(pending.name(), "Point");
    let schema = pending.await_ready().unwrap();
    assert_eq!(schema.name(), "Point");
    assert!(Arc::ptr_eq(&schema, &registry.schema("Point").unwrap()));

    let missing = registry.compile_in_background("Missing");
    assert!(matches!(missing.await_ready(), Err(StoreError::UnknownSchema(_))));
}

// =============================================================================
// Type Id Tests
// =============================================================================

#[test]
fn test_type_ids_are_lazy() {
    let registry = registry_with(vec![point_decl(), any_decl()]);

    assert!(matches!(
        registry.type_to_id("Point", false),
        Err(StoreError::UnregisteredType(name)) if name == "Point"
    ));
    assert_eq!(registry.type_to_id("Point", true).unwrap(), 1);
    assert_eq!(registry.type_to_id("Point", false).unwrap(), 1);
    assert_eq!(registry.type_to_id("Any", true).unwrap(), 2);

    assert_eq!(registry.id_to_type(2).unwrap(), "Any");
    assert!(matches!(registry.id_to_type(0), Err(StoreError::UnknownTypeId(0))));
    assert!(matches!(registry.id_to_type(3), Err(StoreError::UnknownTypeId(3))));
}

#[test]
fn test_type_id_needs_declaration() {
    let registry = registry_with(vec![point_decl()]);
    assert!(matches!(
        registry.type_to_id("Missing", true),
        Err(StoreError::UnknownSchema(_))
    ));
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_snapshot_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("registry.snap");

    let registry = registry_with(vec![point_decl(), any_decl()]);
    let schema = registry.schema("Any").unwrap();
    let point = registry.schema("Point").unwrap();
    let mut any = Instance::new(&schema)
        .with("value", Instance::new(&point).with("x", 1.5).unwrap())
        .unwrap();
    let bytes = schema.to_bytes(&registry.env(), &mut any).unwrap();
    registry.save_snapshot(&path).unwrap();

    let restored = SchemaRegistry::load_snapshot(&path, Config::default()).unwrap();
    assert_eq!(restored.declarations(), registry.declarations());
    assert_eq!(restored.compiled_count(), 0);
    assert_eq!(restored.type_to_id("Point", false).unwrap(), 1);

    // records written before the snapshot decode with the restored ids
    let decoded = restored
        .schema("Any")
        .unwrap()
        .from_bytes(&restored.env(), bytes)
        .unwrap();
    let value = decoded.get("value").unwrap().as_record().unwrap();
    assert_eq!(value.schema().name(), "Point");
    assert_eq!(value.get("x").unwrap(), &Value::Float(1.5));
}

#[test]
fn test_restored_ids_continue_numbering() {
    let registry = registry_with(vec![point_decl(), any_decl()]);
    registry.type_to_id("Point", true).unwrap();

    let restored = SchemaRegistry::from_snapshot(registry.snapshot(), Config::default()).unwrap();
    assert_eq!(restored.type_to_id("Any", true).unwrap(), 2);
}

#[test]
fn test_snapshot_header() {
    let bytes = snapshot_bytes();
    assert_eq!(&bytes[0..4], b"FSRG");
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1);
    let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    assert_eq!(bytes.len(), 14 + len);

    let decoded = Snapshot::decode(&bytes).unwrap();
    assert_eq!(decoded.type_ids, vec![("Point".to_string(), 1)]);
    assert_eq!(decoded.declarations.len(), 2);
}

#[test]
fn test_flipped_payload_byte_detected() {
    let mut bytes = snapshot_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    match Snapshot::decode(&bytes) {
        Err(StoreError::SnapshotCorruption(detail)) => assert!(detail.contains("checksum")),
        other => panic!("expected corruption, got {other:?}"),
    }
}

#[test]
fn test_bad_magic_detected() {
    let mut bytes = snapshot_bytes();
    bytes[0] = b'X';
    assert!(matches!(Snapshot::decode(&bytes), Err(StoreError::SnapshotCorruption(_))));
}

#[test]
fn test_unsupported_version_detected() {
    let mut bytes = snapshot_bytes();
    bytes[4] = 9;
    match Snapshot::decode(&bytes) {
        Err(StoreError::SnapshotCorruption(detail)) => assert!(detail.contains("version")),
        other => panic!("expected corruption, got {other:?}"),
    }
}

#[test]
fn test_truncated_snapshot_detected() {
    let bytes = snapshot_bytes();
    assert!(matches!(
        Snapshot::decode(&bytes[..bytes.len() - 3]),
        Err(StoreError::SnapshotCorruption(_))
    ));
    assert!(matches!(Snapshot::decode(&bytes[..10]), Err(StoreError::SnapshotCorruption(_))));
}

#[test]
fn test_reserved_type_id_rejected() {
    let snapshot = Snapshot {
        declarations: vec![point_decl()],
        type_ids: vec![("Point".to_string(), 0)],
    };
    assert!(matches!(
        SchemaRegistry::from_snapshot(snapshot, Config::default()),
        Err(StoreError::SnapshotCorruption(_))
    ));

    let duplicated = Snapshot {
        declarations: vec![point_decl(), any_decl()],
        type_ids: vec![("Point".to_string(), 1), ("Any".to_string(), 1)],
    };
    assert!(matches!(
        SchemaRegistry::from_snapshot(duplicated, Config::default()),
        Err(StoreError::SnapshotCorruption(_))
    ));
}

#[test]
fn test_missing_snapshot_file() {
    let dir = TempDir::new().unwrap();
    let result = SchemaRegistry::load_snapshot(&dir.path().join("absent.snap"), Config::default());
    assert!(matches!(result, Err(StoreError::Io(_))));
}
