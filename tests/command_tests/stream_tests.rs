//! Command Stream Tests
//!
//! Tests verify:
//! - Fixed-size runs merge into one skip, split at 255 fields
//! - Variable-size runs merge into one unknown skip
//! - Nullable variable-size fields get their own guarded command
//! - Pointer-bearing fields get marker commands
//! - Extensible schemas switch to the extension before ending
//! - Opcode encoding and the disassembly listing

use fieldstore::command::{Command, MarkerKind};
use fieldstore::{Config, FieldDecl, FieldType, SchemaDecl, SchemaRegistry, TypeRegistry};

fn registry_with(decls: Vec<SchemaDecl>) -> SchemaRegistry {
    let registry = SchemaRegistry::new(Config::default());
    registry.register_all(decls).unwrap();
    registry
}

fn commands_of(registry: &SchemaRegistry, name: &str) -> Vec<Command> {
    registry.schema(name).unwrap().commands().commands().unwrap()
}

fn point_decl() -> SchemaDecl {
    SchemaDecl::builder("Point")
        .field(FieldDecl::new("x", FieldType::Float))
        .field(FieldDecl::new("y", FieldType::Float))
        .build()
}

fn holder_decl() -> SchemaDecl {
    SchemaDecl::builder("Holder")
        .field(FieldDecl::new("target", FieldType::Reference("Point".to_string())).nullable())
        .field(FieldDecl::new("data", FieldType::ChunkPointer).nullable())
        .field(FieldDecl::new("count", FieldType::Int))
        .build()
}

fn floats(name: &str, count: usize) -> SchemaDecl {
    let mut builder = SchemaDecl::builder(name);
    for i in 0..count {
        builder = builder.field(FieldDecl::new(format!("f{i:03}"), FieldType::Float));
    }
    builder.build()
}

// =============================================================================
// Skip Tests
// =============================================================================

#[test]
fn test_fixed_fields_merge() {
    let registry = registry_with(vec![point_decl()]);
    let schema = registry.schema("Point").unwrap();

    assert_eq!(
        schema.commands().commands().unwrap(),
        vec![Command::SkipBytes { size: 16, fields: 2 }, Command::EndFields]
    );
    assert_eq!(schema.commands().as_bytes(), &[0x02, 16, 2, 0x00]);
    assert_eq!(schema.commands().field_count(), 2);
}

#[test]
fn test_fixed_run_then_unknown() {
    let registry = registry_with(vec![SchemaDecl::builder("Note")
        .field(FieldDecl::new("title", FieldType::Str))
        .field(FieldDecl::new("pinned", FieldType::Bool))
        .field(FieldDecl::new("stamp", FieldType::Int))
        .build()]);

    assert_eq!(
        commands_of(&registry, "Note"),
        vec![
            Command::SkipBytes { size: 13, fields: 3 },
            Command::SkipUnknown { extra: 0 },
            Command::EndFields,
        ]
    );
}

#[test]
fn test_unknown_fields_merge() {
    let registry = registry_with(vec![SchemaDecl::builder("Doc")
        .field(FieldDecl::new("title", FieldType::Str))
        .field(FieldDecl::new("body", FieldType::Bytes))
        .build()]);

    assert_eq!(
        commands_of(&registry, "Doc"),
        vec![
            Command::SkipBytes { size: 8, fields: 2 },
            Command::SkipUnknown { extra: 1 },
            Command::EndFields,
        ]
    );
}

#[test]
fn test_wide_skip_uses_32_bit_operand() {
    let registry = registry_with(vec![
        floats("Big", 40),
        SchemaDecl::builder("Outer")
            .field(FieldDecl::new("big", FieldType::Inline("Big".to_string())))
            .build(),
    ]);
    let schema = registry.schema("Outer").unwrap();

    assert_eq!(
        schema.commands().commands().unwrap(),
        vec![Command::SkipBytes { size: 320, fields: 1 }, Command::EndFields]
    );
    // opcode, u32 size, u8 count, end
    assert_eq!(schema.commands().as_bytes(), &[0x03, 0x40, 0x01, 0, 0, 1, 0x00]);
}

#[test]
fn test_skip_splits_after_255_fields() {
    let registry = registry_with(vec![floats("Wide", 300)]);

    assert_eq!(
        commands_of(&registry, "Wide"),
        vec![
            Command::SkipBytes { size: 255 * 8, fields: 255 },
            Command::SkipBytes { size: 45 * 8, fields: 45 },
            Command::EndFields,
        ]
    );
}

// =============================================================================
// Null Guard Tests
// =============================================================================

#[test]
fn test_nullable_unknown_field_is_guarded() {
    let registry = registry_with(vec![SchemaDecl::builder("Label")
        .field(FieldDecl::new("text", FieldType::Str).nullable())
        .field(FieldDecl::new("tail", FieldType::Str))
        .build()]);
    let schema = registry.schema("Label").unwrap();

    let names = schema.fields().names();
    let guarded = names.iter().position(|n| *n == "text").unwrap();
    assert_eq!(
        schema.commands().commands().unwrap(),
        vec![
            Command::SkipBytes { size: 9, fields: 3 },
            Command::SkipUnknown { extra: 0 },
            Command::SkipFlowIfNull { field: guarded as u16 },
            Command::SkipUnknown { extra: 0 },
            Command::EndFields,
        ]
    );
    assert_eq!(names, vec!["[text$null]", "tail$len", "text$len", "tail", "text"]);
}

#[test]
fn test_fixed_nullable_field_needs_no_guard() {
    let registry = registry_with(vec![SchemaDecl::builder("Fixed")
        .field(FieldDecl::new("score", FieldType::Int).nullable())
        .field(FieldDecl::new("flag", FieldType::Bool))
        .fixed_layout()
        .build()]);

    let commands = commands_of(&registry, "Fixed");
    assert!(commands.iter().all(|c| !c.is_flow()));
    assert_eq!(commands, vec![Command::SkipBytes { size: 9, fields: 2 }, Command::EndFields]);
}

// =============================================================================
// Marker Tests
// =============================================================================

#[test]
fn test_pointer_fields_get_markers() {
    let registry = registry_with(vec![point_decl(), holder_decl()]);
    let schema = registry.schema("Holder").unwrap();

    assert_eq!(schema.fields().names(), vec!["count", "data", "target"]);
    assert_eq!(
        schema.commands().commands().unwrap(),
        vec![
            Command::SkipBytes { size: 8, fields: 1 },
            Command::Marker {
                kind: MarkerKind::ChunkPointer,
                needs_size: false
            },
            Command::Marker {
                kind: MarkerKind::Reference,
                needs_size: false
            },
            Command::EndFields,
        ]
    );
    assert_eq!(schema.commands().as_bytes(), &[0x02, 8, 1, 0x09, 0x0A, 0x00]);
}

#[test]
fn test_dynamic_marker_needs_size() {
    let registry = registry_with(vec![SchemaDecl::builder("Any")
        .field(FieldDecl::new("value", FieldType::Dynamic).nullable())
        .build()]);
    let schema = registry.schema("Any").unwrap();

    assert_eq!(
        schema.commands().commands().unwrap(),
        vec![
            Command::SkipBytes { size: 5, fields: 2 },
            Command::SkipFlowIfNull { field: 2 },
            Command::Marker {
                kind: MarkerKind::Dynamic,
                needs_size: true
            },
            Command::EndFields,
        ]
    );
    assert_eq!(schema.commands().as_bytes()[6], 0x88);
}

#[test]
fn test_inline_records_marked_only_with_pointers() {
    let registry = registry_with(vec![
        point_decl(),
        holder_decl(),
        SchemaDecl::builder("Plain")
            .field(FieldDecl::new("p", FieldType::Inline("Point".to_string())))
            .build(),
        SchemaDecl::builder("Wrapper")
            .field(FieldDecl::new("h", FieldType::Inline("Holder".to_string())))
            .build(),
    ]);

    assert_eq!(
        commands_of(&registry, "Plain"),
        vec![Command::SkipBytes { size: 16, fields: 1 }, Command::EndFields]
    );
    assert_eq!(
        commands_of(&registry, "Wrapper"),
        vec![
            Command::Marker {
                kind: MarkerKind::PotentialReference,
                needs_size: false
            },
            Command::EndFields,
        ]
    );
    assert!(!registry.schema("Plain").unwrap().has_pointers());
    assert!(registry.schema("Wrapper").unwrap().has_pointers());
}

#[test]
fn test_extensible_schema_switches() {
    let registry = registry_with(vec![SchemaDecl::builder("Base")
        .field(FieldDecl::new("id", FieldType::Int))
        .extensible()
        .build()]);

    assert_eq!(
        commands_of(&registry, "Base"),
        vec![
            Command::SkipBytes { size: 8, fields: 1 },
            Command::SwitchToDynamicFieldList,
            Command::EndFields,
        ]
    );
}

// =============================================================================
// Listing Tests
// =============================================================================

#[test]
fn test_disassembly() {
    let registry = registry_with(vec![point_decl()]);
    let schema = registry.schema("Point").unwrap();

    assert_eq!(
        schema.commands().disassemble(),
        "0000: SKIP_BYTES 16 (2 fields)\n0003: END_FIELDS\n"
    );
    assert_eq!(
        schema.commands().disassemble_with(schema.fields()),
        "0000: SKIP_BYTES 16 (2 fields)    ; x, y\n0003: END_FIELDS\n"
    );
}

#[test]
fn test_command_display_and_counts() {
    assert_eq!(Command::SkipUnknown { extra: 2 }.to_string(), "SKIP_UNKNOWN (3 fields)");
    assert_eq!(Command::SkipUnknown { extra: 2 }.field_count(), 3);
    assert_eq!(Command::SkipFlowIfNull { field: 4 }.field_count(), 0);
    assert_eq!(
        Command::Marker {
            kind: MarkerKind::Reference,
            needs_size: true
        }
        .to_string(),
        "REFERENCE_FIELD +size"
    );
}
