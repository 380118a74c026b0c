//! fieldstore-dump
//!
//! Prints the compiled layout of the schemas stored in a registry snapshot.

use std::path::PathBuf;

use clap::Parser;
use fieldstore::schema::FieldKind;
use fieldstore::size::SizeShape;
use fieldstore::{Config, Schema, SchemaRegistry, TypeRegistry};
use tracing_subscriber::{fmt, EnvFilter};

/// Inspect compiled record layouts
#[derive(Parser, Debug)]
#[command(name = "fieldstore-dump")]
#[command(about = "Print field order, sizes and command streams of snapshotted schemas")]
#[command(version)]
struct Args {
    /// Registry snapshot file
    snapshot: PathBuf,

    /// Only dump this schema
    #[arg(short, long)]
    schema: Option<String>,

    /// Skip the command stream listing
    #[arg(long)]
    no_commands: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,fieldstore=info"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let registry = match SchemaRegistry::load_snapshot(&args.snapshot, Config::default()) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to load snapshot {}: {}", args.snapshot.display(), e);
            std::process::exit(1);
        }
    };

    let names: Vec<String> = match &args.schema {
        Some(name) => vec![name.clone()],
        None => registry.declarations().into_iter().map(|d| d.name).collect(),
    };

    let mut failed = false;
    for name in names {
        match registry.schema(&name) {
            Ok(schema) => print_schema(&schema, !args.no_commands),
            Err(e) => {
                eprintln!("{name}: {e}");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}

fn print_schema(schema: &Schema, commands: bool) {
    let mut traits = Vec::new();
    if schema.is_immutable() {
        traits.push("immutable");
    }
    if schema.is_extensible() {
        traits.push("extensible");
    }
    if schema.has_pointers() {
        traits.push("pointers");
    }
    println!("schema {} [{}]", schema.name(), traits.join(", "));

    match (schema.fixed_size(), schema.max_size()) {
        (Some(fixed), _) => println!("  size: {fixed} bytes"),
        (None, Some(max)) => println!("  size: {}..={} bytes", schema.min_size(), max),
        (None, None) => println!("  size: {}.. bytes", schema.min_size()),
    }

    println!("  fields:");
    for (i, field) in schema.fields().iter().enumerate() {
        let size = match field.size_descriptor().shape() {
            SizeShape::Fixed(n) => format!("{n}"),
            SizeShape::Bounded { min, max: Some(max) } => format!("{min}..={max}"),
            SizeShape::Bounded { min, max: None } => format!("{min}.."),
        };
        let unit = format!("{:?}", field.size_descriptor().word_space()).to_lowercase();
        println!("    {i:>3} {:<28} {size} {unit}", field.name());
        if let FieldKind::BitGroup(group) = field.kind() {
            println!("        strategy {:?}, members {}", group.strategy(), group_members(group.members()));
        }
    }

    if commands {
        println!("  commands ({} bytes):", schema.commands().len());
        for line in schema.commands().disassemble_with(schema.fields()).lines() {
            println!("    {line}");
        }
    }
    println!();
}

fn group_members(members: &[std::sync::Arc<fieldstore::schema::FieldDescriptor>]) -> String {
    members.iter().map(|m| m.name()).collect::<Vec<_>>().join(" | ")
}
