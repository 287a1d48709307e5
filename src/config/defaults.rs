//! Defaulting policy.
//!
//! Every registry-declared default whose key is absent from all layers is
//! filled in before validation, so optional fields are never "missing".
//! Vendor blocks are only completed when they exist: creating one here would
//! hide an `UnknownVendor` violation.

use super::schema::{FieldSpec, SchemaRegistry};
use super::types::RESERVED_SECTIONS;
use serde_json::{Map, Value};

/// Return `tree` with registry defaults filled in. Idempotent.
pub fn apply_defaults(tree: &Value, registry: &SchemaRegistry) -> Value {
    let mut root = match tree {
        Value::Object(map) => map.clone(),
        other => return other.clone(),
    };

    for section in registry.section_names() {
        if section == "tracing" {
            continue;
        }
        fill_table(&mut root, section, &registry.describe(section));
    }

    fill_tracing(&mut root, registry);

    let vendor_blocks: Vec<String> = root
        .iter()
        .filter(|(name, value)| {
            value.is_object()
                && !RESERVED_SECTIONS.contains(&name.as_str())
                && registry.is_registered_vendor(name)
        })
        .map(|(name, _)| name.clone())
        .collect();
    for vendor in vendor_blocks {
        if let Some(Value::Object(block)) = root.get_mut(&vendor) {
            fill_fields(block, &registry.vendor_fields(&vendor));
        }
    }

    Value::Object(root)
}

fn fill_tracing(root: &mut Map<String, Value>, registry: &SchemaRegistry) {
    fill_table(root, "tracing", &registry.describe("tracing"));

    let Some(Value::Object(tracing)) = root.get_mut("tracing") else {
        return;
    };

    for backend in registry.tracing_backend_names() {
        fill_table(tracing, backend, &registry.tracing_backend_fields(backend));
    }

    // Unregistered backends still get their `use_*` flag defaulted.
    let extra: Vec<String> = tracing
        .iter()
        .filter(|(name, value)| value.is_object() && !registry.tracing_backend_names().any(|b| b == name.as_str()))
        .map(|(name, _)| name.clone())
        .collect();
    for backend in extra {
        if let Some(Value::Object(block)) = tracing.get_mut(&backend) {
            fill_fields(block, &registry.tracing_backend_fields(&backend));
        }
    }
}

/// Fill defaults into `parent[name]`, creating the table if it is absent.
/// A non-table value is left alone for the validator to report.
fn fill_table(parent: &mut Map<String, Value>, name: &str, fields: &[FieldSpec]) {
    let entry = parent
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(table) = entry {
        fill_fields(table, fields);
    }
}

fn fill_fields(table: &mut Map<String, Value>, fields: &[FieldSpec]) {
    for field in fields {
        if let Some(default) = field.default_value() {
            match table.get(&field.key) {
                None | Some(Value::Null) => {
                    table.insert(field.key.clone(), default.clone());
                }
                Some(_) => {}
            }
        }
    }
}
