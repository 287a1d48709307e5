//! Validator: collects every violation in a merged tree.
//!
//! Sections are checked independently so a typo in one does not mask errors
//! in another. The validator is a pure function of the tree and the
//! registry; it applies registry defaults itself before checking.

use super::defaults::apply_defaults;
use super::schema::{FieldSpec, FieldType, Requirement, SchemaRegistry};
use super::types::{ModelRole, RESERVED_SECTIONS};
use crate::error::{ValidationReport, Violation};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Validate a merged tree against the registry.
pub fn validate(merged: &Value, registry: &SchemaRegistry) -> ValidationReport {
    let mut report = ValidationReport::new();
    let tree = apply_defaults(merged, registry);

    let Value::Object(root) = &tree else {
        report.push(Violation::type_mismatch("<root>", "table", value_type_name(&tree)));
        return report;
    };

    let referenced = check_vendor_selection(root, registry, &mut report);
    check_vendor_blocks(root, registry, &referenced, &mut report);
    check_tracing(root, registry, &mut report);

    let mut remaining: Vec<&str> = vec!["asr", "tts"];
    remaining.extend(
        registry
            .section_names()
            .filter(|s| !RESERVED_SECTIONS.contains(s)),
    );
    for section in remaining {
        let fields = registry.describe(section);
        if fields.is_empty() {
            continue;
        }
        match root.get(section) {
            Some(Value::Object(table)) => check_fields(section, table, &fields, &mut report),
            Some(other) => report.push(Violation::type_mismatch(section, "table", value_type_name(other))),
            None => {}
        }
    }

    report
}

/// Check the `[vendor]` selectors and their referential integrity.
/// Returns the names of vendor blocks that were successfully referenced.
fn check_vendor_selection(
    root: &Map<String, Value>,
    registry: &SchemaRegistry,
    report: &mut ValidationReport,
) -> BTreeSet<String> {
    let mut referenced = BTreeSet::new();

    let vendor = match root.get("vendor") {
        Some(Value::Object(table)) => table,
        Some(other) => {
            report.push(Violation::type_mismatch("vendor", "table", value_type_name(other)));
            return referenced;
        }
        None => return referenced,
    };

    check_fields("vendor", vendor, &registry.describe("vendor"), report);

    for role in ModelRole::ALL {
        let selector_path = format!("vendor.{}", role.field_name());
        let Some(name) = vendor
            .get(role.field_name())
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        else {
            continue;
        };

        if RESERVED_SECTIONS.contains(&name) {
            report.push(Violation::unreachable_selector(
                &selector_path,
                name,
                "is a reserved settings section",
            ));
            continue;
        }

        match root.get(name) {
            None | Some(Value::Null) => report.push(Violation::unknown_vendor(&selector_path, name)),
            Some(Value::Object(_)) => {
                referenced.insert(name.to_string());
            }
            Some(other) => report.push(Violation::unreachable_selector(
                &selector_path,
                name,
                &format!("is a {} rather than a table", value_type_name(other)),
            )),
        }
    }

    referenced
}

fn check_vendor_blocks(
    root: &Map<String, Value>,
    registry: &SchemaRegistry,
    referenced: &BTreeSet<String>,
    report: &mut ValidationReport,
) {
    let mut blocks: BTreeSet<&str> = referenced.iter().map(String::as_str).collect();
    for name in registry.vendor_names() {
        match root.get(name) {
            Some(Value::Object(_)) => {
                blocks.insert(name);
            }
            // Non-table values that a selector points at were already
            // reported as unreachable.
            Some(other) if !other.is_null() && !selector_targets(root, name) => {
                report.push(Violation::type_mismatch(name, "table", value_type_name(other)));
            }
            _ => {}
        }
    }

    for name in blocks {
        if let Some(Value::Object(block)) = root.get(name) {
            check_fields(name, block, &registry.vendor_fields(name), report);
        }
    }
}

fn selector_targets(root: &Map<String, Value>, name: &str) -> bool {
    root.get("vendor")
        .and_then(Value::as_object)
        .is_some_and(|vendor| {
            ModelRole::ALL
                .iter()
                .any(|role| vendor.get(role.field_name()).and_then(Value::as_str) == Some(name))
        })
}

fn check_tracing(root: &Map<String, Value>, registry: &SchemaRegistry, report: &mut ValidationReport) {
    let tracing = match root.get("tracing") {
        Some(Value::Object(table)) => table,
        Some(other) => {
            report.push(Violation::type_mismatch("tracing", "table", value_type_name(other)));
            return;
        }
        None => return,
    };

    check_fields("tracing", tracing, &registry.describe("tracing"), report);

    let mut backends: BTreeSet<&str> = registry.tracing_backend_names().collect();
    backends.extend(
        tracing
            .iter()
            .filter(|(_, v)| v.is_object())
            .map(|(k, _)| k.as_str()),
    );

    for backend in backends {
        let path = format!("tracing.{}", backend);
        match tracing.get(backend) {
            Some(Value::Object(block)) => {
                check_fields(&path, block, &registry.tracing_backend_fields(backend), report)
            }
            Some(other) if !other.is_null() => {
                report.push(Violation::type_mismatch(&path, "table", value_type_name(other)))
            }
            _ => {}
        }
    }
}

/// Check one table against its field specs, appending violations.
///
/// Unknown keys are accepted. A gated field whose gate is not true is
/// neither required nor type-checked.
pub fn check_fields(prefix: &str, table: &Map<String, Value>, fields: &[FieldSpec], report: &mut ValidationReport) {
    for field in fields {
        let path = join_path(prefix, &field.key);
        let value = table.get(&field.key).filter(|v| !v.is_null());

        match (&field.requirement, value) {
            (Requirement::Required, None) => report.push(Violation::missing_field(&path)),
            (Requirement::RequiredIf { gate }, value) => {
                if table.get(gate).and_then(Value::as_bool) != Some(true) {
                    continue;
                }
                match value {
                    None => report.push(Violation::conditional_missing(&path, &join_path(prefix, gate))),
                    Some(v) => {
                        if let Some(violation) = check_value(&path, v, &field.ty) {
                            report.push(violation);
                        }
                    }
                }
            }
            (Requirement::Optional { .. }, None) => {}
            (_, Some(v)) => {
                if let Some(violation) = check_value(&path, v, &field.ty) {
                    report.push(violation);
                }
            }
        }
    }
}

/// Check a single present value against its expected type.
pub fn check_value(path: &str, value: &Value, ty: &FieldType) -> Option<Violation> {
    let expected = ty.to_string();
    let mismatch = || Some(Violation::type_mismatch(path, &expected, value_type_name(value)));

    match ty {
        FieldType::String if value.is_string() => None,
        FieldType::String => mismatch(),
        FieldType::NonEmptyString => match value.as_str() {
            None => mismatch(),
            Some(s) if s.trim().is_empty() => Some(Violation::out_of_range(path, "\"\"", expected.as_str())),
            Some(_) => None,
        },
        FieldType::Bool if value.is_boolean() => None,
        FieldType::Bool => mismatch(),
        FieldType::Integer { min, max } => {
            let Some(n) = value.as_i64() else {
                return mismatch();
            };
            let below = min.is_some_and(|m| n < m);
            let above = max.is_some_and(|m| n > m);
            (below || above).then(|| Violation::out_of_range(path, n, describe_range(*min, *max)))
        }
        FieldType::Float { min, max } => {
            let Some(x) = value.as_f64() else {
                return mismatch();
            };
            let below = min.is_some_and(|m| x < m);
            let above = max.is_some_and(|m| x > m);
            (below || above || !x.is_finite()).then(|| Violation::out_of_range(path, x, describe_range(*min, *max)))
        }
        FieldType::OneOf(allowed) => match value.as_str() {
            None => mismatch(),
            Some(s) if allowed.iter().any(|a| a == s) => None,
            Some(s) => Some(Violation::out_of_range(path, format!("\"{}\"", s), expected.as_str())),
        },
        FieldType::NumericTriplet => match value.as_array() {
            Some(items) if items.len() == 3 && items.iter().all(Value::is_number) => None,
            Some(items) => Some(Violation::type_mismatch(path, &expected, &describe_list(items))),
            None => mismatch(),
        },
        FieldType::StringList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => None,
            _ => mismatch(),
        },
        FieldType::Table if value.is_object() => None,
        FieldType::Table => mismatch(),
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "table",
    }
}

pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn describe_range<T: std::fmt::Display>(min: Option<T>, max: Option<T>) -> String {
    match (min, max) {
        (Some(lo), Some(hi)) => format!("[{}, {}]", lo, hi),
        (Some(lo), None) => format!(">= {}", lo),
        (None, Some(hi)) => format!("<= {}", hi),
        (None, None) => "finite number".to_string(),
    }
}

fn describe_list(items: &[Value]) -> String {
    if items.iter().all(Value::is_number) {
        format!("list of {} numbers", items.len())
    } else {
        format!("list of {} mixed values", items.len())
    }
}
