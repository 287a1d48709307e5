//! Resolver: projects a merged tree into a typed [`ResolvedConfig`].
//!
//! Each role is resolved independently: `vendor.<role>_model` names a vendor
//! block, and that block's `<role>_model` field plus its connection fields
//! become the role's [`ModelEndpoint`]. Connection fields are never shared
//! across roles that select different vendors.

use super::defaults::apply_defaults;
use super::schema::{SchemaRegistry, backend_flag};
use super::types::{
    AsrConfig, ModelEndpoint, ModelRole, ResolvedConfig, TracingBackend, TracingConfig, TtsConfig,
    VendorName, DEFAULT_TRACING_PROJECT,
};
use crate::error::ResolveError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Produces [`ResolvedConfig`] snapshots from merged trees.
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<SchemaRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Resolve a merged tree. Expected to run only on trees that validated
    /// cleanly; the checks here guard the projection itself.
    pub fn resolve(&self, merged: &Value) -> Result<ResolvedConfig, ResolveError> {
        let tree = apply_defaults(merged, &self.registry);
        let empty = Map::new();
        let root = tree.as_object().unwrap_or(&empty);

        let mut models = BTreeMap::new();
        for role in ModelRole::ALL {
            models.insert(role, resolve_role(root, role)?);
        }

        Ok(ResolvedConfig {
            models,
            tracing: resolve_tracing(root.get("tracing")),
            asr: typed_section(root, "asr", &self.registry)?,
            tts: typed_section(root, "tts", &self.registry)?,
        })
    }
}

fn resolve_role(root: &Map<String, Value>, role: ModelRole) -> Result<ModelEndpoint, ResolveError> {
    let vendor = root
        .get("vendor")
        .and_then(|v| v.get(role.field_name()))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ResolveError::MissingSelector {
            role: role.to_string(),
        })?;

    let block = root
        .get(vendor)
        .and_then(Value::as_object)
        .filter(|_| !super::types::RESERVED_SECTIONS.contains(&vendor))
        .ok_or_else(|| ResolveError::UnknownVendor {
            role: role.to_string(),
            vendor: vendor.to_string(),
        })?;

    let model = block
        .get(role.field_name())
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ResolveError::MissingModelField {
            vendor: vendor.to_string(),
            field: role.field_name().to_string(),
        })?;

    let connection = block
        .iter()
        .filter(|(key, _)| !ModelRole::is_role_field(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(ModelEndpoint {
        role,
        vendor: VendorName::new(vendor),
        model: model.to_string(),
        connection,
    })
}

fn resolve_tracing(section: Option<&Value>) -> TracingConfig {
    let Some(Value::Object(table)) = section else {
        return TracingConfig::default();
    };

    let project = table
        .get("project")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_TRACING_PROJECT)
        .to_string();

    let backends = table
        .iter()
        .filter_map(|(name, value)| {
            let block = value.as_object()?;
            let flag = backend_flag(name);
            let enabled = block.get(&flag).and_then(Value::as_bool).unwrap_or(false);
            let connection = block
                .iter()
                .filter(|(key, _)| **key != flag)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Some((
                name.clone(),
                TracingBackend {
                    name: name.clone(),
                    enabled,
                    connection,
                },
            ))
        })
        .collect();

    TracingConfig { project, backends }
}

/// Deserialize a section into its typed record. Gated fields whose gate is
/// not true were never checked by the validator, so they are dropped here.
fn typed_section<T: DeserializeOwned>(
    root: &Map<String, Value>,
    section: &str,
    registry: &SchemaRegistry,
) -> Result<T, ResolveError> {
    let mut value = root
        .get(section)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    if let Value::Object(table) = &mut value {
        for field in registry.describe(section) {
            if let Some(gate) = field.gate()
                && table.get(gate).and_then(Value::as_bool) != Some(true)
            {
                table.remove(&field.key);
            }
        }
    }
    serde_json::from_value(value).map_err(|source| ResolveError::Section {
        section: section.to_string(),
        source,
    })
}
